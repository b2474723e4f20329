//! kgrag CLI
//!
//! Command-line interface for the hybrid graph-vector retrieval engine:
//! import extracted triples and community partitions, run retrieval, and
//! chat with the reasoning agent.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kgrag_agents::tools::{EntityDetailsTool, GraphRagSearchTool, RelationPathTool};
use kgrag_agents::{
    AgentConfig, ChatClient, ChatSession, EmbedClient, Embedder, HybridRetriever,
    ReasoningController, RetrievalConfig, SurrealGraphStore, SurrealSimilarityIndex, ToolRegistry,
};
use kgrag_core::{AnswerStatus, Community, Entity, LayerTag, Provenance, Relation};
use kgrag_db::{init_memory, init_persistent, Repository};
use serde::Deserialize;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// kgrag - hybrid graph-vector retrieval over a knowledge graph
#[derive(Parser)]
#[command(name = "kgrag")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database path (defaults to ~/.kgrag/data)
    #[arg(short, long)]
    db_path: Option<PathBuf>,

    /// Use in-memory database (for testing)
    #[arg(long)]
    memory: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import extracted triples from the extractor's JSON output
    Import {
        /// Path to JSON file with a top-level "triples" array
        path: PathBuf,

        /// Skip entity-name embedding (entities stay out of vector search)
        #[arg(long)]
        skip_embedding: bool,
    },

    /// Import a community partition with summaries from a JSON file
    Communities {
        /// Path to JSON file with community assignments
        path: PathBuf,
    },

    /// Embed and cache community summaries that are missing embeddings
    IndexCommunities,

    /// Run hybrid retrieval for a query and print the result
    Retrieve {
        /// Natural-language query
        query: String,

        /// Maximum candidates
        #[arg(short, long, default_value = "5")]
        limit: usize,

        /// Maximum traversal depth from seed entities
        #[arg(long, default_value = "2")]
        hop_limit: usize,

        /// Skip the graph walk and rank by vector similarity alone
        #[arg(long)]
        no_graph: bool,
    },

    /// Interactive chat with the reasoning agent
    Chat,

    /// Show database statistics
    Stats,

    /// Show the embedding dimension from the active embeddings provider
    EmbeddingDim {
        /// Optional text to embed (defaults to "dimension probe")
        text: Option<String>,
    },

    /// Delete the local database (fresh start)
    ResetDb {
        /// Database path (defaults to ~/.kgrag/data)
        #[arg(short, long)]
        db_path: Option<PathBuf>,
    },
}

fn default_db_path() -> PathBuf {
    let mut path = dirs::home_dir().expect("Could not find home directory");
    path.push(".kgrag");
    path.push("data");
    path
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if let Commands::EmbeddingDim { text } = &cli.command {
        let embed = EmbedClient::default_local();
        if !embed.health().await.unwrap_or(false) {
            eprintln!("Error: embeddings service is not reachable.");
            eprintln!("  Embeddings: {}", embed.base_url());
            anyhow::bail!("Embeddings service unavailable");
        }

        let probe = text.clone().unwrap_or_else(|| "dimension probe".to_string());
        let embedding = embed.embed(&probe, false).await?;
        println!("Embedding dimension: {}", embedding.len());
        return Ok(());
    }

    // Setup logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::ResetDb { db_path } = &cli.command {
        let path = db_path.clone().unwrap_or_else(default_db_path);

        if path.exists() {
            std::fs::remove_dir_all(&path)
                .with_context(|| format!("Failed to remove db at {}", path.display()))?;
            println!("✓ Removed database at {}", path.display());
        } else {
            println!("Database not found at {}, nothing to remove", path.display());
        }
        return Ok(());
    }

    let db = if cli.memory {
        info!("Using in-memory database");
        init_memory().await?
    } else {
        let db_path = cli.db_path.unwrap_or_else(default_db_path);

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Using database at: {}", db_path.display());
        init_persistent(&db_path).await?
    };

    let repo = Repository::new(db);
    let embed = EmbedClient::default_local();
    let llm = ChatClient::default_local();

    // Check inference services only when needed
    let needs_embed = match &cli.command {
        Commands::Import { skip_embedding, .. } => !skip_embedding,
        Commands::IndexCommunities | Commands::Retrieve { .. } | Commands::Chat => true,
        _ => false,
    };
    let needs_llm = matches!(cli.command, Commands::Chat);

    if needs_embed && !embed.health().await.unwrap_or(false) {
        eprintln!("Error: embeddings service is not reachable.");
        eprintln!("  Embeddings: {}", embed.base_url());
        eprintln!("Start it with: docker compose up -d");
        anyhow::bail!("Embeddings service unavailable");
    }

    if needs_llm && !llm.health().await.unwrap_or(false) {
        eprintln!("Error: language model service is not reachable.");
        eprintln!("  LLM: {}", llm.base_url());
        eprintln!("Start it with: docker compose up -d");
        anyhow::bail!("Language model service unavailable");
    }

    match cli.command {
        Commands::Import { path, skip_embedding } => {
            cmd_import(repo, embed, path, skip_embedding).await?;
        }
        Commands::Communities { path } => {
            cmd_communities(repo, path).await?;
        }
        Commands::IndexCommunities => {
            cmd_index_communities(repo, embed).await?;
        }
        Commands::Retrieve { query, limit, hop_limit, no_graph } => {
            cmd_retrieve(repo, embed, query, limit, hop_limit, no_graph).await?;
        }
        Commands::Chat => {
            cmd_chat(repo, embed, llm).await?;
        }
        Commands::Stats => {
            cmd_stats(repo).await?;
        }
        Commands::EmbeddingDim { .. } | Commands::ResetDb { .. } => {
            // Handled before database init.
        }
    }

    Ok(())
}

/// The triple extractor's output file
#[derive(Debug, Deserialize)]
struct TripleFile {
    #[serde(default)]
    triples: Vec<TripleRecord>,
}

#[derive(Debug, Deserialize)]
struct TripleRecord {
    subject: String,
    predicate: String,
    object: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
    #[serde(default)]
    source_text: Option<String>,
    #[serde(default)]
    source_file: Option<String>,
    #[serde(default)]
    page_number: Option<u32>,
    #[serde(default)]
    block_id: Option<u32>,
}

fn default_confidence() -> f32 {
    1.0
}

fn record_provenance(record: &TripleRecord) -> Option<Provenance> {
    let document = record.source_file.as_deref()?;
    let mut provenance = Provenance::new(document);
    if let Some(page) = record.page_number {
        provenance = provenance.with_page(page);
    }
    if let Some(block) = record.block_id {
        provenance = provenance.with_block(block.to_string());
    }
    Some(provenance)
}

async fn cmd_import(
    repo: Repository,
    embed: EmbedClient,
    path: PathBuf,
    skip_embedding: bool,
) -> Result<()> {
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    let file: TripleFile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse triple file: {}", path.display()))?;

    let mut imported = 0usize;
    let mut failed = 0usize;
    let mut new_names: Vec<String> = Vec::new();

    for (index, record) in file.triples.iter().enumerate() {
        if record.subject.trim().is_empty() || record.object.trim().is_empty() {
            eprintln!("Triple {}: empty subject or object, skipping", index + 1);
            failed += 1;
            continue;
        }

        let provenance = record_provenance(record);

        let mut subject = Entity::new(&record.subject, LayerTag::infer(&record.subject));
        let mut object = Entity::new(&record.object, LayerTag::infer(&record.object));
        if let Some(p) = &provenance {
            subject = subject.with_provenance(p.clone());
            object = object.with_provenance(p.clone());
        }

        for entity in [subject, object] {
            let canonical = entity.canonical_name.clone();
            if repo.entity_by_canonical(&canonical).await?.is_none()
                && !new_names.contains(&canonical)
            {
                new_names.push(canonical);
            }
            repo.upsert_entity(entity).await?;
        }

        let mut relation = Relation::new(
            Entity::canonicalize(&record.subject),
            &record.predicate,
            Entity::canonicalize(&record.object),
            record.confidence,
        );
        if let Some(text) = &record.source_text {
            relation = relation.with_source_text(text.clone());
        }
        if let Some(p) = provenance {
            relation = relation.with_provenance(p);
        }

        match repo.create_relation(relation).await {
            Ok(()) => imported += 1,
            Err(e) => {
                eprintln!("Triple {}: failed to store relation ({})", index + 1, e);
                failed += 1;
            }
        }
    }

    if !skip_embedding && !new_names.is_empty() {
        println!("Embedding {} new entities...", new_names.len());
        let embeddings = embed.embed_batch(&new_names, false).await?;
        for (name, embedding) in new_names.iter().zip(embeddings) {
            repo.update_entity_embedding(name, embedding).await?;
        }
    }

    println!("✓ Imported {} triples from {}", imported, path.display());
    if failed > 0 {
        println!("  • Skipped {} invalid triples", failed);
    }

    Ok(())
}

/// One community in the partition file
#[derive(Debug, Deserialize)]
struct CommunityRecord {
    community_id: i64,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    members: Vec<String>,
}

async fn cmd_communities(repo: Repository, path: PathBuf) -> Result<()> {
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    let records: Vec<CommunityRecord> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse community partition: {}", path.display()))?;

    let mut assigned = 0usize;
    let mut missing = 0usize;

    for record in &records {
        let mut community = Community::new(record.community_id, record.members.len());
        if let Some(summary) = &record.summary {
            community = community.with_summary(summary.clone());
        }
        repo.upsert_community(community).await?;

        for member in &record.members {
            let canonical = Entity::canonicalize(member);
            if repo.entity_by_canonical(&canonical).await?.is_none() {
                eprintln!("Member '{}' not found, skipping assignment", member);
                missing += 1;
                continue;
            }
            repo.assign_community(&canonical, record.community_id).await?;
            assigned += 1;
        }
    }

    println!(
        "✓ Imported {} communities, assigned {} entities",
        records.len(),
        assigned
    );
    if missing > 0 {
        println!("  • {} members were not present in the graph", missing);
    }

    Ok(())
}

async fn cmd_index_communities(repo: Repository, embed: EmbedClient) -> Result<()> {
    let pending = repo.communities_without_embeddings().await?;
    if pending.is_empty() {
        println!("All community summaries are already indexed.");
        return Ok(());
    }

    println!("Indexing {} community summaries...", pending.len());
    let summaries: Vec<String> = pending
        .iter()
        .filter_map(|c| c.summary.clone())
        .collect();
    let with_summary: Vec<&Community> = pending.iter().filter(|c| c.summary.is_some()).collect();

    let embeddings = embed.embed_batch(&summaries, false).await?;
    for (community, embedding) in with_summary.iter().zip(embeddings) {
        repo.cache_community_embedding(community.community_id, embedding)
            .await?;
    }

    let skipped = pending.len() - with_summary.len();
    println!("✓ Indexed {} community summaries", with_summary.len());
    if skipped > 0 {
        println!("  • {} communities have no summary yet", skipped);
    }

    Ok(())
}

fn build_retriever(repo: &Repository, embed: EmbedClient, top_k: usize) -> Arc<HybridRetriever> {
    let mut config = RetrievalConfig::from_env();
    config.top_k = top_k;
    Arc::new(HybridRetriever::new(
        Arc::new(SurrealSimilarityIndex::new(repo.clone())),
        Arc::new(SurrealGraphStore::new(repo.clone())),
        Arc::new(embed),
        config,
    ))
}

async fn cmd_retrieve(
    repo: Repository,
    embed: EmbedClient,
    query: String,
    limit: usize,
    hop_limit: usize,
    no_graph: bool,
) -> Result<()> {
    let retriever = build_retriever(&repo, embed, limit);
    let result = retriever
        .retrieve_with(&query, limit, hop_limit, !no_graph)
        .await?;

    if result.is_empty() {
        println!("No relevant information found.");
        return Ok(());
    }

    print!("{}", kgrag_agents::retriever::format_for_llm(&result));
    Ok(())
}

async fn cmd_stats(repo: Repository) -> Result<()> {
    let stats = repo.get_stats().await?;

    println!("Database Statistics:");
    println!("  • Entities: {}", stats.entity_count);
    println!("  • Relations: {}", stats.relation_count);
    println!("  • Communities: {}", stats.community_count);

    Ok(())
}

async fn cmd_chat(repo: Repository, embed: EmbedClient, llm: ChatClient) -> Result<()> {
    let retriever = build_retriever(&repo, embed, RetrievalConfig::from_env().top_k);
    let graph = Arc::new(SurrealGraphStore::new(repo.clone()));

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(GraphRagSearchTool::new(retriever.clone())))?;
    registry.register(Arc::new(EntityDetailsTool::new(graph.clone())))?;
    registry.register(Arc::new(RelationPathTool::new(graph, retriever.config())))?;

    let controller = ReasoningController::new(Arc::new(llm), registry, AgentConfig::from_env())?;
    let mut session = ChatSession::new();
    let mut show_trace = false;

    println!("kgrag chat - ask questions over the knowledge graph");
    println!("Commands: /reset, /trace, /quit");
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("kgrag> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }
        let line = line.trim();

        match line {
            "" => continue,
            "/quit" | "/exit" | "/q" => {
                println!("Goodbye!");
                break;
            }
            "/reset" => {
                session.reset();
                println!("Conversation history cleared.");
                continue;
            }
            "/trace" => {
                show_trace = !show_trace;
                println!("Trace display: {}", if show_trace { "on" } else { "off" });
                continue;
            }
            _ => {}
        }

        let outcome = match controller.chat(&mut session, line).await {
            Ok(outcome) => outcome,
            Err(e) => {
                println!("Error: {}", e);
                continue;
            }
        };

        match &outcome.status {
            AnswerStatus::Grounded => {
                println!("{}", outcome.answer.as_deref().unwrap_or(""));
            }
            AnswerStatus::Unsupported => {
                println!("{}", outcome.answer.as_deref().unwrap_or(""));
                println!("(No supporting evidence was retrieved for this answer.)");
            }
            AnswerStatus::Failed { reason } => {
                println!("The agent could not answer: {}", reason);
            }
        }

        if show_trace {
            println!("\nTrace {} ({} steps):", outcome.trace.trace_id, outcome.trace.len());
            for step in &outcome.trace.steps {
                println!("  {}. thought: {}", step.step, step.thought);
                match &step.action {
                    kgrag_core::AgentAction::ToolCall { tool, args } => {
                        println!("     action: {} {}", tool, args);
                    }
                    kgrag_core::AgentAction::FinalAnswer { .. } => {
                        println!("     action: final answer");
                    }
                }
                if !step.observation.is_empty() {
                    let preview: String = step.observation.chars().take(200).collect();
                    println!(
                        "     observation: {}{}",
                        preview,
                        if step.observation.chars().count() > 200 { "..." } else { "" }
                    );
                }
            }
        }

        println!();
    }

    Ok(())
}
