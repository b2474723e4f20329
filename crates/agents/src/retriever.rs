//! Hybrid retrieval: vector similarity fused with graph proximity.
//!
//! Both signals run concurrently against their backends. Either backend
//! may be down; retrieval degrades to the surviving signal and only
//! fails when neither can produce candidates.

use crate::config::RetrievalConfig;
use crate::fusion;
use crate::inference::Embedder;
use crate::store::{GraphStore, SimilarityIndex};
use crate::walker::{self, GraphSignal, WalkerConfig};
use crate::{AgentError, Result};
use kgrag_core::{CandidateKind, Provenance, RetrievalCandidate, RetrievalResult};
use kgrag_db::repository::{CommunityHit, EntityHit};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// The retrieval engine behind `graph_rag_search`
pub struct HybridRetriever {
    index: Arc<dyn SimilarityIndex>,
    graph: Arc<dyn GraphStore>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(
        index: Arc<dyn SimilarityIndex>,
        graph: Arc<dyn GraphStore>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
    ) -> Self {
        Self { index, graph, embedder, config }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Run hybrid retrieval for a natural-language query with the
    /// configured limits and graph reasoning enabled.
    pub async fn retrieve(&self, query: &str) -> Result<RetrievalResult> {
        self.retrieve_with(query, self.config.top_k, self.config.hop_limit, true)
            .await
    }

    /// Run hybrid retrieval with per-call limits.
    ///
    /// With `include_graph_reasoning` off, the graph walk is skipped and
    /// candidates come from the vector signal alone. An empty result means
    /// the stores answered but nothing relevant was found;
    /// `Err(RetrievalUnavailable)` means neither signal could run.
    #[instrument(skip(self), fields(query_len = query.len()))]
    pub async fn retrieve_with(
        &self,
        query: &str,
        top_k: usize,
        hop_limit: usize,
        include_graph_reasoning: bool,
    ) -> Result<RetrievalResult> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AgentError::InvalidArgument("query must not be empty".into()));
        }

        let mut degraded = false;

        // Vector signal: embed, then both similarity searches concurrently
        let (entity_hits, community_hits) = match self.embedder.embed(query, true).await {
            Ok(embedding) => {
                let (entities, communities) = tokio::join!(
                    self.index.search_entities(embedding.clone(), top_k),
                    self.index.search_communities(embedding, self.config.community_top_k),
                );
                let mut entities = entities.unwrap_or_else(|e| {
                    warn!("Entity similarity search failed: {}", e);
                    degraded = true;
                    Vec::new()
                });
                let mut communities = communities.unwrap_or_else(|e| {
                    warn!("Community similarity search failed: {}", e);
                    degraded = true;
                    Vec::new()
                });
                // KNN returns the nearest k no matter how far; gate on
                // raw similarity so irrelevant hits do not seed the walk
                entities.retain(|h| 1.0 - h.distance >= self.config.min_vector_similarity);
                communities.retain(|h| 1.0 - h.distance >= self.config.min_vector_similarity);
                (entities, communities)
            }
            Err(e) => {
                warn!("Query embedding failed, vector signal unavailable: {}", e);
                degraded = true;
                (Vec::new(), Vec::new())
            }
        };

        // Seeds come from vector hits; with the vector signal down, fall
        // back to name matching so the graph can still be walked
        let seeds: Vec<String> = if entity_hits.is_empty() {
            match self.graph.find_entities_by_name(query, top_k).await {
                Ok(entities) => entities.into_iter().map(|e| e.canonical_name).collect(),
                Err(e) => {
                    if degraded {
                        return Err(AgentError::RetrievalUnavailable(format!(
                            "both similarity index and graph store failed: {}",
                            e
                        )));
                    }
                    warn!("Name-based seeding failed: {}", e);
                    degraded = true;
                    Vec::new()
                }
            }
        } else {
            entity_hits.iter().map(|h| h.canonical_name.clone()).collect()
        };

        let name_seeded = entity_hits.is_empty() && !seeds.is_empty();

        let signal = if include_graph_reasoning {
            let mut walker_config = WalkerConfig::from(&self.config);
            walker_config.hop_limit = hop_limit;
            walker::walk(self.graph.as_ref(), &seeds, &walker_config).await
        } else {
            GraphSignal::default()
        };
        if signal.degraded {
            if entity_hits.is_empty() && community_hits.is_empty() {
                return Err(AgentError::RetrievalUnavailable(
                    "both similarity index and graph store failed".into(),
                ));
            }
            degraded = true;
        }

        let vector_ranking = vector_ranking(&entity_hits);
        let name_seeds: &[String] = if name_seeded { &seeds } else { &[] };
        let graph_ranking = graph_ranking(name_seeds, &signal);

        // With one signal empty, fusion degenerates to the other; the
        // weights below keep the surviving signal at full strength
        let (vector_weight, graph_weight) = if vector_ranking.is_empty() {
            (0.0, 1.0)
        } else if graph_ranking.is_empty() {
            (1.0, 0.0)
        } else {
            (self.config.vector_weight, self.config.graph_weight)
        };

        let fused = fusion::fuse(
            &vector_ranking,
            &graph_ranking,
            vector_weight,
            graph_weight,
            top_k,
        );

        let relevant = fused
            .iter()
            .any(|c| c.score >= self.config.min_fused_score);
        if !relevant && community_hits.is_empty() {
            debug!("No candidate above min fused score, returning empty result");
            let mut result = RetrievalResult::empty(query);
            result.degraded = degraded;
            return Ok(result);
        }

        let hits_by_name: HashMap<&str, &EntityHit> = entity_hits
            .iter()
            .map(|h| (h.canonical_name.as_str(), h))
            .collect();

        let mut sources: Vec<Provenance> = Vec::new();
        let mut entities = Vec::with_capacity(fused.len());
        for candidate in &fused {
            if candidate.score < self.config.min_fused_score {
                continue;
            }

            let mut provenance = Vec::new();
            let mut summary = None;
            if let Some(hit) = hits_by_name.get(candidate.id.as_str()) {
                summary = Some(format!("{} ({})", hit.name, hit.layer));
                provenance = hit.provenance.clone();
            } else if let Ok(Some(entity)) = self.graph.entity(&candidate.id).await {
                summary = Some(format!("{} ({})", entity.name, entity.layer));
                provenance = entity.provenance;
            }

            // Every returned candidate must be traceable to a source
            if provenance.is_empty() {
                debug!("Dropping candidate without provenance: {}", candidate.id);
                continue;
            }

            for p in &provenance {
                if !sources.iter().any(|q| q.key() == p.key()) {
                    sources.push(p.clone());
                }
            }

            entities.push(RetrievalCandidate {
                id: candidate.id.clone(),
                kind: CandidateKind::Entity,
                score: candidate.score,
                vector_score: candidate.vector_score,
                graph_score: candidate.graph_score,
                summary,
                provenance,
            });
        }

        for p in &signal.provenance {
            if !sources.iter().any(|q| q.key() == p.key()) {
                sources.push(p.clone());
            }
        }

        let communities = community_candidates(&community_hits);

        let mut paths = signal.paths;
        paths.sort_by(|a, b| {
            b.cumulative_confidence
                .total_cmp(&a.cumulative_confidence)
                .then_with(|| a.nodes.cmp(&b.nodes))
        });

        Ok(RetrievalResult {
            query: query.to_string(),
            entities,
            communities,
            paths,
            sources,
            degraded,
        })
    }
}

/// Cosine distance from the index becomes a similarity in [0, 1]
fn vector_ranking(hits: &[EntityHit]) -> Vec<(String, f32)> {
    hits.iter()
        .map(|h| (h.canonical_name.clone(), (1.0 - h.distance).clamp(0.0, 1.0)))
        .collect()
}

/// Graph proximity per entity: the best cumulative confidence among
/// paths that end at it. `name_seeds` (non-empty only when seeding fell
/// back to name matching) score 1.0 so exact matches survive fusion
/// when the vector signal is down.
fn graph_ranking(name_seeds: &[String], signal: &GraphSignal) -> Vec<(String, f32)> {
    let mut best: HashMap<String, f32> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for seed in name_seeds {
        if !best.contains_key(seed) {
            order.push(seed.clone());
        }
        best.entry(seed.clone()).or_insert(1.0);
    }

    for path in &signal.paths {
        let terminal = path.terminal().to_string();
        match best.get_mut(&terminal) {
            Some(score) => {
                if path.cumulative_confidence > *score {
                    *score = path.cumulative_confidence;
                }
            }
            None => {
                order.push(terminal.clone());
                best.insert(terminal, path.cumulative_confidence);
            }
        }
    }

    order
        .into_iter()
        .map(|id| {
            let score = best[&id];
            (id, score)
        })
        .collect()
}

fn community_candidates(hits: &[CommunityHit]) -> Vec<RetrievalCandidate> {
    hits.iter()
        .map(|h| RetrievalCandidate {
            id: format!("community:{}", h.community_id),
            kind: CandidateKind::Community,
            score: (1.0 - h.distance).clamp(0.0, 1.0),
            vector_score: Some((1.0 - h.distance).clamp(0.0, 1.0)),
            graph_score: None,
            summary: h.summary.clone(),
            provenance: Vec::new(),
        })
        .collect()
}

/// Render a retrieval result as the observation text handed back to the
/// planning model. Community summaries lead (broad context), then
/// entities, then reasoning paths, then sources; stable order
/// throughout.
pub fn format_for_llm(result: &RetrievalResult) -> String {
    if result.is_empty() {
        return "No relevant information found in the knowledge graph.".to_string();
    }

    let mut out = String::new();

    if !result.communities.is_empty() {
        out.push_str("Community summaries:\n");
        for candidate in &result.communities {
            if let Some(summary) = &candidate.summary {
                out.push_str(&format!("- {}\n", summary));
            }
        }
    }

    if !result.entities.is_empty() {
        out.push_str("\nRelevant entities:\n");
        for candidate in &result.entities {
            let label = candidate.summary.as_deref().unwrap_or(&candidate.id);
            out.push_str(&format!("- {} [score {:.3}]\n", label, candidate.score));
        }
    }

    if !result.paths.is_empty() {
        out.push_str("\nReasoning paths:\n");
        for path in &result.paths {
            out.push_str(&format!(
                "- {} [confidence {:.3}]\n",
                path, path.cumulative_confidence
            ));
        }
    }

    if !result.sources.is_empty() {
        out.push_str("\nSources:\n");
        for source in &result.sources {
            out.push_str(&format!("- {}\n", source));
        }
    }

    if result.degraded {
        out.push_str("\n(Partial results: one retrieval backend was unavailable.)\n");
    }

    out
}
