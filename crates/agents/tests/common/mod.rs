//! Common test utilities

use async_trait::async_trait;
use kgrag_agents::{Embedder, Planner, PlannerDecision, Result};
use kgrag_agents::inference::ChatMessage;
use kgrag_core::{AgentAction, Entity, LayerTag, Provenance, Relation};
use kgrag_db::schema::EMBEDDING_DIMENSION;
use kgrag_db::{init_memory, Repository};
use std::sync::Mutex;

/// Create a test repository with in-memory database
pub async fn create_test_repo() -> Repository {
    let db = init_memory().await.expect("Failed to create test database");
    Repository::new(db)
}

/// Deterministic embedding: identical texts map to identical unit
/// vectors, so a query equal to an entity name is its nearest neighbor.
pub fn embedding_for(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIMENSION];
    for (i, b) in text.bytes().enumerate() {
        v[(b as usize * 31 + i * 7) % EMBEDDING_DIMENSION] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

pub struct HashEmbedder;

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str, _is_query: bool) -> Result<Vec<f32>> {
        Ok(embedding_for(text))
    }
}

/// Embedder that always fails, for degraded-mode tests
pub struct DownEmbedder;

#[async_trait]
impl Embedder for DownEmbedder {
    async fn embed(&self, _text: &str, _is_query: bool) -> Result<Vec<f32>> {
        Err(kgrag_agents::AgentError::Transient(
            "embedding service down".into(),
        ))
    }
}

/// Planner replaying a fixed decision script
pub struct ScriptedPlanner {
    script: Mutex<Vec<PlannerDecision>>,
}

impl ScriptedPlanner {
    pub fn new(decisions: Vec<PlannerDecision>) -> Self {
        Self {
            script: Mutex::new(decisions),
        }
    }

    pub fn tool_call(tool: &str, args: serde_json::Value) -> PlannerDecision {
        PlannerDecision {
            thought: format!("call {}", tool),
            action: AgentAction::ToolCall {
                tool: tool.to_string(),
                args,
            },
        }
    }

    pub fn final_answer(answer: &str) -> PlannerDecision {
        PlannerDecision {
            thought: "answer".to_string(),
            action: AgentAction::FinalAnswer {
                answer: answer.to_string(),
            },
        }
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn decide(&self, _messages: &[ChatMessage]) -> Result<PlannerDecision> {
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            return Ok(ScriptedPlanner::final_answer("script exhausted"));
        }
        Ok(script.remove(0))
    }
}

/// Seed a small startup-advice graph with embeddings:
/// 融资策略 -[帮助]-> demo day -[促进]-> 创业者成功
pub async fn seed_graph(repo: &Repository) {
    let provenance = Provenance::new("startup-notes.pdf").with_page(12);

    for (name, layer) in [
        ("融资策略", LayerTag::Concept),
        ("demo day", LayerTag::Process),
        ("创业者成功", LayerTag::Concept),
    ] {
        let entity = Entity::new(name, layer).with_provenance(provenance.clone());
        repo.upsert_entity(entity).await.expect("Failed to upsert entity");
        repo.update_entity_embedding(&Entity::canonicalize(name), embedding_for(name))
            .await
            .expect("Failed to store embedding");
    }

    let relations = [
        ("融资策略", "帮助", "demo day", 0.8),
        ("demo day", "促进", "创业者成功", 0.7),
    ];
    for (subject, predicate, object, confidence) in relations {
        let relation = Relation::new(
            Entity::canonicalize(subject),
            predicate,
            Entity::canonicalize(object),
            confidence,
        )
        .with_provenance(provenance.clone());
        repo.create_relation(relation).await.expect("Failed to create relation");
    }
}
