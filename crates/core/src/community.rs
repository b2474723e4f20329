//! Community types - clusters of entities from an external partitioning pass

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb_types::RecordId;

/// A community of entities produced by graph clustering.
///
/// Communities partition the entity set as of the last clustering run.
/// Entities added afterward carry no community id until the next run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Community {
    /// Unique identifier (SurrealDB generates this)
    pub id: Option<RecordId>,

    /// Partition element identifier from the clustering pass
    pub community_id: i64,

    /// Number of member entities at clustering time
    #[serde(default)]
    pub size: usize,

    /// Generated natural-language summary of the community
    #[serde(default)]
    pub summary: Option<String>,

    /// Cached embedding of the summary; written back idempotently,
    /// last write wins under concurrent writers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,

    /// When this community record was created
    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
}

impl Community {
    pub fn new(community_id: i64, size: usize) -> Self {
        Self {
            id: None,
            community_id,
            size,
            summary: None,
            embedding: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Builder: set summary text
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Builder: set cached summary embedding
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }
}
