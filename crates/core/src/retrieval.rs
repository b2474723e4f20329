//! Retrieval result types - candidates, paths, and the assembled result

use crate::Provenance;
use serde::{Deserialize, Serialize};

/// What kind of thing a retrieval candidate refers to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    Entity,
    Community,
    Path,
}

/// A scored reference produced by hybrid retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    /// Canonical entity name or community id string
    pub id: String,

    pub kind: CandidateKind,

    /// Fused score after normalization and weighting
    pub score: f32,

    /// Raw vector-similarity score, if this candidate appeared in the
    /// vector ranking
    #[serde(default)]
    pub vector_score: Option<f32>,

    /// Raw graph-proximity score, if this candidate appeared in the
    /// graph ranking
    #[serde(default)]
    pub graph_score: Option<f32>,

    /// Community summary text for community candidates
    #[serde(default)]
    pub summary: Option<String>,

    /// Source documents justifying this candidate
    #[serde(default)]
    pub provenance: Vec<Provenance>,
}

/// A simple path through the graph, collected by the reasoning walker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphPath {
    /// Entity canonical names along the path, seed first
    pub nodes: Vec<String>,

    /// Predicate label for each traversed edge (`nodes.len() - 1` entries)
    pub predicates: Vec<String>,

    /// Product of edge confidences along the path; 1.0 for a bare seed
    pub cumulative_confidence: f32,
}

impl GraphPath {
    /// A zero-hop path containing only the seed entity
    pub fn seed(entity: impl Into<String>) -> Self {
        Self {
            nodes: vec![entity.into()],
            predicates: Vec::new(),
            cumulative_confidence: 1.0,
        }
    }

    /// The entity the path ends at
    pub fn terminal(&self) -> &str {
        self.nodes.last().map(String::as_str).unwrap_or_default()
    }

    /// Number of edges traversed
    pub fn hops(&self) -> usize {
        self.predicates.len()
    }
}

impl std::fmt::Display for GraphPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::with_capacity(self.nodes.len() * 2);
        for (i, node) in self.nodes.iter().enumerate() {
            if i > 0 {
                parts.push(format!("-[{}]->", self.predicates[i - 1]));
            }
            parts.push(node.clone());
        }
        write!(f, "{}", parts.join(" "))
    }
}

/// The assembled output of one hybrid retrieval call.
///
/// An empty result means "no evidence found" and is not an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// The query that produced this result
    pub query: String,

    /// Ranked entity candidates
    pub entities: Vec<RetrievalCandidate>,

    /// Ranked community candidates with summaries
    pub communities: Vec<RetrievalCandidate>,

    /// Multi-hop paths from the graph walker
    pub paths: Vec<GraphPath>,

    /// Deduplicated source citations across all candidates
    pub sources: Vec<Provenance>,

    /// Set when the graph signal was unavailable and the result is
    /// vector-only (or the other way around)
    #[serde(default)]
    pub degraded: bool,
}

impl RetrievalResult {
    pub fn empty(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// True when retrieval found no evidence at all
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.communities.is_empty() && self.paths.is_empty()
    }
}
