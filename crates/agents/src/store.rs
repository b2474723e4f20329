//! Thin clients over the similarity index and the graph store
//!
//! Both backends are externally managed and concurrently read; these
//! adapters take no locks. The only mutation is the community-embedding
//! write-back, which is idempotent (last write wins).

use crate::Result;
use async_trait::async_trait;
use kgrag_core::Entity;
use kgrag_db::repository::{AdjacentEdge, CommunityHit, EntityHit};
use kgrag_db::Repository;

/// Nearest-neighbor queries against the vector store
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    async fn search_entities(&self, embedding: Vec<f32>, k: usize) -> Result<Vec<EntityHit>>;

    async fn search_communities(&self, embedding: Vec<f32>, k: usize) -> Result<Vec<CommunityHit>>;

    /// Upsert a cached community-summary embedding
    async fn upsert_community_embedding(
        &self,
        community_id: i64,
        embedding: Vec<f32>,
    ) -> Result<()>;
}

/// Read access to the property graph
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// All edges incident to an entity, unfiltered by confidence
    async fn edges_from(&self, canonical_name: &str) -> Result<Vec<AdjacentEdge>>;

    async fn entity(&self, canonical_name: &str) -> Result<Option<Entity>>;

    /// Exact/fuzzy name match, used to seed graph-only retrieval when
    /// the similarity index is down
    async fn find_entities_by_name(&self, text: &str, limit: usize) -> Result<Vec<Entity>>;

    async fn community_summary(&self, community_id: i64) -> Result<Option<String>>;
}

/// SurrealDB-backed similarity index
#[derive(Clone)]
pub struct SurrealSimilarityIndex {
    repo: Repository,
}

impl SurrealSimilarityIndex {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl SimilarityIndex for SurrealSimilarityIndex {
    async fn search_entities(&self, embedding: Vec<f32>, k: usize) -> Result<Vec<EntityHit>> {
        Ok(self.repo.vector_search_entities(embedding, k).await?)
    }

    async fn search_communities(&self, embedding: Vec<f32>, k: usize) -> Result<Vec<CommunityHit>> {
        Ok(self.repo.vector_search_communities(embedding, k).await?)
    }

    async fn upsert_community_embedding(
        &self,
        community_id: i64,
        embedding: Vec<f32>,
    ) -> Result<()> {
        Ok(self
            .repo
            .cache_community_embedding(community_id, embedding)
            .await?)
    }
}

/// SurrealDB-backed graph store
#[derive(Clone)]
pub struct SurrealGraphStore {
    repo: Repository,
}

impl SurrealGraphStore {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl GraphStore for SurrealGraphStore {
    async fn edges_from(&self, canonical_name: &str) -> Result<Vec<AdjacentEdge>> {
        Ok(self.repo.adjacent_edges(canonical_name).await?)
    }

    async fn entity(&self, canonical_name: &str) -> Result<Option<Entity>> {
        Ok(self.repo.entity_by_canonical(canonical_name).await?)
    }

    async fn find_entities_by_name(&self, text: &str, limit: usize) -> Result<Vec<Entity>> {
        Ok(self.repo.find_entities_by_name(text, limit).await?)
    }

    async fn community_summary(&self, community_id: i64) -> Result<Option<String>> {
        Ok(self
            .repo
            .community_by_id(community_id)
            .await?
            .and_then(|c| c.summary))
    }
}
