//! Repository pattern for database operations

use crate::{DbConnection, DbError, Result};
use kgrag_core::{Community, Entity, Provenance, Relation};
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Repository for all database operations
#[derive(Clone)]
pub struct Repository {
    db: DbConnection,
}

impl Repository {
    /// Create a new repository
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    // ==========================================
    // ENTITY OPERATIONS
    // ==========================================

    /// Create or merge an entity by canonical name.
    ///
    /// Repeated upserts of the same surface name update the display name
    /// and embedding and union the provenance lists; they never create a
    /// duplicate node.
    #[instrument(skip(self, entity))]
    pub async fn upsert_entity(&self, entity: Entity) -> Result<Entity> {
        let Entity {
            id: _,
            name,
            canonical_name,
            layer,
            community_id,
            embedding,
            provenance,
            created_at: _,
        } = entity;

        let embedding = if embedding.is_empty() {
            None
        } else {
            Some(embedding)
        };

        let result: Option<Entity> = self
            .db
            .query(
                r#"
                INSERT INTO entity (name, canonical_name, layer, community_id, embedding, provenance, created_at)
                VALUES ($name, $canonical_name, $layer, $community_id, $embedding, $provenance, time::now())
                ON DUPLICATE KEY UPDATE
                    name = $name,
                    provenance = array::union(provenance, $provenance)
            "#,
            )
            .bind(("name", name))
            .bind(("canonical_name", canonical_name))
            .bind(("layer", layer))
            .bind(("community_id", community_id))
            .bind(("embedding", embedding))
            .bind(("provenance", provenance))
            .await?
            .take(0)?;

        result.ok_or_else(|| DbError::CreateFailed("entity".into()))
    }

    /// Get an entity by canonical name
    #[instrument(skip(self))]
    pub async fn entity_by_canonical(&self, canonical_name: &str) -> Result<Option<Entity>> {
        let result: Option<Entity> = self
            .db
            .query("SELECT * FROM entity WHERE canonical_name = $canonical_name")
            .bind(("canonical_name", canonical_name.to_string()))
            .await?
            .take(0)?;

        Ok(result)
    }

    /// Fuzzy entity lookup by name fragment.
    ///
    /// Matches when the stored canonical name contains the query or the
    /// query contains the canonical name. Used to seed graph-only
    /// retrieval when the similarity index is down.
    #[instrument(skip(self))]
    pub async fn find_entities_by_name(&self, text: &str, limit: usize) -> Result<Vec<Entity>> {
        let needle = Entity::canonicalize(text);
        let results: Vec<Entity> = self
            .db
            .query(
                r#"
                SELECT * FROM entity
                WHERE string::contains($needle, canonical_name)
                   OR string::contains(canonical_name, $needle)
                LIMIT $limit
            "#,
            )
            .bind(("needle", needle))
            .bind(("limit", limit))
            .await?
            .take(0)?;

        Ok(results)
    }

    /// Update the cached embedding of an entity
    #[instrument(skip(self, embedding))]
    pub async fn update_entity_embedding(
        &self,
        canonical_name: &str,
        embedding: Vec<f32>,
    ) -> Result<()> {
        self.db
            .query("UPDATE entity SET embedding = $embedding WHERE canonical_name = $canonical_name")
            .bind(("canonical_name", canonical_name.to_string()))
            .bind(("embedding", embedding))
            .await?;

        Ok(())
    }

    /// Write the community assignment from a clustering pass onto an entity
    #[instrument(skip(self))]
    pub async fn assign_community(&self, canonical_name: &str, community_id: i64) -> Result<()> {
        self.db
            .query("UPDATE entity SET community_id = $community_id WHERE canonical_name = $canonical_name")
            .bind(("canonical_name", canonical_name.to_string()))
            .bind(("community_id", community_id))
            .await?;

        Ok(())
    }

    // ==========================================
    // RELATION OPERATIONS
    // ==========================================

    /// Create a relation edge between two entities (by canonical name).
    ///
    /// The edge is stored regardless of confidence; traversal-time
    /// filtering keeps low-confidence edges available for audit.
    #[instrument(skip(self, relation))]
    pub async fn create_relation(&self, relation: Relation) -> Result<()> {
        let subject = self
            .entity_by_canonical(&relation.subject)
            .await?
            .ok_or_else(|| DbError::NotFound("entity".into(), relation.subject.clone()))?;
        let object = self
            .entity_by_canonical(&relation.object)
            .await?
            .ok_or_else(|| DbError::NotFound("entity".into(), relation.object.clone()))?;

        let from_id = subject
            .id
            .ok_or_else(|| DbError::QueryFailed("subject entity has no id".into()))?;
        let to_id = object
            .id
            .ok_or_else(|| DbError::QueryFailed("object entity has no id".into()))?;

        self.db
            .query(
                r#"
                RELATE $from->relates->$to SET
                    predicate = $predicate,
                    rel_type = $rel_type,
                    confidence = $confidence,
                    source_text = $source_text,
                    provenance = $provenance,
                    created_at = time::now()
            "#,
            )
            .bind(("from", from_id))
            .bind(("to", to_id))
            .bind(("predicate", relation.predicate))
            .bind(("rel_type", relation.rel_type))
            .bind(("confidence", relation.confidence))
            .bind(("source_text", relation.source_text))
            .bind(("provenance", relation.provenance))
            .await?;

        Ok(())
    }

    /// All edges incident to an entity, in both directions.
    ///
    /// No confidence filtering here; the walker applies the traversal
    /// threshold.
    #[instrument(skip(self))]
    pub async fn adjacent_edges(&self, canonical_name: &str) -> Result<Vec<AdjacentEdge>> {
        let mut response = self
            .db
            .query(
                r#"
                SELECT
                    out.canonical_name AS neighbor,
                    predicate,
                    confidence,
                    provenance
                FROM relates
                WHERE in.canonical_name = $name;
                SELECT
                    in.canonical_name AS neighbor,
                    predicate,
                    confidence,
                    provenance
                FROM relates
                WHERE out.canonical_name = $name;
            "#,
            )
            .bind(("name", canonical_name.to_string()))
            .await?;

        let outbound: Vec<AdjacentEdge> = response.take(0)?;
        let inbound: Vec<AdjacentEdge> = response.take(1)?;

        let mut edges = outbound;
        edges.extend(inbound);
        Ok(edges)
    }

    /// List stored relations, including sub-threshold ones (audit view)
    #[instrument(skip(self))]
    pub async fn list_relations(&self, limit: usize) -> Result<Vec<RelationRecord>> {
        let results: Vec<RelationRecord> = self
            .db
            .query(
                r#"
                SELECT
                    in.canonical_name AS subject,
                    out.canonical_name AS object,
                    predicate,
                    rel_type,
                    confidence
                FROM relates
                LIMIT $limit
            "#,
            )
            .bind(("limit", limit))
            .await?
            .take(0)?;

        Ok(results)
    }

    // ==========================================
    // SEARCH OPERATIONS
    // ==========================================

    /// K-nearest entities by embedding
    #[instrument(skip(self, embedding))]
    pub async fn vector_search_entities(
        &self,
        embedding: Vec<f32>,
        limit: usize,
    ) -> Result<Vec<EntityHit>> {
        let results: Vec<EntityHit> = self
            .db
            .query(
                r#"
                SELECT
                    name,
                    canonical_name,
                    layer,
                    community_id,
                    provenance,
                    vector::distance::knn() AS distance
                FROM entity
                WHERE embedding <|64,COSINE|> $embedding
                LIMIT $limit
            "#,
            )
            .bind(("embedding", embedding))
            .bind(("limit", limit))
            .await?
            .take(0)?;

        Ok(results)
    }

    /// K-nearest communities by cached summary embedding
    #[instrument(skip(self, embedding))]
    pub async fn vector_search_communities(
        &self,
        embedding: Vec<f32>,
        limit: usize,
    ) -> Result<Vec<CommunityHit>> {
        let results: Vec<CommunityHit> = self
            .db
            .query(
                r#"
                SELECT
                    community_id,
                    size,
                    summary,
                    vector::distance::knn() AS distance
                FROM community
                WHERE embedding <|64,COSINE|> $embedding
                LIMIT $limit
            "#,
            )
            .bind(("embedding", embedding))
            .bind(("limit", limit))
            .await?
            .take(0)?;

        Ok(results)
    }

    // ==========================================
    // COMMUNITY OPERATIONS
    // ==========================================

    /// Create or update a community record from a clustering report
    #[instrument(skip(self, community))]
    pub async fn upsert_community(&self, community: Community) -> Result<()> {
        let Community {
            id: _,
            community_id,
            size,
            summary,
            embedding,
            created_at: _,
        } = community;

        let embedding = if embedding.is_empty() {
            None
        } else {
            Some(embedding)
        };

        let _: Option<Community> = self
            .db
            .query(
                r#"
                INSERT INTO community (community_id, size, summary, embedding, created_at)
                VALUES ($community_id, $size, $summary, $embedding, time::now())
                ON DUPLICATE KEY UPDATE
                    size = $size,
                    summary = $summary
            "#,
            )
            .bind(("community_id", community_id))
            .bind(("size", size as i64))
            .bind(("summary", summary))
            .bind(("embedding", embedding))
            .await?
            .take(0)?;

        Ok(())
    }

    /// Get a community by its partition id
    #[instrument(skip(self))]
    pub async fn community_by_id(&self, community_id: i64) -> Result<Option<Community>> {
        let result: Option<Community> = self
            .db
            .query("SELECT * FROM community WHERE community_id = $community_id")
            .bind(("community_id", community_id))
            .await?
            .take(0)?;

        Ok(result)
    }

    /// List communities without a cached summary embedding
    #[instrument(skip(self))]
    pub async fn communities_without_embeddings(&self) -> Result<Vec<Community>> {
        let results: Vec<Community> = self
            .db
            .query(
                "SELECT * FROM community WHERE summary IS NOT NONE AND (embedding IS NONE OR array::len(embedding) = 0)",
            )
            .await?
            .take(0)?;

        Ok(results)
    }

    /// Cache a community-summary embedding.
    ///
    /// Idempotent; last write wins under concurrent writers.
    #[instrument(skip(self, embedding))]
    pub async fn cache_community_embedding(
        &self,
        community_id: i64,
        embedding: Vec<f32>,
    ) -> Result<()> {
        self.db
            .query("UPDATE community SET embedding = $embedding WHERE community_id = $community_id")
            .bind(("community_id", community_id))
            .bind(("embedding", embedding))
            .await?;

        Ok(())
    }

    // ==========================================
    // STATS
    // ==========================================

    /// Get database statistics
    #[instrument(skip(self))]
    pub async fn get_stats(&self) -> Result<DbStats> {
        let stats: Vec<DbStats> = self
            .db
            .query(
                r#"
                RETURN {
                    entity_count: (SELECT count() FROM entity GROUP ALL)[0].count,
                    relation_count: (SELECT count() FROM relates GROUP ALL)[0].count,
                    community_count: (SELECT count() FROM community GROUP ALL)[0].count
                }
            "#,
            )
            .await?
            .take(0)?;

        stats
            .into_iter()
            .next()
            .ok_or_else(|| DbError::QueryFailed("stats".into()))
    }
}

// ==========================================
// RESULT TYPES
// ==========================================

/// One edge incident to an entity, as seen from that entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjacentEdge {
    /// Canonical name of the entity on the other end
    pub neighbor: String,
    pub predicate: String,
    pub confidence: f32,
    #[serde(default)]
    pub provenance: Vec<Provenance>,
}

/// Audit view of a stored relation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationRecord {
    pub subject: String,
    pub object: String,
    pub predicate: String,
    pub rel_type: String,
    pub confidence: f32,
}

/// An entity returned by vector search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityHit {
    pub name: String,
    pub canonical_name: String,
    pub layer: String,
    #[serde(default)]
    pub community_id: Option<i64>,
    #[serde(default)]
    pub provenance: Vec<Provenance>,
    /// Cosine distance from the query embedding
    pub distance: f32,
}

/// A community returned by vector search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityHit {
    pub community_id: i64,
    pub size: i64,
    #[serde(default)]
    pub summary: Option<String>,
    /// Cosine distance from the query embedding
    pub distance: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DbStats {
    #[serde(default)]
    pub entity_count: i64,
    #[serde(default)]
    pub relation_count: i64,
    #[serde(default)]
    pub community_count: i64,
}
