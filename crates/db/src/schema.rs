//! SurrealDB schema definitions

use crate::{DbConnection, Result};
use tracing::info;

/// Embedding dimension (Jina v3 default: 1024)
pub const EMBEDDING_DIMENSION: usize = 1024;

/// Initialize the database schema
pub async fn initialize_schema(db: &DbConnection) -> Result<()> {
    info!("Initializing database schema...");

    // Define tables and fields
    db.query(SCHEMA_DEFINITION).await?;

    info!("Schema initialized successfully");
    Ok(())
}

const SCHEMA_DEFINITION: &str = r#"
-- ============================================
-- TABLES
-- ============================================

-- Entities table
DEFINE TABLE entity SCHEMAFULL;
DEFINE FIELD name ON entity TYPE string;
DEFINE FIELD canonical_name ON entity TYPE string;
DEFINE FIELD layer ON entity TYPE string DEFAULT 'concept';
DEFINE FIELD community_id ON entity TYPE option<int>;
DEFINE FIELD embedding ON entity TYPE option<array<float>>;
DEFINE FIELD provenance ON entity FLEXIBLE TYPE array DEFAULT [];
DEFINE FIELD created_at ON entity TYPE datetime DEFAULT time::now();

-- Communities table
DEFINE TABLE community SCHEMAFULL;
DEFINE FIELD community_id ON community TYPE int;
DEFINE FIELD size ON community TYPE int DEFAULT 0;
DEFINE FIELD summary ON community TYPE option<string>;
DEFINE FIELD embedding ON community TYPE option<array<float>>;
DEFINE FIELD created_at ON community TYPE datetime DEFAULT time::now();

-- ============================================
-- GRAPH EDGE TABLES
-- ============================================

-- Entity-to-entity relations with extraction provenance.
-- Low-confidence edges are stored too; traversal filters them.
DEFINE TABLE relates SCHEMAFULL;
DEFINE FIELD in ON relates TYPE record<entity>;
DEFINE FIELD out ON relates TYPE record<entity>;
DEFINE FIELD predicate ON relates TYPE string;
DEFINE FIELD rel_type ON relates TYPE string DEFAULT 'related_to';
DEFINE FIELD confidence ON relates TYPE float DEFAULT 0.0;
DEFINE FIELD source_text ON relates TYPE option<string>;
DEFINE FIELD provenance ON relates FLEXIBLE TYPE array DEFAULT [];
DEFINE FIELD created_at ON relates TYPE datetime DEFAULT time::now();

-- ============================================
-- INDEXES
-- ============================================

-- Entities are merged on canonical name, never duplicated
DEFINE INDEX idx_entity_canonical ON entity FIELDS canonical_name UNIQUE;
DEFINE INDEX idx_entity_layer ON entity FIELDS layer;
DEFINE INDEX idx_entity_community ON entity FIELDS community_id;

-- One record per partition element
DEFINE INDEX idx_community_id ON community FIELDS community_id UNIQUE;

-- Vector indexes for semantic search (HNSW for performance)
DEFINE INDEX idx_entity_embedding ON entity FIELDS embedding
    HNSW DIMENSION 1024 DIST COSINE;

DEFINE INDEX idx_community_embedding ON community FIELDS embedding
    HNSW DIMENSION 1024 DIST COSINE;
"#;
