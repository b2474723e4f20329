//! Relation types - directed, labeled edges between entities

use crate::Provenance;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb_types::RecordId;

/// Normalized relation labels used for traversal and display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Helps,
    Promotes,
    Influences,
    Requires,
    Produces,
    Prevents,
    Contains,
    BelongsTo,
    ConsistsOf,
    Regrets,
    /// Fallback for predicates with no specific mapping
    RelatedTo,
}

impl RelationType {
    /// Normalize a surface predicate to a relation type.
    ///
    /// Unmapped predicates fall back to `RelatedTo`; the surface form is
    /// still kept on the relation for display.
    pub fn from_predicate(predicate: &str) -> Self {
        match predicate.trim() {
            "帮助" | "helps" => RelationType::Helps,
            "促进" | "promotes" => RelationType::Promotes,
            "影响" | "influences" => RelationType::Influences,
            "需要" | "requires" => RelationType::Requires,
            "产生" | "produces" => RelationType::Produces,
            "阻止" | "prevents" => RelationType::Prevents,
            "包含" | "contains" => RelationType::Contains,
            "属于" | "belongs_to" => RelationType::BelongsTo,
            "组成" | "consists_of" => RelationType::ConsistsOf,
            "后悔" | "regrets" => RelationType::Regrets,
            _ => RelationType::RelatedTo,
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelationType::Helps => write!(f, "helps"),
            RelationType::Promotes => write!(f, "promotes"),
            RelationType::Influences => write!(f, "influences"),
            RelationType::Requires => write!(f, "requires"),
            RelationType::Produces => write!(f, "produces"),
            RelationType::Prevents => write!(f, "prevents"),
            RelationType::Contains => write!(f, "contains"),
            RelationType::BelongsTo => write!(f, "belongs_to"),
            RelationType::ConsistsOf => write!(f, "consists_of"),
            RelationType::Regrets => write!(f, "regrets"),
            RelationType::RelatedTo => write!(f, "related_to"),
        }
    }
}

/// A directed edge in the knowledge graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    /// Unique identifier (SurrealDB generates this)
    pub id: Option<RecordId>,

    /// Canonical name of the subject entity
    pub subject: String,

    /// Canonical name of the object entity
    pub object: String,

    /// Surface predicate as extracted (e.g. "帮助")
    pub predicate: String,

    /// Normalized relation label
    pub rel_type: RelationType,

    /// Extraction confidence in [0, 1]. Edges below the configured
    /// traversal threshold are skipped during graph walks but retained
    /// for audit.
    pub confidence: f32,

    /// The text span this relation was extracted from
    #[serde(default)]
    pub source_text: Option<String>,

    /// Where this relation was extracted from
    #[serde(default)]
    pub provenance: Vec<Provenance>,

    /// When this relation was created
    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
}

impl Relation {
    /// Create a new relation; confidence is clamped to [0, 1]
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
        confidence: f32,
    ) -> Self {
        let predicate = predicate.into();
        let rel_type = RelationType::from_predicate(&predicate);
        Self {
            id: None,
            subject: subject.into(),
            object: object.into(),
            predicate,
            rel_type,
            confidence: confidence.clamp(0.0, 1.0),
            source_text: None,
            provenance: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Builder: set source text span
    pub fn with_source_text(mut self, text: impl Into<String>) -> Self {
        self.source_text = Some(text.into());
        self
    }

    /// Builder: add a provenance reference
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance.push(provenance);
        self
    }
}
