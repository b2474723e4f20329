//! Entity types - nodes in the knowledge graph

use crate::Provenance;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb_types::RecordId;

/// The semantic layer an entity belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LayerTag {
    /// Materials, substances, raw components
    Material,
    /// Devices, instruments, modules
    Device,
    /// Systems, platforms, architectures
    System,
    /// Applications, scenarios, use cases
    Application,
    /// Concepts, theories, strategies
    Concept,
    /// Processes, procedures, stages
    Process,
}

impl Default for LayerTag {
    fn default() -> Self {
        Self::Concept
    }
}

impl std::fmt::Display for LayerTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayerTag::Material => write!(f, "material"),
            LayerTag::Device => write!(f, "device"),
            LayerTag::System => write!(f, "system"),
            LayerTag::Application => write!(f, "application"),
            LayerTag::Concept => write!(f, "concept"),
            LayerTag::Process => write!(f, "process"),
        }
    }
}

impl LayerTag {
    /// Infer the layer from keywords in an entity name; unmatched names
    /// default to the concept layer.
    pub fn infer(name: &str) -> Self {
        const RULES: &[(LayerTag, &[&str])] = &[
            (
                LayerTag::Material,
                &["材料", "物质", "化学", "元素", "原料", "成分"],
            ),
            (
                LayerTag::Device,
                &["设备", "器件", "装置", "组件", "模块"],
            ),
            (
                LayerTag::System,
                &["系统", "平台", "架构", "框架", "网络"],
            ),
            (
                LayerTag::Application,
                &["应用", "场景", "案例", "实践", "使用"],
            ),
            (
                LayerTag::Concept,
                &["概念", "理论", "策略", "方法", "思想", "原则", "融资", "投资", "决策"],
            ),
            (
                LayerTag::Process,
                &["流程", "过程", "步骤", "阶段", "程序", "路演", "demo day"],
            ),
        ];

        let lowered = name.to_lowercase();
        for (layer, keywords) in RULES {
            if keywords.iter().any(|k| lowered.contains(k)) {
                return *layer;
            }
        }
        LayerTag::Concept
    }
}

impl std::str::FromStr for LayerTag {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "material" => Ok(LayerTag::Material),
            "device" => Ok(LayerTag::Device),
            "system" => Ok(LayerTag::System),
            "application" => Ok(LayerTag::Application),
            "concept" => Ok(LayerTag::Concept),
            "process" => Ok(LayerTag::Process),
            other => Err(crate::CoreError::Validation(format!(
                "unknown layer tag: {}",
                other
            ))),
        }
    }
}

/// An entity in the knowledge graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier
    pub id: Option<RecordId>,

    /// Display name (surface form)
    #[serde(default)]
    pub name: String,

    /// Canonical/normalized name, unique per graph; repeated extraction
    /// of the same surface name merges into one entity
    #[serde(default)]
    pub canonical_name: String,

    /// Semantic layer tag
    #[serde(default)]
    pub layer: LayerTag,

    /// Community assignment from the last clustering run, if any.
    /// Entities added after that run have no community.
    #[serde(default)]
    pub community_id: Option<i64>,

    /// Vector embedding of the entity name/description
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,

    /// Where this entity was extracted from
    #[serde(default)]
    pub provenance: Vec<Provenance>,

    /// When first seen
    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
}

impl Entity {
    /// Create a new entity
    pub fn new(name: impl Into<String>, layer: LayerTag) -> Self {
        let name = name.into();
        let canonical = Self::canonicalize(&name);
        Self {
            id: None,
            name,
            canonical_name: canonical,
            layer,
            community_id: None,
            embedding: Vec::new(),
            provenance: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Canonicalize a name for deduplication
    pub fn canonicalize(name: &str) -> String {
        name.to_lowercase()
            .trim()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Builder: set embedding
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    /// Builder: add a provenance reference
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance.push(provenance);
        self
    }

    /// Builder: set community assignment
    pub fn with_community(mut self, community_id: i64) -> Self {
        self.community_id = Some(community_id);
        self
    }
}
