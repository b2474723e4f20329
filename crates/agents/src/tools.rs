//! Tools exposed to the planning model.
//!
//! Dispatch is by tag: the planner names a tool, the registry resolves
//! it. Registration is validated at startup so an unknown or duplicate
//! tool name is a construction error, not a runtime surprise.

use crate::config::RetrievalConfig;
use crate::retriever::{self, HybridRetriever};
use crate::store::GraphStore;
use crate::walker::{self, WalkerConfig};
use crate::{AgentError, Result};
use async_trait::async_trait;
use kgrag_core::Entity;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

/// What a tool hands back to the reasoning loop
#[derive(Debug, Clone)]
pub struct ToolObservation {
    pub content: String,
    /// True when the observation carries retrieved evidence, as opposed
    /// to a "nothing found" notice. Drives the grounded/unsupported
    /// verdict on the final answer.
    pub has_evidence: bool,
}

impl ToolObservation {
    pub fn evidence(content: impl Into<String>) -> Self {
        Self { content: content.into(), has_evidence: true }
    }

    pub fn no_evidence(content: impl Into<String>) -> Self {
        Self { content: content.into(), has_evidence: false }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON schema of the argument object, shown to the planner
    fn parameters(&self) -> Value;

    async fn invoke(&self, args: &Value) -> Result<ToolObservation>;
}

/// Name-keyed tool set handed to the controller
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, rejecting duplicates and empty metadata.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name();
        if name.is_empty() || tool.description().is_empty() {
            return Err(AgentError::InvalidArgument(
                "tool name and description must be non-empty".into(),
            ));
        }
        if self.tools.contains_key(name) {
            return Err(AgentError::InvalidArgument(format!(
                "duplicate tool name: {}",
                name
            )));
        }
        self.tools.insert(name.to_string(), tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|k| k.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Render the tool catalog for the planner's system prompt
    pub fn describe(&self) -> String {
        self.tools
            .values()
            .map(|tool| {
                format!(
                    "- {}: {}\n  args schema: {}",
                    tool.name(),
                    tool.description(),
                    tool.parameters()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            AgentError::InvalidArgument(format!("missing or empty required argument: {}", key))
        })
}

/// Hybrid graph + vector search over the knowledge base
pub struct GraphRagSearchTool {
    retriever: Arc<HybridRetriever>,
}

impl GraphRagSearchTool {
    pub fn new(retriever: Arc<HybridRetriever>) -> Self {
        Self { retriever }
    }
}

#[async_trait]
impl Tool for GraphRagSearchTool {
    fn name(&self) -> &'static str {
        "graph_rag_search"
    }

    fn description(&self) -> &'static str {
        "Search the knowledge graph for entities, relationships, reasoning paths and community summaries relevant to a natural-language query."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": { "type": "string", "description": "natural-language search query" }
            }
        })
    }

    #[instrument(skip_all)]
    async fn invoke(&self, args: &Value) -> Result<ToolObservation> {
        let query = required_str(args, "query")?;
        let result = self.retriever.retrieve(query).await?;
        if result.is_empty() {
            return Ok(ToolObservation::no_evidence(
                "No relevant information found in the knowledge graph.",
            ));
        }
        Ok(ToolObservation::evidence(retriever::format_for_llm(&result)))
    }
}

/// Direct lookup of one entity: layer, community, neighbors, sources
pub struct EntityDetailsTool {
    graph: Arc<dyn GraphStore>,
}

impl EntityDetailsTool {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self { graph }
    }

    async fn resolve(&self, name: &str) -> Result<Option<Entity>> {
        let canonical = Entity::canonicalize(name);
        if let Some(entity) = self.graph.entity(&canonical).await? {
            return Ok(Some(entity));
        }
        // Fall back to fuzzy matching for partial names
        let matches = self.graph.find_entities_by_name(name, 1).await?;
        Ok(matches.into_iter().next())
    }
}

#[async_trait]
impl Tool for EntityDetailsTool {
    fn name(&self) -> &'static str {
        "get_entity_details"
    }

    fn description(&self) -> &'static str {
        "Get everything known about one entity: its layer, community summary, direct relationships and source documents."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "required": ["entity_name"],
            "properties": {
                "entity_name": { "type": "string", "description": "name of the entity to inspect" }
            }
        })
    }

    #[instrument(skip_all)]
    async fn invoke(&self, args: &Value) -> Result<ToolObservation> {
        let name = required_str(args, "entity_name")?;

        let entity = match self.resolve(name).await? {
            Some(entity) => entity,
            None => {
                return Ok(ToolObservation::no_evidence(format!(
                    "Entity '{}' not found in the knowledge graph.",
                    name
                )))
            }
        };

        let mut out = format!("Entity: {} (layer: {})\n", entity.name, entity.layer);

        if let Some(community_id) = entity.community_id {
            match self.graph.community_summary(community_id).await? {
                Some(summary) => {
                    out.push_str(&format!("Community {}: {}\n", community_id, summary))
                }
                None => out.push_str(&format!("Community: {}\n", community_id)),
            }
        }

        let edges = self.graph.edges_from(&entity.canonical_name).await?;
        if edges.is_empty() {
            out.push_str("No direct relationships.\n");
        } else {
            out.push_str("Relationships:\n");
            for edge in &edges {
                out.push_str(&format!(
                    "- {} -[{}]-> {} (confidence {:.2})\n",
                    entity.canonical_name, edge.predicate, edge.neighbor, edge.confidence
                ));
            }
        }

        if !entity.provenance.is_empty() {
            out.push_str("Sources:\n");
            for source in &entity.provenance {
                out.push_str(&format!("- {}\n", source));
            }
        }

        Ok(ToolObservation::evidence(out))
    }
}

/// Bounded path search between two named entities
pub struct RelationPathTool {
    graph: Arc<dyn GraphStore>,
    config: WalkerConfig,
}

impl RelationPathTool {
    pub fn new(graph: Arc<dyn GraphStore>, config: &RetrievalConfig) -> Self {
        Self { graph, config: WalkerConfig::from(config) }
    }
}

#[async_trait]
impl Tool for RelationPathTool {
    fn name(&self) -> &'static str {
        "find_relationship_path"
    }

    fn description(&self) -> &'static str {
        "Find how two entities are connected: the shortest confident relationship paths between them, within the hop limit."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "required": ["entity1", "entity2"],
            "properties": {
                "entity1": { "type": "string", "description": "start entity name" },
                "entity2": { "type": "string", "description": "end entity name" }
            }
        })
    }

    #[instrument(skip_all)]
    async fn invoke(&self, args: &Value) -> Result<ToolObservation> {
        let from = Entity::canonicalize(required_str(args, "entity1")?);
        let to = Entity::canonicalize(required_str(args, "entity2")?);
        if from == to {
            return Err(AgentError::InvalidArgument(
                "entity1 and entity2 must name different entities".into(),
            ));
        }

        let paths = walker::paths_between(self.graph.as_ref(), &from, &to, &self.config).await?;
        if paths.is_empty() {
            return Ok(ToolObservation::no_evidence(format!(
                "No relationship path found between '{}' and '{}' within {} hops.",
                from, to, self.config.hop_limit
            )));
        }

        let mut out = format!("Paths between '{}' and '{}':\n", from, to);
        for path in &paths {
            out.push_str(&format!(
                "- {} [confidence {:.3}]\n",
                path, path.cumulative_confidence
            ));
        }
        Ok(ToolObservation::evidence(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgrag_core::LayerTag;
    use kgrag_db::repository::AdjacentEdge;
    use std::collections::HashMap;

    struct StubTool(&'static str);

    #[async_trait]
    impl Tool for StubTool {
        fn name(&self) -> &'static str {
            self.0
        }

        fn description(&self) -> &'static str {
            "stub"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }

        async fn invoke(&self, _args: &Value) -> Result<ToolObservation> {
            Ok(ToolObservation::evidence("ok"))
        }
    }

    struct MapGraph {
        entities: Vec<Entity>,
        edges: HashMap<String, Vec<AdjacentEdge>>,
        summaries: HashMap<i64, String>,
    }

    #[async_trait]
    impl GraphStore for MapGraph {
        async fn edges_from(&self, canonical_name: &str) -> Result<Vec<AdjacentEdge>> {
            Ok(self.edges.get(canonical_name).cloned().unwrap_or_default())
        }

        async fn entity(&self, canonical_name: &str) -> Result<Option<Entity>> {
            Ok(self
                .entities
                .iter()
                .find(|e| e.canonical_name == canonical_name)
                .cloned())
        }

        async fn find_entities_by_name(&self, text: &str, limit: usize) -> Result<Vec<Entity>> {
            let needle = Entity::canonicalize(text);
            Ok(self
                .entities
                .iter()
                .filter(|e| e.canonical_name.contains(&needle))
                .take(limit)
                .cloned()
                .collect())
        }

        async fn community_summary(&self, community_id: i64) -> Result<Option<String>> {
            Ok(self.summaries.get(&community_id).cloned())
        }
    }

    fn sample_graph() -> Arc<MapGraph> {
        let mut edges = HashMap::new();
        edges.insert(
            "demo day".to_string(),
            vec![AdjacentEdge {
                neighbor: "创业者成功".to_string(),
                predicate: "促进".to_string(),
                confidence: 0.7,
                provenance: Vec::new(),
            }],
        );
        edges.insert(
            "创业者成功".to_string(),
            vec![AdjacentEdge {
                neighbor: "demo day".to_string(),
                predicate: "促进".to_string(),
                confidence: 0.7,
                provenance: Vec::new(),
            }],
        );
        Arc::new(MapGraph {
            entities: vec![
                Entity::new("Demo Day", LayerTag::Process).with_community(3),
                Entity::new("创业者成功", LayerTag::Concept),
            ],
            edges,
            summaries: HashMap::from([(3, "Accelerator events and outcomes".to_string())]),
        })
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StubTool("alpha"))).unwrap();
        let err = registry.register(Arc::new(StubTool("alpha"))).unwrap_err();
        assert!(matches!(err, AgentError::InvalidArgument(_)));
    }

    #[test]
    fn test_registry_lookup_and_describe() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StubTool("alpha"))).unwrap();
        registry.register(Arc::new(StubTool("beta"))).unwrap();

        assert!(registry.get("alpha").is_some());
        assert!(registry.get("gamma").is_none());
        assert_eq!(registry.names(), vec!["alpha", "beta"]);
        assert!(registry.describe().contains("- alpha"));
    }

    #[tokio::test]
    async fn test_entity_details_reports_neighbors_and_community() {
        let tool = EntityDetailsTool::new(sample_graph());
        let observation = tool
            .invoke(&json!({"entity_name": "Demo Day"}))
            .await
            .unwrap();

        assert!(observation.has_evidence);
        assert!(observation.content.contains("layer: process"));
        assert!(observation.content.contains("Accelerator events"));
        assert!(observation.content.contains("促进"));
    }

    #[tokio::test]
    async fn test_entity_details_partial_name_resolves_via_fuzzy_match() {
        let tool = EntityDetailsTool::new(sample_graph());
        let observation = tool.invoke(&json!({"entity_name": "demo"})).await.unwrap();

        assert!(observation.has_evidence);
        assert!(observation.content.contains("demo day"));
    }

    #[tokio::test]
    async fn test_entity_details_unknown_entity() {
        let tool = EntityDetailsTool::new(sample_graph());
        let observation = tool
            .invoke(&json!({"entity_name": "nonexistent"}))
            .await
            .unwrap();

        assert!(!observation.has_evidence);
        assert!(observation.content.contains("not found"));
    }

    #[tokio::test]
    async fn test_entity_details_missing_argument() {
        let tool = EntityDetailsTool::new(sample_graph());
        let err = tool.invoke(&json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_relation_path_finds_connection() {
        let tool = RelationPathTool::new(sample_graph(), &RetrievalConfig::default());
        let observation = tool
            .invoke(&json!({"entity1": "Demo Day", "entity2": "创业者成功"}))
            .await
            .unwrap();

        assert!(observation.has_evidence);
        assert!(observation.content.contains("-[促进]->"));
    }

    #[tokio::test]
    async fn test_relation_path_same_entity_rejected() {
        let tool = RelationPathTool::new(sample_graph(), &RetrievalConfig::default());
        let err = tool
            .invoke(&json!({"entity1": "Demo Day", "entity2": "demo  day"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_relation_path_no_connection() {
        let graph = Arc::new(MapGraph {
            entities: vec![
                Entity::new("a", LayerTag::Concept),
                Entity::new("b", LayerTag::Concept),
            ],
            edges: HashMap::new(),
            summaries: HashMap::new(),
        });
        let tool = RelationPathTool::new(graph, &RetrievalConfig::default());
        let observation = tool
            .invoke(&json!({"entity1": "a", "entity2": "b"}))
            .await
            .unwrap();

        assert!(!observation.has_evidence);
        assert!(observation.content.contains("No relationship path"));
    }
}
