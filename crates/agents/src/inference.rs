//! Local inference clients for embeddings (TEI or Ollama) and the
//! planning model (TGI or Ollama) that drives the reasoning loop.

use crate::{AgentError, Result};
use async_trait::async_trait;
use kgrag_core::AgentAction;
use kgrag_db::schema::EMBEDDING_DIMENSION;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const DEFAULT_EMBED_URL: &str = "http://localhost:8081";
const DEFAULT_EMBED_PROVIDER: &str = "tei";
const DEFAULT_OLLAMA_EMBED_MODEL: &str = "nomic-embed-text:latest";
const DEFAULT_LLM_URL: &str = "http://localhost:8082";
const DEFAULT_LLM_PROVIDER: &str = "tgi";
const DEFAULT_OLLAMA_MODEL: &str = "phi4-mini:latest";
const DEFAULT_EMBED_MAX_BATCH: usize = 32;
const DEFAULT_OLLAMA_TIMEOUT_SECS: u64 = 120;

fn env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn ollama_timeout() -> Duration {
    let secs = std::env::var("LLM_OLLAMA_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_OLLAMA_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Text embedding seam; swapped for a deterministic fake in tests.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str, is_query: bool) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String], is_query: bool) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text, is_query).await?);
        }
        Ok(results)
    }
}

#[derive(Clone, Copy)]
enum EmbedProvider {
    Tei,
    Ollama,
}

/// HTTP embedding client for a local TEI server or an Ollama instance.
#[derive(Clone)]
pub struct EmbedClient {
    client: Client,
    base_url: String,
    provider: EmbedProvider,
    model: String,
}

impl EmbedClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            provider: EmbedProvider::Tei,
            model: DEFAULT_OLLAMA_EMBED_MODEL.to_string(),
        }
    }

    pub fn default_local() -> Self {
        let provider = env_or_default("EMBED_PROVIDER", DEFAULT_EMBED_PROVIDER);
        if provider.eq_ignore_ascii_case("ollama") {
            Self {
                client: Client::new(),
                base_url: env_or_default("EMBED_URL", "http://localhost:11434"),
                provider: EmbedProvider::Ollama,
                model: env_or_default("EMBED_MODEL", DEFAULT_OLLAMA_EMBED_MODEL),
            }
        } else {
            Self::new(env_or_default("EMBED_URL", DEFAULT_EMBED_URL))
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<bool> {
        let url = match self.provider {
            EmbedProvider::Tei => format!("{}/health", self.base_url),
            EmbedProvider::Ollama => format!("{}/api/tags", self.base_url),
        };
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }

    async fn ollama_embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let request = OllamaEmbedRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json::<OllamaEmbedResponse>()
            .await?;

        Ok(response.embedding)
    }
}

#[async_trait]
impl Embedder for EmbedClient {
    async fn embed(&self, text: &str, is_query: bool) -> Result<Vec<f32>> {
        if matches!(self.provider, EmbedProvider::Ollama) {
            let embedding = self.ollama_embed(text).await?;
            validate_embedding_dim(embedding.len())?;
            return Ok(embedding);
        }

        let prompt_name = if is_query {
            std::env::var("EMBED_PROMPT_NAME_QUERY").ok()
        } else {
            std::env::var("EMBED_PROMPT_NAME_PASSAGE").ok()
        };

        let url = format!("{}/embed", self.base_url);
        let request = TeiEmbedRequest {
            inputs: text,
            truncate: true,
            prompt_name: prompt_name.as_deref(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        let embedding = parse_embedding_response(response)?;
        validate_embedding_dim(embedding.len())?;
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String], is_query: bool) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        if matches!(self.provider, EmbedProvider::Ollama) {
            let mut results = Vec::with_capacity(texts.len());
            for text in texts {
                let embedding = self.ollama_embed(text).await?;
                validate_embedding_dim(embedding.len())?;
                results.push(embedding);
            }
            return Ok(results);
        }

        let prompt_name = if is_query {
            std::env::var("EMBED_PROMPT_NAME_QUERY").ok()
        } else {
            std::env::var("EMBED_PROMPT_NAME_PASSAGE").ok()
        };

        let max_batch = std::env::var("EMBED_MAX_BATCH")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_EMBED_MAX_BATCH);

        let url = format!("{}/embed", self.base_url);
        let mut results = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(max_batch) {
            let request = TeiEmbedBatchRequest {
                inputs: chunk,
                truncate: true,
                prompt_name: prompt_name.as_deref(),
            };

            let response = self
                .client
                .post(&url)
                .json(&request)
                .send()
                .await?
                .error_for_status()?
                .json::<Value>()
                .await?;

            let embeddings = parse_embeddings_response(response)?;
            for embedding in &embeddings {
                validate_embedding_dim(embedding.len())?;
            }
            results.extend(embeddings);
        }

        Ok(results)
    }
}

fn validate_embedding_dim(len: usize) -> Result<()> {
    if len != EMBEDDING_DIMENSION {
        return Err(AgentError::Processing(format!(
            "Embedding dimension {} does not match expected {}. Choose a 1024-dim model or update the schema.",
            len, EMBEDDING_DIMENSION
        )));
    }
    Ok(())
}

/// One turn of conversation passed to the planning model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

/// A single planning step: the model's reasoning plus the action it chose.
#[derive(Debug, Clone)]
pub struct PlannerDecision {
    pub thought: String,
    pub action: AgentAction,
}

/// Planning seam for the reasoning loop; tests script it.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn decide(&self, messages: &[ChatMessage]) -> Result<PlannerDecision>;
}

#[derive(Clone, Copy)]
enum LlmProvider {
    Tgi,
    Ollama,
}

/// HTTP chat client for the planning model (TGI or Ollama).
#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    base_url: String,
    provider: LlmProvider,
    model: String,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            provider: LlmProvider::Tgi,
            model: DEFAULT_OLLAMA_MODEL.to_string(),
        }
    }

    pub fn default_local() -> Self {
        let provider = env_or_default("LLM_PROVIDER", DEFAULT_LLM_PROVIDER);
        if provider.eq_ignore_ascii_case("ollama") {
            Self {
                client: Client::new(),
                base_url: env_or_default("LLM_URL", "http://localhost:11434"),
                provider: LlmProvider::Ollama,
                model: env_or_default("LLM_MODEL", DEFAULT_OLLAMA_MODEL),
            }
        } else {
            Self::new(env_or_default("LLM_URL", DEFAULT_LLM_URL))
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<bool> {
        let url = match self.provider {
            LlmProvider::Tgi => format!("{}/health", self.base_url),
            LlmProvider::Ollama => format!("{}/api/tags", self.base_url),
        };
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }

    async fn tgi_generate(&self, prompt: String) -> Result<String> {
        let url = format!("{}/generate", self.base_url);
        let request = TgiGenerateRequest {
            inputs: prompt,
            parameters: TgiParameters {
                max_new_tokens: Some(1024),
                return_full_text: Some(false),
                grammar: Some(decision_schema()),
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        extract_generated_text(response)
    }

    async fn ollama_chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);
        let request = OllamaChatRequest {
            model: self.model.clone(),
            messages,
            stream: false,
            format: Some(decision_schema()),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .timeout(ollama_timeout())
            .send()
            .await?
            .error_for_status()?
            .json::<OllamaChatResponse>()
            .await?;

        if let Some(done_reason) = response.done_reason.as_deref() {
            debug!("Ollama chat done_reason={}", done_reason);
        }

        Ok(response.message.content)
    }
}

#[async_trait]
impl Planner for ChatClient {
    async fn decide(&self, messages: &[ChatMessage]) -> Result<PlannerDecision> {
        let raw = match self.provider {
            LlmProvider::Ollama => self.ollama_chat(messages).await?,
            LlmProvider::Tgi => {
                // TGI has no chat endpoint; flatten the turns into one prompt
                let prompt = messages
                    .iter()
                    .map(|m| format!("[{}]\n{}", m.role, m.content))
                    .collect::<Vec<_>>()
                    .join("\n\n");
                self.tgi_generate(prompt).await?
            }
        };

        parse_decision(&raw)
    }
}

/// JSON schema constraining the planner output to a thought plus exactly
/// one action, matching [`AgentAction`]'s tagged representation.
fn decision_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["thought", "action"],
        "properties": {
            "thought": { "type": "string" },
            "action": {
                "type": "object",
                "required": ["kind"],
                "properties": {
                    "kind": { "type": "string", "enum": ["tool_call", "final_answer"] },
                    "tool": { "type": "string" },
                    "args": { "type": "object" },
                    "answer": { "type": "string" }
                }
            }
        }
    })
}

/// Parse a planner reply into a decision. Tolerates code fences and
/// prose around the JSON object, and a handful of field aliases small
/// local models tend to emit.
pub fn parse_decision(raw: &str) -> Result<PlannerDecision> {
    let cleaned = normalize_json_payload(raw);
    let value: Value = serde_json::from_str(&cleaned)
        .map_err(|e| AgentError::Processing(format!("Planner returned invalid JSON: {} ({})", raw, e)))?;

    let thought = value
        .get("thought")
        .or_else(|| value.get("reasoning"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let action_value = value
        .get("action")
        .ok_or_else(|| AgentError::Processing(format!("Planner decision missing action: {}", cleaned)))?;

    let kind = action_value
        .get("kind")
        .or_else(|| action_value.get("type"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    let action = match kind {
        "final_answer" => {
            let answer = action_value
                .get("answer")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    AgentError::Processing(format!("final_answer without answer text: {}", cleaned))
                })?;
            AgentAction::FinalAnswer { answer: answer.to_string() }
        }
        "tool_call" => {
            let tool = action_value
                .get("tool")
                .or_else(|| action_value.get("name"))
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    AgentError::Processing(format!("tool_call without tool name: {}", cleaned))
                })?;
            let args = action_value
                .get("args")
                .or_else(|| action_value.get("arguments"))
                .cloned()
                .unwrap_or_else(|| json!({}));
            AgentAction::ToolCall { tool: tool.to_string(), args }
        }
        other => {
            return Err(AgentError::Processing(format!(
                "Unknown planner action kind: {}",
                other
            )))
        }
    };

    Ok(PlannerDecision { thought, action })
}

#[derive(Serialize)]
struct TeiEmbedRequest<'a> {
    inputs: &'a str,
    truncate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt_name: Option<&'a str>,
}

#[derive(Serialize)]
struct TeiEmbedBatchRequest<'a> {
    inputs: &'a [String],
    truncate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt_name: Option<&'a str>,
}

#[derive(Serialize)]
struct OllamaEmbedRequest {
    model: String,
    prompt: String,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct TgiGenerateRequest {
    inputs: String,
    parameters: TgiParameters,
}

#[derive(Serialize)]
struct TgiParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_new_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    return_full_text: Option<bool>,
    // Best-effort: TGI may accept a grammar/JSON schema constraint.
    #[serde(skip_serializing_if = "Option::is_none")]
    grammar: Option<Value>,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: String,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<Value>,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaChatMessageResponse,
    #[serde(default)]
    done_reason: Option<String>,
}

#[derive(Deserialize)]
struct OllamaChatMessageResponse {
    content: String,
}

fn parse_embedding_response(value: Value) -> Result<Vec<f32>> {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Ok(Vec::new());
            }
            if items.first().map(|v| v.is_number()).unwrap_or(false) {
                serde_json::from_value(Value::Array(items))
                    .map_err(|e| AgentError::Processing(format!("Invalid TEI embedding array: {}", e)))
            } else {
                let first = items
                    .into_iter()
                    .next()
                    .ok_or_else(|| AgentError::Processing("Missing embeddings".to_string()))?;
                serde_json::from_value(first)
                    .map_err(|e| AgentError::Processing(format!("Invalid TEI embedding array: {}", e)))
            }
        }
        other => Err(AgentError::Processing(format!(
            "Unexpected TEI response format: {}",
            other
        ))),
    }
}

fn parse_embeddings_response(value: Value) -> Result<Vec<Vec<f32>>> {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Ok(Vec::new());
            }
            if items.first().map(|v| v.is_array()).unwrap_or(false) {
                serde_json::from_value(Value::Array(items)).map_err(|e| {
                    AgentError::Processing(format!("Invalid TEI embeddings response: {}", e))
                })
            } else {
                let single: Vec<f32> = serde_json::from_value(Value::Array(items)).map_err(|e| {
                    AgentError::Processing(format!("Invalid TEI embedding array: {}", e))
                })?;
                Ok(vec![single])
            }
        }
        other => Err(AgentError::Processing(format!(
            "Unexpected TEI response format: {}",
            other
        ))),
    }
}

fn normalize_json_payload(payload: &str) -> String {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return trimmed.to_string();
    }

    let without_fence = if trimmed.starts_with("```") {
        let mut lines = trimmed.lines();
        let _ = lines.next(); // drop ``` or ```json
        let mut content = lines.collect::<Vec<_>>().join("\n");
        if content.ends_with("```") {
            content.truncate(content.len().saturating_sub(3));
        }
        content.trim().to_string()
    } else {
        trimmed.to_string()
    };

    if let (Some(start), Some(end)) = (without_fence.find('{'), without_fence.rfind('}')) {
        if start < end {
            return without_fence[start..=end].to_string();
        }
    }

    without_fence
}

fn extract_generated_text(value: Value) -> Result<String> {
    match value {
        Value::Array(mut items) => {
            let first = items
                .pop()
                .ok_or_else(|| AgentError::Processing("Empty TGI response array".to_string()))?;
            extract_generated_text(first)
        }
        Value::Object(mut obj) => {
            if let Some(Value::String(text)) = obj.remove("generated_text") {
                Ok(text)
            } else if let Some(Value::String(text)) = obj.remove("response") {
                Ok(text)
            } else {
                Err(AgentError::Processing(
                    "TGI response missing generated text field".to_string(),
                ))
            }
        }
        other => Err(AgentError::Processing(format!(
            "Unexpected TGI response format: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tool_call_decision() {
        let raw = r#"{"thought":"need context","action":{"kind":"tool_call","tool":"graph_rag_search","args":{"query":"创业公司如何融资"}}}"#;
        let decision = parse_decision(raw).unwrap();

        assert_eq!(decision.thought, "need context");
        match decision.action {
            AgentAction::ToolCall { tool, args } => {
                assert_eq!(tool, "graph_rag_search");
                assert_eq!(args["query"], "创业公司如何融资");
            }
            other => panic!("expected tool call, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_final_answer_decision() {
        let raw = r#"{"thought":"enough evidence","action":{"kind":"final_answer","answer":"Demo day helps."}}"#;
        let decision = parse_decision(raw).unwrap();

        match decision.action {
            AgentAction::FinalAnswer { answer } => assert_eq!(answer, "Demo day helps."),
            other => panic!("expected final answer, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_decision_strips_code_fence() {
        let raw = "```json\n{\"thought\":\"t\",\"action\":{\"kind\":\"final_answer\",\"answer\":\"a\"}}\n```";
        let decision = parse_decision(raw).unwrap();
        assert!(matches!(decision.action, AgentAction::FinalAnswer { .. }));
    }

    #[test]
    fn test_parse_decision_accepts_aliases() {
        let raw = r#"{"reasoning":"alias fields","action":{"type":"tool_call","name":"get_entity_details","arguments":{"entity_name":"demo day"}}}"#;
        let decision = parse_decision(raw).unwrap();

        assert_eq!(decision.thought, "alias fields");
        match decision.action {
            AgentAction::ToolCall { tool, args } => {
                assert_eq!(tool, "get_entity_details");
                assert_eq!(args["entity_name"], "demo day");
            }
            other => panic!("expected tool call, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_decision_rejects_prose() {
        assert!(parse_decision("I think we should search the graph.").is_err());
    }

    #[test]
    fn test_parse_decision_rejects_unknown_kind() {
        let raw = r#"{"thought":"t","action":{"kind":"retrieve"}}"#;
        assert!(parse_decision(raw).is_err());
    }

    #[test]
    fn test_normalize_extracts_object_from_prose() {
        let raw = "Here you go: {\"thought\":\"t\",\"action\":{\"kind\":\"final_answer\",\"answer\":\"ok\"}} hope that helps";
        let cleaned = normalize_json_payload(raw);
        assert!(cleaned.starts_with('{'));
        assert!(cleaned.ends_with('}'));
        assert!(serde_json::from_str::<Value>(&cleaned).is_ok());
    }

    #[test]
    fn test_validate_embedding_dim() {
        assert!(validate_embedding_dim(EMBEDDING_DIMENSION).is_ok());
        assert!(validate_embedding_dim(384).is_err());
    }
}
