//! Reasoning trace types - the auditable record of one agent run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the agent decided to do at one step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentAction {
    /// Invoke a registered tool with JSON arguments
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    /// Emit the final answer and stop
    FinalAnswer { answer: String },
}

/// One think-act-observe cycle. Immutable once appended to the trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    /// 1-indexed position in the trace
    pub step: usize,

    /// The model's stated thought for this step
    pub thought: String,

    /// The action taken
    pub action: AgentAction,

    /// Tool output or failure description fed back to the model.
    /// Empty for the final-answer step.
    #[serde(default)]
    pub observation: String,

    pub timestamp: DateTime<Utc>,
}

/// Ordered, append-only record of an agent run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningTrace {
    /// Identifier for this run
    pub trace_id: Uuid,

    pub steps: Vec<ReasoningStep>,
}

impl ReasoningTrace {
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            steps: Vec::new(),
        }
    }

    /// Append a step; steps are never modified afterward
    pub fn push(&mut self, thought: String, action: AgentAction, observation: String) {
        let step = self.steps.len() + 1;
        self.steps.push(ReasoningStep {
            step,
            thought,
            action,
            observation,
            timestamp: Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// How the final answer relates to retrieved evidence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    /// Answered with cited evidence from retrieval
    Grounded,
    /// Answered, but no retrieval step produced supporting evidence
    Unsupported,
    /// No answer; the reason explains the budget or service failure
    Failed { reason: String },
}

/// The user-visible outcome of one `chat` call: answer plus full trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub answer: Option<String>,
    pub status: AnswerStatus,
    pub trace: ReasoningTrace,
}

impl AgentOutcome {
    pub fn failed(reason: impl Into<String>, trace: ReasoningTrace) -> Self {
        Self {
            answer: None,
            status: AnswerStatus::Failed {
                reason: reason.into(),
            },
            trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trace_append_ordering() {
        let mut trace = ReasoningTrace::new();
        trace.push(
            "need evidence".into(),
            AgentAction::ToolCall {
                tool: "graph_rag_search".into(),
                args: json!({"query": "Demo Day"}),
            },
            "found 2 entities".into(),
        );
        trace.push(
            "enough evidence".into(),
            AgentAction::FinalAnswer {
                answer: "Demo Day is a pitch event".into(),
            },
            String::new(),
        );

        assert_eq!(trace.len(), 2);
        assert_eq!(trace.steps[0].step, 1);
        assert_eq!(trace.steps[1].step, 2);
    }

    #[test]
    fn test_failed_outcome_keeps_trace() {
        let mut trace = ReasoningTrace::new();
        trace.push(
            "t".into(),
            AgentAction::ToolCall {
                tool: "graph_rag_search".into(),
                args: json!({}),
            },
            "transient failure".into(),
        );
        let outcome = AgentOutcome::failed("step budget exceeded", trace);

        assert!(outcome.answer.is_none());
        assert_eq!(outcome.trace.len(), 1);
        assert!(matches!(outcome.status, AnswerStatus::Failed { .. }));
    }
}
