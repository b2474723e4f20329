//! Bounded reasoning loop over the tool registry.
//!
//! Every chat call runs think-act-observe cycles under three hard
//! budgets (step count, wall clock, per-tool timeout) and always returns
//! an outcome with the full trace, even on failure. Conversation state
//! lives in an explicit [`ChatSession`] owned by the caller.

use crate::config::AgentConfig;
use crate::inference::{ChatMessage, Planner, PlannerDecision};
use crate::tools::ToolRegistry;
use crate::{AgentError, Result};
use kgrag_core::{AgentAction, AgentOutcome, AnswerStatus, ReasoningTrace};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Conversation history for one user session. Create one per
/// conversation; concurrent sessions never share state.
#[derive(Debug, Clone, Default)]
pub struct ChatSession {
    messages: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Drop all history, keeping the session usable
    pub fn reset(&mut self) {
        self.messages.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Drives the planner against the registered tools
pub struct ReasoningController {
    planner: Arc<dyn Planner>,
    registry: ToolRegistry,
    config: AgentConfig,
}

impl ReasoningController {
    /// Build a controller. Fails fast when no tools are registered so a
    /// misconfigured deployment cannot silently answer without evidence.
    pub fn new(
        planner: Arc<dyn Planner>,
        registry: ToolRegistry,
        config: AgentConfig,
    ) -> Result<Self> {
        if registry.is_empty() {
            return Err(AgentError::InvalidArgument(
                "reasoning controller requires at least one registered tool".into(),
            ));
        }
        Ok(Self { planner, registry, config })
    }

    fn system_prompt(&self) -> String {
        format!(
            "You answer questions using a knowledge graph. You have these tools:\n{}\n\n\
             Respond with a single JSON object: {{\"thought\": string, \"action\": {{...}}}}.\n\
             To call a tool: {{\"kind\": \"tool_call\", \"tool\": name, \"args\": object}}.\n\
             To answer: {{\"kind\": \"final_answer\", \"answer\": string}}.\n\
             Ground answers in tool observations. If the graph has no relevant \
             information, say so in the final answer instead of guessing.",
            self.registry.describe()
        )
    }

    /// Run the loop for one user message.
    ///
    /// Always returns `Ok`: service failures and exhausted budgets
    /// surface as a `Failed` status carrying the trace collected so far.
    #[instrument(skip_all, fields(history = session.messages().len()))]
    pub async fn chat(&self, session: &mut ChatSession, user_message: &str) -> Result<AgentOutcome> {
        let user_message = user_message.trim();
        if user_message.is_empty() {
            return Err(AgentError::InvalidArgument("message must not be empty".into()));
        }

        session.push(ChatMessage::user(user_message));

        let deadline = Instant::now() + self.config.wall_clock_budget;
        let mut trace = ReasoningTrace::new();
        let mut transcript = vec![ChatMessage::system(self.system_prompt())];
        transcript.extend_from_slice(session.messages());

        let mut evidence_seen = false;
        let mut consecutive_failures = 0u32;
        let mut last_invalid: Option<String> = None;

        for step in 1..=self.config.max_steps {
            if Instant::now() >= deadline {
                info!(trace_id = %trace.trace_id, "Wall-clock budget exhausted at step {}", step);
                return Ok(AgentOutcome::failed("wall-clock budget exceeded", trace));
            }

            let decision = match self.plan(&transcript, deadline).await {
                Ok(decision) => decision,
                Err(e) => {
                    warn!("Planner failed at step {}: {}", step, e);
                    consecutive_failures += 1;
                    if consecutive_failures >= 2 {
                        return Ok(AgentOutcome::failed(
                            format!("planner failed twice in a row: {}", e),
                            trace,
                        ));
                    }
                    let observation = format!(
                        "Your previous reply was not a valid decision ({}). \
                         Reply with exactly one JSON decision object.",
                        e
                    );
                    trace.push(
                        String::new(),
                        AgentAction::ToolCall {
                            tool: "(invalid)".into(),
                            args: serde_json::Value::Null,
                        },
                        observation.clone(),
                    );
                    transcript.push(ChatMessage::user(observation));
                    continue;
                }
            };

            match decision.action {
                AgentAction::FinalAnswer { answer } => {
                    let status = if evidence_seen {
                        AnswerStatus::Grounded
                    } else {
                        AnswerStatus::Unsupported
                    };
                    trace.push(
                        decision.thought,
                        AgentAction::FinalAnswer { answer: answer.clone() },
                        String::new(),
                    );
                    session.push(ChatMessage::assistant(answer.clone()));
                    debug!(trace_id = %trace.trace_id, steps = trace.len(), "Answered");
                    return Ok(AgentOutcome { answer: Some(answer), status, trace });
                }
                AgentAction::ToolCall { tool, args } => {
                    let signature = format!("{}:{}", tool, args);

                    // A verbatim repeat of the call just rejected gets
                    // the same rejection without invoking anything
                    let outcome = if last_invalid.as_deref() == Some(signature.as_str()) {
                        Err(AgentError::InvalidArgument(format!(
                            "repeated the same invalid call to '{}'",
                            tool
                        )))
                    } else {
                        self.invoke_tool(&tool, &args, deadline).await
                    };

                    let observation = match outcome {
                        Ok(observation) => {
                            evidence_seen |= observation.has_evidence;
                            consecutive_failures = 0;
                            last_invalid = None;
                            observation.content
                        }
                        Err(AgentError::InvalidArgument(reason)) => {
                            last_invalid = Some(signature);
                            format!("Invalid tool call: {}. Fix the arguments or choose another tool.", reason)
                        }
                        Err(e) => {
                            consecutive_failures += 1;
                            if consecutive_failures >= 2 {
                                trace.push(
                                    decision.thought,
                                    AgentAction::ToolCall { tool, args },
                                    format!("unrecoverable failure: {}", e),
                                );
                                return Ok(AgentOutcome::failed(
                                    format!("tool '{}' failed twice in a row: {}", signature, e),
                                    trace,
                                ));
                            }
                            format!("Tool failed: {}. You may retry or try a different tool.", e)
                        }
                    };

                    trace.push(
                        decision.thought,
                        AgentAction::ToolCall { tool: tool.clone(), args },
                        observation.clone(),
                    );
                    transcript.push(ChatMessage::assistant(format!(
                        "Called {}; observation follows.",
                        tool
                    )));
                    transcript.push(ChatMessage::user(format!("Observation: {}", observation)));
                }
            }
        }

        info!(trace_id = %trace.trace_id, "Step budget exhausted without a final answer");
        Ok(AgentOutcome::failed(
            format!("step budget of {} exhausted", self.config.max_steps),
            trace,
        ))
    }

    /// One planner call with transient retries under the deadline
    async fn plan(&self, transcript: &[ChatMessage], deadline: Instant) -> Result<PlannerDecision> {
        let mut attempt = 0u32;
        loop {
            match self.planner.decide(transcript).await {
                Ok(decision) => return Ok(decision),
                Err(e) if e.is_transient() && attempt < self.config.max_transient_retries => {
                    let delay = backoff_delay(attempt, self.config.backoff_base, self.config.backoff_cap);
                    if Instant::now() + delay >= deadline {
                        return Err(AgentError::BudgetExceeded(
                            "no budget left for planner retry".into(),
                        ));
                    }
                    debug!("Planner transient failure (attempt {}): {}", attempt, e);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Invoke one tool with timeout and transient retries
    async fn invoke_tool(
        &self,
        name: &str,
        args: &serde_json::Value,
        deadline: Instant,
    ) -> Result<crate::tools::ToolObservation> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| AgentError::InvalidArgument(format!("unknown tool: {}", name)))?;

        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(self.config.tool_timeout, tool.invoke(args)).await
            {
                Ok(result) => result,
                Err(_) => Err(AgentError::Transient(format!(
                    "tool '{}' timed out after {:?}",
                    name, self.config.tool_timeout
                ))),
            };

            match result {
                Ok(observation) => return Ok(observation),
                Err(e) if e.is_transient() && attempt < self.config.max_transient_retries => {
                    let delay = backoff_delay(attempt, self.config.backoff_base, self.config.backoff_cap);
                    if Instant::now() + delay >= deadline {
                        return Err(AgentError::BudgetExceeded(
                            "no budget left for tool retry".into(),
                        ));
                    }
                    warn!("Tool '{}' transient failure (attempt {}): {}", name, attempt, e);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Exponential backoff with jitter in [0.5, 1.5) of the nominal delay
fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let nominal = base.saturating_mul(1u32 << attempt.min(16));
    let capped = nominal.min(cap);
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    capped.mul_f64(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Tool, ToolObservation};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Planner that replays a fixed script of decisions
    struct ScriptedPlanner {
        script: Mutex<Vec<Result<PlannerDecision>>>,
    }

    impl ScriptedPlanner {
        fn new(decisions: Vec<Result<PlannerDecision>>) -> Arc<Self> {
            Arc::new(Self { script: Mutex::new(decisions) })
        }
    }

    #[async_trait]
    impl Planner for ScriptedPlanner {
        async fn decide(&self, _messages: &[ChatMessage]) -> Result<PlannerDecision> {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                // Keep looping if the script runs out; budget tests rely on it
                return Ok(PlannerDecision {
                    thought: "keep searching".into(),
                    action: AgentAction::ToolCall {
                        tool: "search".into(),
                        args: json!({"query": "more"}),
                    },
                });
            }
            script.remove(0)
        }
    }

    fn tool_call(tool: &str, args: Value) -> Result<PlannerDecision> {
        Ok(PlannerDecision {
            thought: "calling a tool".into(),
            action: AgentAction::ToolCall { tool: tool.into(), args },
        })
    }

    fn final_answer(answer: &str) -> Result<PlannerDecision> {
        Ok(PlannerDecision {
            thought: "done".into(),
            action: AgentAction::FinalAnswer { answer: answer.into() },
        })
    }

    struct SearchTool {
        found: bool,
    }

    #[async_trait]
    impl Tool for SearchTool {
        fn name(&self) -> &'static str {
            "search"
        }

        fn description(&self) -> &'static str {
            "search the knowledge graph"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object", "required": ["query"]})
        }

        async fn invoke(&self, args: &Value) -> Result<ToolObservation> {
            let query = args
                .get("query")
                .and_then(|v| v.as_str())
                .ok_or_else(|| AgentError::InvalidArgument("missing query".into()))?;
            if self.found {
                Ok(ToolObservation::evidence(format!("evidence for {}", query)))
            } else {
                Ok(ToolObservation::no_evidence("nothing found"))
            }
        }
    }

    struct FlakyTool {
        failures_left: Mutex<u32>,
    }

    #[async_trait]
    impl Tool for FlakyTool {
        fn name(&self) -> &'static str {
            "search"
        }

        fn description(&self) -> &'static str {
            "search with transient failures"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }

        async fn invoke(&self, _args: &Value) -> Result<ToolObservation> {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(AgentError::Transient("backend hiccup".into()));
            }
            Ok(ToolObservation::evidence("recovered"))
        }
    }

    fn registry_with(tool: impl Tool + 'static) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(tool)).unwrap();
        registry
    }

    fn fast_config(max_steps: usize) -> AgentConfig {
        AgentConfig {
            max_steps,
            wall_clock_budget: Duration::from_secs(10),
            tool_timeout: Duration::from_secs(1),
            max_transient_retries: 2,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_search_then_answer_is_grounded() {
        let planner = ScriptedPlanner::new(vec![
            tool_call("search", json!({"query": "demo day"})),
            final_answer("Demo day helps founders meet investors."),
        ]);
        let controller = ReasoningController::new(
            planner,
            registry_with(SearchTool { found: true }),
            fast_config(15),
        )
        .unwrap();

        let mut session = ChatSession::new();
        let outcome = controller.chat(&mut session, "what is demo day for?").await.unwrap();

        assert_eq!(outcome.status, AnswerStatus::Grounded);
        assert_eq!(outcome.trace.len(), 2);
        // user question plus assistant answer in the session
        assert_eq!(session.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_answer_without_evidence_is_unsupported() {
        let planner = ScriptedPlanner::new(vec![
            tool_call("search", json!({"query": "demo day"})),
            final_answer("I believe it is a pitch event."),
        ]);
        let controller = ReasoningController::new(
            planner,
            registry_with(SearchTool { found: false }),
            fast_config(15),
        )
        .unwrap();

        let mut session = ChatSession::new();
        let outcome = controller.chat(&mut session, "what is demo day?").await.unwrap();

        assert_eq!(outcome.status, AnswerStatus::Unsupported);
        assert!(outcome.answer.is_some());
    }

    #[tokio::test]
    async fn test_step_budget_never_exceeded() {
        // Script is empty; the planner loops on tool calls forever
        let planner = ScriptedPlanner::new(vec![]);
        let controller = ReasoningController::new(
            planner,
            registry_with(SearchTool { found: false }),
            fast_config(4),
        )
        .unwrap();

        let mut session = ChatSession::new();
        let outcome = controller.chat(&mut session, "loop forever").await.unwrap();

        assert!(matches!(outcome.status, AnswerStatus::Failed { .. }));
        assert!(outcome.trace.len() <= 4);
        assert!(outcome.answer.is_none());
    }

    #[tokio::test]
    async fn test_unknown_tool_surfaces_and_loop_continues() {
        let planner = ScriptedPlanner::new(vec![
            tool_call("nonexistent_tool", json!({})),
            tool_call("search", json!({"query": "demo day"})),
            final_answer("answered after recovering"),
        ]);
        let controller = ReasoningController::new(
            planner,
            registry_with(SearchTool { found: true }),
            fast_config(15),
        )
        .unwrap();

        let mut session = ChatSession::new();
        let outcome = controller.chat(&mut session, "q").await.unwrap();

        assert_eq!(outcome.status, AnswerStatus::Grounded);
        assert_eq!(outcome.trace.len(), 3);
        assert!(outcome.trace.steps[0].observation.contains("Invalid tool call"));
    }

    #[tokio::test]
    async fn test_repeated_invalid_call_not_reinvoked() {
        // Same malformed call twice, then a valid run
        let planner = ScriptedPlanner::new(vec![
            tool_call("search", json!({})),
            tool_call("search", json!({})),
            tool_call("search", json!({"query": "demo day"})),
            final_answer("done"),
        ]);
        let controller = ReasoningController::new(
            planner,
            registry_with(SearchTool { found: true }),
            fast_config(15),
        )
        .unwrap();

        let mut session = ChatSession::new();
        let outcome = controller.chat(&mut session, "q").await.unwrap();

        assert_eq!(outcome.status, AnswerStatus::Grounded);
        assert!(outcome.trace.steps[1].observation.contains("repeated the same invalid call"));
    }

    #[tokio::test]
    async fn test_malformed_calls_until_budget_fails_with_trace() {
        // The model keeps emitting the same malformed call; every step
        // surfaces an invalid-argument observation and the loop ends at
        // the step budget with the whole trace intact
        let planner = ScriptedPlanner::new(vec![
            tool_call("search", json!({})),
            tool_call("search", json!({})),
            tool_call("search", json!({})),
        ]);
        let controller = ReasoningController::new(
            planner,
            registry_with(SearchTool { found: true }),
            fast_config(3),
        )
        .unwrap();

        let mut session = ChatSession::new();
        let outcome = controller.chat(&mut session, "q").await.unwrap();

        assert!(matches!(outcome.status, AnswerStatus::Failed { .. }));
        assert_eq!(outcome.trace.len(), 3);
        assert!(outcome.trace.steps[0].observation.contains("Invalid tool call"));
        assert!(outcome.trace.steps[1].observation.contains("repeated the same invalid call"));
        assert!(outcome.trace.steps[2].observation.contains("repeated the same invalid call"));
    }

    #[tokio::test]
    async fn test_transient_failures_retried_then_succeed() {
        let planner = ScriptedPlanner::new(vec![
            tool_call("search", json!({"query": "demo day"})),
            final_answer("recovered and answered"),
        ]);
        let controller = ReasoningController::new(
            planner,
            registry_with(FlakyTool { failures_left: Mutex::new(2) }),
            fast_config(15),
        )
        .unwrap();

        let mut session = ChatSession::new();
        let outcome = controller.chat(&mut session, "q").await.unwrap();

        assert_eq!(outcome.status, AnswerStatus::Grounded);
    }

    #[tokio::test]
    async fn test_persistent_tool_failure_fails_run_with_trace() {
        let planner = ScriptedPlanner::new(vec![
            tool_call("search", json!({"query": "a"})),
            tool_call("search", json!({"query": "b"})),
            final_answer("should never be reached"),
        ]);
        let controller = ReasoningController::new(
            planner,
            registry_with(FlakyTool { failures_left: Mutex::new(100) }),
            fast_config(15),
        )
        .unwrap();

        let mut session = ChatSession::new();
        let outcome = controller.chat(&mut session, "q").await.unwrap();

        assert!(matches!(outcome.status, AnswerStatus::Failed { .. }));
        assert!(!outcome.trace.is_empty());
    }

    #[tokio::test]
    async fn test_empty_registry_rejected() {
        let planner = ScriptedPlanner::new(vec![]);
        match ReasoningController::new(planner, ToolRegistry::new(), fast_config(1)) {
            Err(AgentError::InvalidArgument(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("empty registry must be rejected"),
        }
    }

    #[tokio::test]
    async fn test_session_reset_clears_history() {
        let mut session = ChatSession::new();
        session.push(ChatMessage::user("hello"));
        session.push(ChatMessage::assistant("hi"));
        session.reset();
        assert!(session.is_empty());
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let base = Duration::from_millis(200);
        let cap = Duration::from_millis(5_000);
        for attempt in 0..10 {
            let delay = backoff_delay(attempt, base, cap);
            // jitter is at most 1.5x the capped nominal delay
            assert!(delay <= cap.mul_f64(1.5));
        }
        // first attempt stays near the base
        let first = backoff_delay(0, base, cap);
        assert!(first >= base.mul_f64(0.5) && first <= base.mul_f64(1.5));
    }
}
