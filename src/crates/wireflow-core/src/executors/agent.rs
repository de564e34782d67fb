//! Agent nodes: streamed invocations of an external agent runner
//!
//! `claude-agent` and `codex-agent` share this executor, parameterized by
//! the runner the registry wires in. The executor owns prompt
//! interpolation, rejection-feedback preludes, session persistence,
//! streaming re-emission, the optional deadline, and cancellation; the
//! [`AgentRunner`] owns the SDK call.
//!
//! On a rejection re-run the injected feedback is prepended through
//! `feedbackTemplate` (with `{{feedback}}` substituted), and the prior
//! session is resumed when the handler sets `continueSession`; otherwise
//! the run starts fresh. `conversationMode: persist` resumes the session
//! on every run regardless of rejection state.

use super::{NodeExecution, NodeExecutor};
use crate::bus::EventEmitter;
use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::event::NodeStreamEvent;
use crate::runner::{AgentOutcome, AgentRequest, AgentRunner, OutputFormat};
use crate::workflow::Node;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const DEFAULT_FEEDBACK_TEMPLATE: &str =
    "The previous result was rejected with this feedback: {{feedback}}\n\nAddress the feedback and try again.\n\n";

/// Whether the agent keeps one conversation across runs of this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationMode {
    #[default]
    Fresh,
    Persist,
}

/// Behavior when another rejection cycle would exceed `maxRetries`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OnMaxRetries {
    #[default]
    Fail,
    Skip,
    ApproveAnyway,
}

/// Rejection-feedback loop policy for an agent node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionHandler {
    /// Rejection-driven re-runs allowed before `onMaxRetries` applies
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub on_max_retries: OnMaxRetries,

    /// Resume the prior session on re-run instead of starting fresh
    #[serde(default)]
    pub continue_session: bool,

    /// Prelude template; `{{feedback}}` is substituted
    #[serde(default)]
    pub feedback_template: Option<String>,
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentOutputConfig {
    pub format: OutputFormat,
    pub schema: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentNodeConfig {
    /// The prompt; `{{NodeName.path}}` references are interpolated
    pub user_query: String,

    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub mcp_servers: Vec<String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub max_turns: Option<u32>,

    /// Deadline in milliseconds; unlimited when absent
    #[serde(default)]
    pub timeout: Option<u64>,

    #[serde(default)]
    pub conversation_mode: ConversationMode,

    #[serde(default)]
    pub output_config: AgentOutputConfig,

    #[serde(default)]
    pub rejection_handler: Option<RejectionHandler>,
}

pub struct AgentExecutor {
    runner: Arc<dyn AgentRunner>,
}

impl AgentExecutor {
    pub fn new(runner: Arc<dyn AgentRunner>) -> Self {
        Self { runner }
    }

    fn session_key(node: &Node) -> String {
        format!("node.{}.session", node.id)
    }

    fn build_request(
        config: &AgentNodeConfig,
        node: &Node,
        ctx: &ExecutionContext,
    ) -> AgentRequest {
        let mut prompt = ctx.interpolate(&config.user_query);
        let feedback = ctx.take_feedback(&node.id);

        let mut resume_session = None;
        if let Some(feedback) = &feedback {
            let template = config
                .rejection_handler
                .as_ref()
                .and_then(|h| h.feedback_template.clone())
                .unwrap_or_else(|| DEFAULT_FEEDBACK_TEMPLATE.to_string());
            prompt = format!("{}{}", template.replace("{{feedback}}", feedback), prompt);

            if config
                .rejection_handler
                .as_ref()
                .map(|h| h.continue_session)
                .unwrap_or(false)
            {
                resume_session = ctx
                    .get_variable(&Self::session_key(node))
                    .and_then(|v| v.as_str().map(str::to_string));
            }
        }
        if config.conversation_mode == ConversationMode::Persist {
            resume_session = ctx
                .get_variable(&Self::session_key(node))
                .and_then(|v| v.as_str().map(str::to_string));
        }

        AgentRequest {
            prompt,
            system_prompt: config.system_prompt.clone(),
            model: config.model.clone(),
            tools: config.tools.clone(),
            mcp_servers: config.mcp_servers.clone(),
            working_directory: config
                .working_directory
                .clone()
                .or_else(|| ctx.working_directory.clone()),
            max_turns: config.max_turns,
            output_format: config.output_config.format,
            output_schema: config.output_config.schema.clone(),
            resume_session,
        }
    }

}

/// Drive a runner invocation while re-emitting every chunk, under an
/// optional deadline and the execution's cancellation token. Shared with
/// the self-reflect executor.
pub(crate) async fn drive_agent(
    runner: &Arc<dyn AgentRunner>,
    request: AgentRequest,
    node_id: &str,
    ctx: &ExecutionContext,
    emitter: &EventEmitter,
    timeout_ms: Option<u64>,
) -> Result<AgentOutcome> {
    let cancel = ctx.cancel_token();
    let (chunk_tx, mut chunk_rx) = mpsc::channel::<NodeStreamEvent>(32);

    let run = runner.run(request, chunk_tx, cancel.clone());
    tokio::pin!(run);

    let deadline = timeout_ms.map(Duration::from_millis);
    let sleep = tokio::time::sleep(deadline.unwrap_or(Duration::from_secs(0)));
    tokio::pin!(sleep);

    let mut outcome: Option<Result<AgentOutcome>> = None;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            _ = &mut sleep, if deadline.is_some() && outcome.is_none() => {
                return Err(EngineError::timeout(
                    format!("agent in node '{node_id}'"),
                    timeout_ms.unwrap_or_default(),
                ));
            }
            result = &mut run, if outcome.is_none() => outcome = Some(result),
            chunk = chunk_rx.recv() => match chunk {
                Some(event) => emitter.node_output(event).await,
                // Channel closes once the runner is done and drained.
                None => break,
            },
        }
    }

    match outcome {
        Some(result) => result,
        // The runner dropped its sender without returning; treat as a
        // runner fault rather than hanging.
        None => Err(EngineError::agent(node_id, "agent runner closed its stream early")),
    }
}

#[async_trait]
impl NodeExecutor for AgentExecutor {
    fn validate(&self, node: &Node) -> Result<()> {
        let config: AgentNodeConfig = node.typed_config()?;
        if config.user_query.trim().is_empty() {
            return Err(EngineError::node_config(&node.id, "userQuery must not be empty"));
        }
        if config.timeout == Some(0) {
            return Err(EngineError::node_config(&node.id, "timeout must be positive"));
        }
        Ok(())
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: Arc<ExecutionContext>,
        emitter: EventEmitter,
    ) -> Result<NodeExecution> {
        let config: AgentNodeConfig = node.typed_config()?;
        let request = Self::build_request(&config, node, &ctx);
        tracing::debug!(node = %node.id, model = ?request.model, "agent dispatch");

        let outcome = drive_agent(&self.runner, request, &node.id, &ctx, &emitter, config.timeout)
            .await
            .map_err(|error| match error {
                EngineError::Cancelled | EngineError::Timeout { .. } => error,
                other => EngineError::agent(&node.id, other.to_string()),
            })?;

        if let Some(session_id) = &outcome.session_id {
            ctx.set_variable(Self::session_key(node), json!(session_id));
        }

        let output = match (config.output_config.format, &outcome.output) {
            (OutputFormat::Json, Value::String(text)) => match extract_json(text) {
                Some(parsed) => parsed,
                None => {
                    tracing::warn!(node = %node.id, "agent output is not valid JSON; keeping raw text");
                    outcome.output.clone()
                }
            },
            _ => outcome.output.clone(),
        };

        Ok(NodeExecution::with_metadata(
            output,
            json!({"sessionId": outcome.session_id}),
        ))
    }
}

/// Parse JSON out of agent text, tolerating markdown fences and prose
/// around a single top-level object or array.
pub(crate) fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    // ```json ... ``` fences.
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            if let Ok(value) = serde_json::from_str(after[..end].trim()) {
                return Some(value);
            }
        }
    }

    // First balanced {...} span.
    let open = trimmed.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in trimmed[open..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_str(&trimmed[open..=open + offset]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::event::ExecutionEvent;
    use crate::workflow::{Edge, NodeType, Workflow};
    use tokio_stream::StreamExt;
    use tokio_util::sync::CancellationToken;

    /// Records the request it saw; streams two chunks then completes.
    struct ScriptedRunner {
        seen: std::sync::Mutex<Vec<AgentRequest>>,
        output: Value,
        delay: Option<Duration>,
    }

    impl ScriptedRunner {
        fn new(output: Value) -> Self {
            Self {
                seen: std::sync::Mutex::new(Vec::new()),
                output,
                delay: None,
            }
        }
    }

    #[async_trait]
    impl AgentRunner for ScriptedRunner {
        async fn run(
            &self,
            request: AgentRequest,
            chunks: mpsc::Sender<NodeStreamEvent>,
            cancel: CancellationToken,
        ) -> Result<AgentOutcome> {
            self.seen.lock().unwrap().push(request);
            let _ = chunks.send(NodeStreamEvent::Thinking { text: "planning".into() }).await;
            if let Some(delay) = self.delay {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            let _ = chunks
                .send(NodeStreamEvent::TextDelta { text: "done".into() })
                .await;
            Ok(AgentOutcome {
                output: self.output.clone(),
                session_id: Some("sess-9".into()),
            })
        }
    }

    fn setup(config: Value) -> (Arc<ExecutionContext>, Node, Arc<EventBus>) {
        let mut wf = Workflow::new("wf", "Test");
        wf.nodes.push(Node::new("in", "Input", NodeType::Input, json!({})));
        wf.nodes.push(Node::new("agent", "Writer", NodeType::ClaudeAgent, config.clone()));
        wf.edges.push(Edge::new("e1", "in", "agent"));
        let ctx = Arc::new(ExecutionContext::new(Arc::new(wf), "exec", None));
        ctx.mark_complete("in", json!("the topic"));
        let bus = Arc::new(EventBus::new("exec", 16));
        (ctx, Node::new("agent", "Writer", NodeType::ClaudeAgent, config), bus)
    }

    #[tokio::test]
    async fn interpolates_prompt_and_streams_chunks() {
        let runner = Arc::new(ScriptedRunner::new(json!("a result")));
        let (ctx, node, bus) = setup(json!({"userQuery": "Write about {{Input}}"}));
        let mut events = bus.subscribe();
        let emitter = EventEmitter::new(Arc::clone(&bus), "agent", "Writer");

        let executor = AgentExecutor::new(Arc::clone(&runner) as Arc<dyn AgentRunner>);
        let result = executor.execute(&node, Arc::clone(&ctx), emitter).await.unwrap();

        assert_eq!(result.output, json!("a result"));
        assert_eq!(ctx.get_variable("node.agent.session"), Some(json!("sess-9")));

        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen[0].prompt, "Write about the topic");

        // Both chunks arrived as node-output events, in order.
        let first = events.next().await.unwrap();
        let second = events.next().await.unwrap();
        assert!(matches!(
            first,
            ExecutionEvent::NodeOutput { event: NodeStreamEvent::Thinking { .. }, .. }
        ));
        assert!(matches!(
            second,
            ExecutionEvent::NodeOutput { event: NodeStreamEvent::TextDelta { .. }, .. }
        ));
    }

    #[tokio::test]
    async fn feedback_rerun_prepends_template_and_resumes_session() {
        let runner = Arc::new(ScriptedRunner::new(json!("retry result")));
        let (ctx, node, bus) = setup(json!({
            "userQuery": "Write it",
            "rejectionHandler": {"continueSession": true, "feedbackTemplate": "Fix: {{feedback}}\n"}
        }));
        ctx.set_variable("node.agent.session", json!("sess-1"));
        ctx.set_feedback("agent", "add detail");
        let emitter = EventEmitter::new(bus, "agent", "Writer");

        let executor = AgentExecutor::new(Arc::clone(&runner) as Arc<dyn AgentRunner>);
        executor.execute(&node, ctx, emitter).await.unwrap();

        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen[0].prompt, "Fix: add detail\nWrite it");
        assert_eq!(seen[0].resume_session.as_deref(), Some("sess-1"));
    }

    #[tokio::test]
    async fn fresh_rerun_without_continue_session() {
        let runner = Arc::new(ScriptedRunner::new(json!("x")));
        let (ctx, node, bus) = setup(json!({"userQuery": "Write it"}));
        ctx.set_variable("node.agent.session", json!("sess-1"));
        ctx.set_feedback("agent", "shorter");
        let emitter = EventEmitter::new(bus, "agent", "Writer");

        let executor = AgentExecutor::new(Arc::clone(&runner) as Arc<dyn AgentRunner>);
        executor.execute(&node, ctx, emitter).await.unwrap();

        let seen = runner.seen.lock().unwrap();
        assert!(seen[0].prompt.starts_with("The previous result was rejected"));
        assert!(seen[0].resume_session.is_none());
    }

    #[tokio::test]
    async fn json_output_format_parses_fenced_text() {
        let runner = Arc::new(ScriptedRunner::new(json!(
            "Here you go:\n```json\n{\"score\": 8}\n```"
        )));
        let (ctx, node, bus) = setup(json!({
            "userQuery": "Rate it",
            "outputConfig": {"format": "json"}
        }));
        let emitter = EventEmitter::new(bus, "agent", "Writer");

        let executor = AgentExecutor::new(runner as Arc<dyn AgentRunner>);
        let result = executor.execute(&node, ctx, emitter).await.unwrap();
        assert_eq!(result.output, json!({"score": 8}));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_produces_timeout() {
        let mut runner = ScriptedRunner::new(json!("late"));
        runner.delay = Some(Duration::from_secs(600));
        let (ctx, node, bus) = setup(json!({"userQuery": "Write it", "timeout": 1000}));
        let emitter = EventEmitter::new(bus, "agent", "Writer");

        let executor = AgentExecutor::new(Arc::new(runner) as Arc<dyn AgentRunner>);
        let err = executor.execute(&node, ctx, emitter).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout { duration_ms: 1000, .. }));
    }

    #[tokio::test]
    async fn cancellation_aborts_the_run() {
        let mut runner = ScriptedRunner::new(json!("never"));
        runner.delay = Some(Duration::from_secs(600));
        let (ctx, node, bus) = setup(json!({"userQuery": "Write it"}));
        let emitter = EventEmitter::new(bus, "agent", "Writer");
        let executor = AgentExecutor::new(Arc::new(runner) as Arc<dyn AgentRunner>);

        let exec_ctx = Arc::clone(&ctx);
        let task = tokio::spawn(async move { executor.execute(&node, exec_ctx, emitter).await });
        tokio::task::yield_now().await;
        ctx.cancel_token().cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn extract_json_variants() {
        assert_eq!(extract_json(r#"{"a": 1}"#), Some(json!({"a": 1})));
        assert_eq!(
            extract_json("prefix ```json\n{\"a\": 1}\n``` suffix"),
            Some(json!({"a": 1}))
        );
        assert_eq!(
            extract_json(r#"The plan: {"a": {"b": "}"}} trailing"#),
            Some(json!({"a": {"b": "}"}}))
        );
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn validation_requires_query() {
        let executor = AgentExecutor::new(Arc::new(ScriptedRunner::new(json!(null))));
        let node = Node::new("agent", "W", NodeType::ClaudeAgent, json!({"userQuery": ""}));
        assert!(executor.validate(&node).is_err());
        let node = Node::new("agent", "W", NodeType::ClaudeAgent, json!({"userQuery": "go"}));
        assert!(executor.validate(&node).is_ok());
    }
}
