//! Host-implemented execution capabilities
//!
//! wireflow is an orchestration engine, not an agent SDK or a script
//! engine. The two capabilities its executors need from the outside world
//! are defined here as traits:
//!
//! - [`AgentRunner`] drives one streaming agent invocation (a Claude or
//!   Codex session, a local model, a test double). The engine owns
//!   prompts, interpolation, retry and timeout policy; the runner owns
//!   the SDK call.
//! - [`ScriptRunner`] evaluates one scripted transform over a value
//!   bag. Sandboxing beyond the executor-enforced timeout is the host's
//!   concern.
//!
//! Implementations must be `Send + Sync`; the registry shares them behind
//! `Arc` across concurrent node executions. Runners stream progress by
//! pushing [`NodeStreamEvent`] chunks into the channel they are handed;
//! the executor re-emits each chunk as a `node-output` event. Runners are
//! expected to observe the cancellation token at every streaming boundary
//! and return promptly once it fires.

use crate::error::Result;
use crate::event::NodeStreamEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Requested shape of an agent's final output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// One fully-resolved agent invocation.
///
/// Everything here is already interpolated; the runner performs no
/// template expansion.
#[derive(Debug, Clone, Default)]
pub struct AgentRequest {
    /// The user-facing prompt, feedback prelude included on re-runs
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub tools: Vec<String>,
    pub mcp_servers: Vec<String>,
    pub working_directory: Option<String>,
    pub max_turns: Option<u32>,
    pub output_format: OutputFormat,
    /// Schema the output must satisfy when `output_format` is `Json`
    pub output_schema: Option<Value>,
    /// Prior session to resume, when the conversation persists across runs
    pub resume_session: Option<String>,
}

/// What an agent invocation produced.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// Finalized node output (text or parsed JSON per the request format)
    pub output: Value,
    /// Session identifier for later resumption, when the runner has one
    pub session_id: Option<String>,
}

/// Streaming agent invocation capability.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run one agent invocation to completion.
    ///
    /// Progress chunks go into `chunks` as they happen; the final output
    /// is returned. A dropped `chunks` receiver is not an error; the
    /// runner should keep going and return its outcome. When `cancel`
    /// fires the runner abandons outstanding I/O and returns
    /// [`EngineError::Cancelled`](crate::EngineError::Cancelled).
    async fn run(
        &self,
        request: AgentRequest,
        chunks: mpsc::Sender<NodeStreamEvent>,
        cancel: CancellationToken,
    ) -> Result<AgentOutcome>;
}

/// Scripted-transform evaluation capability.
///
/// `inputs` is a JSON object mapping names chosen by the node's
/// `inputMappings` to upstream outputs. The script must produce a
/// JSON-representable value and may read nothing outside its inputs.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn evaluate(&self, code: &str, inputs: Value) -> Result<Value>;
}

/// The capability bundle the built-in node registry wires executors with.
#[derive(Clone)]
pub struct Runners {
    pub claude: Arc<dyn AgentRunner>,
    pub codex: Arc<dyn AgentRunner>,
    pub script: Arc<dyn ScriptRunner>,
}

impl Runners {
    /// One agent runner for both agent node types; useful in tests and
    /// single-provider hosts.
    pub fn uniform(agent: Arc<dyn AgentRunner>, script: Arc<dyn ScriptRunner>) -> Self {
        Self {
            claude: Arc::clone(&agent),
            codex: agent,
            script,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use serde_json::json;

    struct EchoRunner;

    #[async_trait]
    impl AgentRunner for EchoRunner {
        async fn run(
            &self,
            request: AgentRequest,
            chunks: mpsc::Sender<NodeStreamEvent>,
            cancel: CancellationToken,
        ) -> Result<AgentOutcome> {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let _ = chunks
                .send(NodeStreamEvent::TextDelta { text: request.prompt.clone() })
                .await;
            Ok(AgentOutcome {
                output: json!({"text": request.prompt}),
                session_id: Some("session-1".into()),
            })
        }
    }

    struct IdentityScript;

    #[async_trait]
    impl ScriptRunner for IdentityScript {
        async fn evaluate(&self, _code: &str, inputs: Value) -> Result<Value> {
            Ok(inputs)
        }
    }

    #[tokio::test]
    async fn mock_runner_streams_then_returns() {
        let (tx, mut rx) = mpsc::channel(8);
        let outcome = EchoRunner
            .run(
                AgentRequest {
                    prompt: "hello".into(),
                    ..AgentRequest::default()
                },
                tx,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.output["text"], "hello");
        assert_eq!(outcome.session_id.as_deref(), Some("session-1"));
        assert_eq!(
            rx.recv().await,
            Some(NodeStreamEvent::TextDelta { text: "hello".into() })
        );
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = EchoRunner
            .run(AgentRequest::default(), tx, cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn uniform_bundle_shares_one_agent() {
        let runners = Runners::uniform(Arc::new(EchoRunner), Arc::new(IdentityScript));
        let result = runners.script.evaluate("code", json!({"a": 1})).await.unwrap();
        assert_eq!(result, json!({"a": 1}));

        let (tx, _rx) = mpsc::channel(8);
        let outcome = runners
            .codex
            .run(
                AgentRequest { prompt: "shared".into(), ..AgentRequest::default() },
                tx,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.output["text"], "shared");
    }
}
