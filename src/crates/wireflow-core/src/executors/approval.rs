//! Human-approval gate: suspends until a decision arrives
//!
//! Execution parks on the process-wide [`ApprovalRegistry`] and resumes
//! on exactly one of: a submitted response, the per-node timeout, a
//! targeted cancel, or engine cancellation. The emitted `node-waiting`
//! event carries everything a UI needs to render the request: prompt,
//! selected upstream data, and the deadline.

use super::{NodeExecution, NodeExecutor};
use crate::approval::{ApprovalOutcome, ApprovalRegistry, ApprovalRequest, ApprovalResponse};
use crate::bus::EventEmitter;
use crate::context::{get_nested_value, ExecutionContext};
use crate::error::{EngineError, Result};
use crate::workflow::Node;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// What to do when the approval deadline passes without a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutAction {
    Approve,
    #[default]
    Reject,
    Fail,
}

/// Selects upstream output fields for the approver to see.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSelection {
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub node_name: Option<String>,
    /// Dotted paths into the node's output; empty means the whole output
    #[serde(default)]
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalNodeConfig {
    pub prompt_message: String,
    pub input_selections: Vec<InputSelection>,
    #[serde(default)]
    pub feedback_prompt: Option<String>,
    #[serde(default)]
    pub timeout_minutes: Option<f64>,
    #[serde(default)]
    pub timeout_action: TimeoutAction,
}

pub struct ApprovalExecutor {
    registry: Arc<ApprovalRegistry>,
}

impl ApprovalExecutor {
    pub fn new(registry: Arc<ApprovalRegistry>) -> Self {
        Self { registry }
    }

    /// Resolve each selection and collect display data keyed by node name.
    ///
    /// Name lookup is preferred, falling back to id; absent selections
    /// are skipped rather than failing the gate. Empty `fields` includes
    /// the whole output; otherwise each dotted path present in the output
    /// is included under its path.
    fn gather_display_data(
        config: &ApprovalNodeConfig,
        ctx: &ExecutionContext,
    ) -> Value {
        let mut display = Map::new();
        for selection in &config.input_selections {
            let node_id = selection
                .node_name
                .as_deref()
                .and_then(|name| ctx.node_id_for_name(name))
                .map(str::to_string)
                .or_else(|| selection.node_id.clone());
            let Some(node_id) = node_id else { continue };
            let Some(output) = ctx.output_of(&node_id) else { continue };
            let display_key = ctx
                .node_name_for_id(&node_id)
                .unwrap_or(node_id.as_str())
                .to_string();

            if selection.fields.is_empty() {
                display.insert(display_key, output);
            } else {
                let mut fields = Map::new();
                for path in &selection.fields {
                    if let Some(value) = get_nested_value(&output, path) {
                        fields.insert(path.clone(), value);
                    }
                }
                display.insert(display_key, Value::Object(fields));
            }
        }
        Value::Object(display)
    }

    fn timeout_of(config: &ApprovalNodeConfig) -> Option<Duration> {
        match config.timeout_minutes {
            Some(minutes) if minutes > 0.0 => Some(Duration::from_secs_f64(minutes * 60.0)),
            _ => None,
        }
    }
}

#[async_trait]
impl NodeExecutor for ApprovalExecutor {
    fn validate(&self, node: &Node) -> Result<()> {
        let config: ApprovalNodeConfig = node.typed_config()?;
        if config.prompt_message.trim().is_empty() {
            return Err(EngineError::node_config(&node.id, "promptMessage must not be empty"));
        }
        if config.input_selections.is_empty() {
            return Err(EngineError::node_config(&node.id, "inputSelections must not be empty"));
        }
        if let Some(minutes) = config.timeout_minutes {
            if minutes < 0.0 || !minutes.is_finite() {
                return Err(EngineError::node_config(&node.id, "timeoutMinutes must be >= 0"));
            }
        }
        Ok(())
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: Arc<ExecutionContext>,
        emitter: EventEmitter,
    ) -> Result<NodeExecution> {
        let config: ApprovalNodeConfig = node.typed_config()?;

        let display_data = Self::gather_display_data(&config, &ctx);
        let timeout = Self::timeout_of(&config);
        let request = ApprovalRequest {
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            prompt_message: ctx.interpolate(&config.prompt_message),
            feedback_prompt: config.feedback_prompt.clone(),
            display_data: display_data.clone(),
            timeout_at: timeout.map(|d| {
                Utc::now() + chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
            }),
        };

        // Park before announcing, so a host reacting to the event can
        // submit immediately.
        let receiver = self
            .registry
            .register(&ctx.execution_id, &node.id, timeout);
        ctx.mark_waiting(&node.id);
        emitter.node_waiting(request).await;
        tracing::info!(node = %node.id, "approval waiting");

        let outcome = receiver
            .await
            .unwrap_or(ApprovalOutcome::Interrupted);

        let response = match outcome {
            ApprovalOutcome::Submitted(response) => response,
            ApprovalOutcome::TimedOut => match config.timeout_action {
                TimeoutAction::Approve => ApprovalResponse::approved(),
                TimeoutAction::Reject => {
                    ApprovalResponse::rejected("Timed out waiting for approval")
                }
                TimeoutAction::Fail => {
                    return Err(EngineError::ApprovalTimeout { node: node.id.clone() })
                }
            },
            ApprovalOutcome::Cancelled => {
                return Err(EngineError::Custom("Approval cancelled".into()))
            }
            ApprovalOutcome::Interrupted => return Err(EngineError::Cancelled),
        };

        ctx.set_variable(format!("node.{}.approved", node.id), json!(response.approved));
        ctx.set_variable(
            format!("node.{}.feedback", node.id),
            response.feedback.clone().map(Value::String).unwrap_or(Value::Null),
        );

        let mut output = Map::new();
        output.insert("approved".into(), json!(response.approved));
        if let Some(feedback) = &response.feedback {
            output.insert("feedback".into(), json!(feedback));
        }
        output.insert("respondedAt".into(), json!(response.responded_at));
        output.insert("displayedData".into(), display_data);
        Ok(NodeExecution::of(Value::Object(output)))
    }

    fn output_handle(&self, result: &NodeExecution, _node: &Node) -> Option<String> {
        let approved = result.output["approved"].as_bool().unwrap_or(false);
        Some(if approved { "approved" } else { "rejected" }.to_string())
    }
}
