//! Node executors
//!
//! One executor exists per node type. Executors are pure contract
//! implementations: they validate a node's configuration before the run
//! starts, execute the node against the shared [`ExecutionContext`], and
//! optionally nominate a named output handle that drives branch masking.
//!
//! Executors never touch scheduling state; readiness, skipping, and
//! event ordering belong to the engine. They stream progress through the
//! [`EventEmitter`] they are handed and observe the context's
//! cancellation token at every suspension point.

mod agent;
mod approval;
mod condition;
mod input;
mod merge;
mod output;
mod script;
mod self_reflect;

pub use agent::{
    AgentExecutor, AgentNodeConfig, AgentOutputConfig, ConversationMode, OnMaxRetries,
    RejectionHandler,
};
pub use approval::{ApprovalExecutor, ApprovalNodeConfig, InputSelection, TimeoutAction};
pub use condition::{ConditionExecutor, ConditionNodeConfig, ConditionOperator, ConditionRule, RuleJoiner};
pub use input::InputExecutor;
pub use merge::{MergeExecutor, MergeStrategy};
pub use output::OutputExecutor;
pub use script::{InputMapping, ScriptExecutor, ScriptNodeConfig};
pub use self_reflect::{ReflectAgentType, SelfReflectConfig, SelfReflectExecutor};

use crate::bus::EventEmitter;
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::workflow::Node;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// What one node execution produced.
#[derive(Debug, Clone)]
pub struct NodeExecution {
    /// The node's output value, recorded in the context and visible to
    /// downstream references
    pub output: Value,
    /// Executor-specific metadata (session ids, rule traces, ...), not
    /// part of the output contract
    pub metadata: Option<Value>,
}

impl NodeExecution {
    pub fn of(output: Value) -> Self {
        Self {
            output,
            metadata: None,
        }
    }

    pub fn with_metadata(output: Value, metadata: Value) -> Self {
        Self {
            output,
            metadata: Some(metadata),
        }
    }
}

/// Contract every node type implements.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Reject misconfigured nodes before the run starts. Called during
    /// the engine's static validation pass.
    fn validate(&self, node: &Node) -> Result<()>;

    /// Execute the node. The context is shared with concurrently running
    /// executors; the emitter is scoped to this node.
    async fn execute(
        &self,
        node: &Node,
        ctx: Arc<ExecutionContext>,
        emitter: EventEmitter,
    ) -> Result<NodeExecution>;

    /// Nominate a named output handle for branch masking. `None` means
    /// the single unnamed output.
    fn output_handle(&self, _result: &NodeExecution, _node: &Node) -> Option<String> {
        None
    }
}

/// Gather the outputs of a node's completed predecessors: one
/// predecessor yields its value directly, several yield a map keyed by
/// node name. Skipped predecessors contribute nothing.
pub(crate) fn gather_predecessor_outputs(node: &Node, ctx: &ExecutionContext) -> Value {
    let mut collected: Vec<(String, Value)> = Vec::new();
    for pred_id in ctx.predecessors_of(&node.id) {
        if let Some(output) = ctx.output_of(&pred_id) {
            if ctx.status_of(&pred_id) == wireflow_store::NodeStatus::Complete {
                let name = ctx
                    .node_name_for_id(&pred_id)
                    .unwrap_or(pred_id.as_str())
                    .to_string();
                collected.push((name, output));
            }
        }
    }

    match collected.len() {
        0 => Value::Null,
        1 => collected.remove(0).1,
        _ => Value::Object(collected.into_iter().collect()),
    }
}
