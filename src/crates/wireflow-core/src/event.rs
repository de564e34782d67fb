//! Execution event stream model
//!
//! Every observable thing that happens during a run is an
//! [`ExecutionEvent`]: a serde tagged union matching the wire shape the
//! host surface forwards over its transport (one JSON message per event).
//! Executor-level streaming (agent token deltas, tool invocations) rides
//! inside `node-output` events as a nested [`NodeStreamEvent`] union.
//!
//! # Ordering contract
//!
//! For a single node, events are delivered in emission order. Across
//! nodes the only guarantees are: `execution-start` precedes all node
//! events; `node-start` for node *n* precedes every `node-output` /
//! `node-complete` / `node-error` bearing *n*; a terminal event
//! (`execution-complete`, `execution-error`, `validation-error`) follows
//! everything and is always last. There is no total order across nodes;
//! subscribers that need one must sort by the per-event timestamp.
//!
//! Timestamps are assigned once, at emission, by the event bus.

use crate::approval::ApprovalRequest;
use crate::error::ValidationIssue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-executor streaming event, re-emitted by the engine inside
/// [`ExecutionEvent::NodeOutput`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum NodeStreamEvent {
    /// Incremental text from an agent runner
    TextDelta { text: String },

    /// Agent invoked a tool
    ToolUse {
        tool: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        input: Option<Value>,
    },

    /// Tool returned to the agent
    ToolResult {
        tool: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
    },

    /// Extended reasoning from a thinking model
    Thinking { text: String },

    /// Agent updated its plan / todo list
    TodoList { items: Vec<String> },

    /// Executor finished; carries the finalized output when available
    Complete {
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },

    /// Executor-level error chunk (the node may still recover or fail)
    Error { message: String },

    /// A rejection-feedback cycle re-entered this node; `run_count` is the
    /// incremented per-node run counter
    RunStart { run_count: u32 },
}

/// One event on an execution's ordered stream.
///
/// The serde representation is a tagged union with kebab-case tags, so a
/// `node-complete` serializes as
/// `{"type":"node-complete","executionId":...,"nodeId":...,...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ExecutionEvent {
    ExecutionStart {
        execution_id: String,
        workflow_id: String,
        timestamp: DateTime<Utc>,
    },

    NodeStart {
        execution_id: String,
        node_id: String,
        node_name: String,
        run_count: u32,
        timestamp: DateTime<Utc>,
    },

    NodeOutput {
        execution_id: String,
        node_id: String,
        event: NodeStreamEvent,
        timestamp: DateTime<Utc>,
    },

    NodeComplete {
        execution_id: String,
        node_id: String,
        result: Value,
        timestamp: DateTime<Utc>,
    },

    NodeError {
        execution_id: String,
        node_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// An approval executor suspended; carries everything a UI needs to
    /// render the request
    NodeWaiting {
        execution_id: String,
        node_id: String,
        node_name: String,
        approval: ApprovalRequest,
        timestamp: DateTime<Utc>,
    },

    ExecutionComplete {
        execution_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        timestamp: DateTime<Utc>,
    },

    ExecutionError {
        execution_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Pre-run validation rejected the workflow; emitted instead of
    /// `execution-start`, never after it
    ValidationError {
        execution_id: String,
        errors: Vec<ValidationIssue>,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    /// The execution this event belongs to.
    pub fn execution_id(&self) -> &str {
        match self {
            ExecutionEvent::ExecutionStart { execution_id, .. }
            | ExecutionEvent::NodeStart { execution_id, .. }
            | ExecutionEvent::NodeOutput { execution_id, .. }
            | ExecutionEvent::NodeComplete { execution_id, .. }
            | ExecutionEvent::NodeError { execution_id, .. }
            | ExecutionEvent::NodeWaiting { execution_id, .. }
            | ExecutionEvent::ExecutionComplete { execution_id, .. }
            | ExecutionEvent::ExecutionError { execution_id, .. }
            | ExecutionEvent::ValidationError { execution_id, .. } => execution_id,
        }
    }

    /// Emission timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ExecutionEvent::ExecutionStart { timestamp, .. }
            | ExecutionEvent::NodeStart { timestamp, .. }
            | ExecutionEvent::NodeOutput { timestamp, .. }
            | ExecutionEvent::NodeComplete { timestamp, .. }
            | ExecutionEvent::NodeError { timestamp, .. }
            | ExecutionEvent::NodeWaiting { timestamp, .. }
            | ExecutionEvent::ExecutionComplete { timestamp, .. }
            | ExecutionEvent::ExecutionError { timestamp, .. }
            | ExecutionEvent::ValidationError { timestamp, .. } => *timestamp,
        }
    }

    /// The node this event concerns, when node-scoped.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            ExecutionEvent::NodeStart { node_id, .. }
            | ExecutionEvent::NodeOutput { node_id, .. }
            | ExecutionEvent::NodeComplete { node_id, .. }
            | ExecutionEvent::NodeError { node_id, .. }
            | ExecutionEvent::NodeWaiting { node_id, .. } => Some(node_id),
            _ => None,
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionEvent::ExecutionComplete { .. }
                | ExecutionEvent::ExecutionError { .. }
                | ExecutionEvent::ValidationError { .. }
        )
    }
}
