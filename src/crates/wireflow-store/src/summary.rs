//! Persistence shapes for executions
//!
//! An [`ExecutionSummary`] is the durable record of one workflow run: its
//! terminal status, per-node results, and enough metadata to replay the run
//! from an arbitrary node later. Summaries are written by the engine at run
//! boundaries and read back by the replay planner, so the shapes here are
//! wire shapes: serde camelCase JSON, stable across versions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Terminal (or in-flight) status of a whole execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Execution is still in flight
    Running,
    /// Execution reached its output nodes
    Complete,
    /// Execution aborted on a node failure
    Error,
    /// Execution was interrupted by the caller
    Interrupted,
}

/// Lifecycle status of a single node within one run.
///
/// Every execution node starts `pending`, moves to `running` when
/// dispatched, parks at `waiting` while suspended on an approval, and
/// settles at `complete`, `error`, or `skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Running,
    Complete,
    Error,
    Skipped,
    Waiting,
}

impl NodeStatus {
    /// Whether this status is terminal for the node within the run.
    pub fn is_settled(&self) -> bool {
        matches!(self, NodeStatus::Complete | NodeStatus::Error | NodeStatus::Skipped)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Complete => "complete",
            NodeStatus::Error => "error",
            NodeStatus::Skipped => "skipped",
            NodeStatus::Waiting => "waiting",
        };
        f.write_str(s)
    }
}

/// Per-node record inside an [`ExecutionSummary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub status: NodeStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Last successful output of the node, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl NodeRecord {
    pub fn pending() -> Self {
        Self {
            status: NodeStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
        }
    }
}

/// Durable record of one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub workflow_id: String,
    pub workflow_name: String,

    /// The input the run was started with
    pub input: Value,

    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_directory: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_result: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Per-node results keyed by node id
    #[serde(default)]
    pub nodes: HashMap<String, NodeRecord>,

    /// Node configuration bags as they were when the run started, keyed
    /// by node id. Replay compares these against the current workflow to
    /// decide whether a prior output is safe to reuse.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub node_configs: HashMap<String, Value>,
}

impl ExecutionSummary {
    /// Record for a run that just started.
    pub fn started(
        execution_id: impl Into<String>,
        workflow_id: impl Into<String>,
        workflow_name: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            workflow_id: workflow_id.into(),
            workflow_name: workflow_name.into(),
            input,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            working_directory: None,
            output_directory: None,
            final_result: None,
            error: None,
            nodes: HashMap::new(),
            node_configs: HashMap::new(),
        }
    }

    /// The record for `node_id`, if the node ran in this execution.
    pub fn node(&self, node_id: &str) -> Option<&NodeRecord> {
        self.nodes.get(node_id)
    }

    /// Whether `node_id` completed successfully in this execution.
    pub fn node_completed(&self, node_id: &str) -> bool {
        self.nodes
            .get(node_id)
            .map(|r| r.status == NodeStatus::Complete)
            .unwrap_or(false)
    }
}
