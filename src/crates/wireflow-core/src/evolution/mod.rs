//! Self-modification of workflows: proposed mutations, validation, and
//! transactional application
//!
//! A `self-reflect` node drives an agent to propose a
//! [`WorkflowEvolution`]: reasoning plus an ordered mutation batch. The
//! batch passes through the [`validator`] (schema, scope, cycle, and
//! self-protection rules; every error collected, nothing applied), and,
//! when the node runs in `auto-apply` mode, the [`applier`] snapshots
//! the workflow, applies the batch to a deep copy, persists atomically
//! through the store, and journals an [`EvolutionRecord`].
//!
//! Mutations never touch an in-flight execution: the engine reads its own
//! immutable copy of the workflow for the duration of a run.

pub mod applier;
pub mod diff;
pub mod validator;

pub use applier::{EvolutionApplier, project_evolution};
pub use diff::{describe_workflow_diff, WorkflowDiff};
pub use validator::{validate_evolution, EvolutionValidation, ValidateOptions};

use crate::workflow::Workflow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a self-reflect node disposes of a validated evolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EvolutionMode {
    /// Propose only; nothing is applied or projected
    #[default]
    Suggest,
    /// Validate and apply through the store
    AutoApply,
    /// Validate and project the outcome without persisting
    DryRun,
}

/// Mutation scope classes for policy enforcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvolutionScope {
    Prompts,
    Models,
    Tools,
    Nodes,
    Edges,
    Parameters,
}

/// A node being added by an `add-node` mutation.
///
/// Loosely typed on purpose: the validator produces precise errors
/// (unknown type, bad position, missing required config) instead of a
/// serde failure swallowing the whole batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDraft {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub position: Value,
    #[serde(default)]
    pub data: Value,
}

/// One proposed graph mutation. Tagged by `op` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Mutation {
    UpdateNodeConfig {
        node_id: String,
        path: String,
        value: Value,
    },

    /// Shorthand for updating an agent node's prompt field
    UpdatePrompt { node_id: String, value: String },

    /// Shorthand for updating a node's declared model field
    UpdateModel { node_id: String, value: String },

    AddNode {
        node: NodeDraft,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        connect_from: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        connect_to: Option<String>,
    },

    RemoveNode { node_id: String },

    AddEdge {
        source: String,
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_handle: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_handle: Option<String>,
    },

    /// Removes an edge by id, or by endpoints when the id is unknown
    RemoveEdge {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        edge_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_handle: Option<String>,
    },

    UpdateWorkflowSetting { field: String, value: Value },
}

impl Mutation {
    /// The wire tag of this op, for error messages.
    pub fn op(&self) -> &'static str {
        match self {
            Mutation::UpdateNodeConfig { .. } => "update-node-config",
            Mutation::UpdatePrompt { .. } => "update-prompt",
            Mutation::UpdateModel { .. } => "update-model",
            Mutation::AddNode { .. } => "add-node",
            Mutation::RemoveNode { .. } => "remove-node",
            Mutation::AddEdge { .. } => "add-edge",
            Mutation::RemoveEdge { .. } => "remove-edge",
            Mutation::UpdateWorkflowSetting { .. } => "update-workflow-setting",
        }
    }
}

/// What the reflection agent proposed, as parsed from its output.
///
/// Mutations stay raw [`Value`]s here; sanitization and typed parsing
/// happen in the validator so malformed entries surface as collected
/// errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowEvolution {
    pub reasoning: String,
    pub mutations: Vec<Value>,
    pub expected_impact: String,
    pub risk_assessment: String,
}

/// A sanitized evolution: typed mutations that survived parsing.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizedEvolution {
    pub reasoning: String,
    pub mutations: Vec<Mutation>,
    pub expected_impact: String,
    pub risk_assessment: String,
}

/// Immutable deep copy of a workflow at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSnapshot {
    pub captured_at: DateTime<Utc>,
    pub workflow: Workflow,
}

impl WorkflowSnapshot {
    pub fn capture(workflow: &Workflow) -> Self {
        Self {
            captured_at: Utc::now(),
            workflow: workflow.clone(),
        }
    }
}

/// One line of a workflow's append-only evolution journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionRecord {
    pub timestamp: DateTime<Utc>,
    pub workflow_id: String,
    pub execution_id: String,
    pub self_node_id: String,
    pub mode: EvolutionMode,
    pub mutations: Vec<Mutation>,
    pub before_snapshot: WorkflowSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_snapshot: Option<WorkflowSnapshot>,
    pub applied: bool,
    pub reasoning: String,
    pub expected_impact: String,
    pub risk_assessment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mutations_parse_from_tagged_json() {
        let mutation: Mutation = serde_json::from_value(json!({
            "op": "update-node-config",
            "nodeId": "agent-1",
            "path": "outputConfig.format",
            "value": "json"
        }))
        .unwrap();
        assert_eq!(mutation.op(), "update-node-config");

        let mutation: Mutation = serde_json::from_value(json!({
            "op": "add-edge",
            "source": "a",
            "target": "b",
            "sourceHandle": "true"
        }))
        .unwrap();
        match mutation {
            Mutation::AddEdge { source, source_handle, .. } => {
                assert_eq!(source, "a");
                assert_eq!(source_handle.as_deref(), Some("true"));
            }
            other => panic!("unexpected mutation: {other:?}"),
        }
    }

    #[test]
    fn unknown_op_fails_typed_parse() {
        let result: std::result::Result<Mutation, _> =
            serde_json::from_value(json!({"op": "rewrite-everything"}));
        assert!(result.is_err());
    }

    #[test]
    fn evolution_defaults_missing_fields() {
        let evolution: WorkflowEvolution = serde_json::from_value(json!({
            "mutations": [{"op": "remove-node", "nodeId": "x"}]
        }))
        .unwrap();
        assert_eq!(evolution.reasoning, "");
        assert_eq!(evolution.expected_impact, "");
        assert_eq!(evolution.mutations.len(), 1);
    }

    #[test]
    fn record_round_trips_jsonl_line() {
        let workflow = Workflow::new("wf-1", "Demo");
        let record = EvolutionRecord {
            timestamp: Utc::now(),
            workflow_id: "wf-1".into(),
            execution_id: "exec-1".into(),
            self_node_id: "self-1".into(),
            mode: EvolutionMode::AutoApply,
            mutations: vec![Mutation::UpdateWorkflowSetting {
                field: "name".into(),
                value: json!("Renamed"),
            }],
            before_snapshot: WorkflowSnapshot::capture(&workflow),
            after_snapshot: None,
            applied: false,
            reasoning: "tidy".into(),
            expected_impact: "clearer naming".into(),
            risk_assessment: "low".into(),
            validation_errors: Some(vec!["scope violation".into()]),
        };

        let line = serde_json::to_string(&record).unwrap();
        let back: EvolutionRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back.mode, EvolutionMode::AutoApply);
        assert_eq!(back.mutations.len(), 1);
        assert_eq!(back.validation_errors.unwrap().len(), 1);
    }
}
