//! Partial replay planning
//!
//! Given a prior execution's summary and a target node, [`ReplayPlanner`]
//! partitions the current workflow into **reused** nodes (prior outputs
//! seeded into the new run), **re-executed** nodes (the target and its
//! transitive descendants), and **new** nodes added since the source run
//! (always re-executed, with a warning).
//!
//! Reuse is conservative: a node whose configuration changed since the
//! source run (byte-wise, against the config captured in the summary) is
//! demoted to re-execute with a warning rather than silently replaying a
//! stale output.

use crate::engine::EngineOptions;
use crate::error::{EngineError, Result, ValidationIssue};
use crate::workflow::Workflow;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;
use wireflow_store::{ExecutionStatus, ExecutionSummary, NodeStatus};

/// The computed plan for one replay.
#[derive(Debug, Clone)]
pub struct ReplayPlan {
    /// Fresh execution id for the new run
    pub execution_id: String,
    /// Nodes whose prior outputs are seeded
    pub reused: Vec<String>,
    /// The target node and its transitive descendants
    pub re_executed: Vec<String>,
    /// Nodes added since the source execution
    pub new_nodes: Vec<String>,
    /// Demotions and additions worth surfacing to the caller
    pub warnings: Vec<String>,
    /// Outputs copied (not aliased) out of the source summary
    pub seeded_outputs: HashMap<String, Value>,
    /// Resolved working directory: explicit > source > engine default
    pub working_directory: Option<String>,
}

impl ReplayPlan {
    /// Engine options carrying this plan's seeds into a new run.
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            execution_id: Some(self.execution_id.clone()),
            working_directory: self.working_directory.clone(),
            seeded_outputs: self.seeded_outputs.clone(),
        }
    }
}

pub struct ReplayPlanner;

impl ReplayPlanner {
    /// Compute the replay partition for `from_node_id`.
    ///
    /// # Errors
    ///
    /// [`EngineError::Validation`] with every blocking finding: missing
    /// target node, target absent from the source execution, a source
    /// run that was interrupted before the target completed, or a
    /// workflow whose terminal nodes were removed since the source run.
    pub fn plan(
        workflow: &Workflow,
        source: &ExecutionSummary,
        from_node_id: &str,
        explicit_working_directory: Option<String>,
    ) -> Result<ReplayPlan> {
        let mut issues = Vec::new();

        if workflow.node(from_node_id).is_none() {
            issues.push(ValidationIssue::for_node(
                "REPLAY_NODE_MISSING",
                format!("node '{from_node_id}' does not exist in the current workflow"),
                from_node_id.to_string(),
            ));
        }
        let source_record = source.node(from_node_id);
        if source_record.is_none() {
            issues.push(ValidationIssue::for_node(
                "REPLAY_NOT_IN_SOURCE",
                format!("node '{from_node_id}' did not run in execution '{}'", source.execution_id),
                from_node_id.to_string(),
            ));
        }
        if source.status == ExecutionStatus::Interrupted {
            let reached_target = source_record
                .map(|r| r.status == NodeStatus::Complete || r.status == NodeStatus::Skipped)
                .unwrap_or(false);
            if !reached_target {
                issues.push(ValidationIssue::new(
                    "REPLAY_SOURCE_INTERRUPTED",
                    format!(
                        "execution '{}' was interrupted before '{from_node_id}' settled",
                        source.execution_id
                    ),
                ));
            }
        }
        if workflow.input_node().is_none() {
            issues.push(ValidationIssue::new(
                "REPLAY_MISSING_INPUT",
                "the current workflow no longer has a unique input node",
            ));
        }
        if workflow.output_nodes().next().is_none() {
            issues.push(ValidationIssue::new(
                "REPLAY_MISSING_OUTPUT",
                "the current workflow no longer has an output node",
            ));
        }
        if !issues.is_empty() {
            return Err(EngineError::Validation(issues));
        }

        let mut re_executed_set: HashSet<String> = workflow.descendants_of(from_node_id);
        re_executed_set.insert(from_node_id.to_string());

        let mut reused = Vec::new();
        let mut new_nodes = Vec::new();
        let mut warnings = Vec::new();
        let mut seeded_outputs = HashMap::new();

        for node in &workflow.nodes {
            if re_executed_set.contains(&node.id) {
                continue;
            }
            if !source.nodes.contains_key(&node.id) {
                warnings.push(format!(
                    "node '{}' was added after the source execution; it will re-execute",
                    node.name
                ));
                new_nodes.push(node.id.clone());
                continue;
            }
            if !source.node_completed(&node.id) {
                // Never completed in the source: nothing to reuse.
                re_executed_set.insert(node.id.clone());
                continue;
            }
            match source.node_configs.get(&node.id) {
                Some(config) if *config == node.config => {
                    if let Some(output) = source.node(&node.id).and_then(|r| r.result.clone()) {
                        seeded_outputs.insert(node.id.clone(), output);
                        reused.push(node.id.clone());
                    } else {
                        re_executed_set.insert(node.id.clone());
                    }
                }
                Some(_) => {
                    warnings.push(format!(
                        "node '{}' changed configuration since the source execution; demoted to re-execute",
                        node.name
                    ));
                    re_executed_set.insert(node.id.clone());
                }
                None => {
                    warnings.push(format!(
                        "node '{}' has no captured configuration in the source execution; demoted to re-execute",
                        node.name
                    ));
                    re_executed_set.insert(node.id.clone());
                }
            }
        }

        let mut re_executed: Vec<String> = workflow
            .nodes
            .iter()
            .filter(|n| re_executed_set.contains(&n.id))
            .map(|n| n.id.clone())
            .collect();
        re_executed.sort();

        let working_directory =
            explicit_working_directory.or_else(|| source.working_directory.clone());

        tracing::info!(
            from = from_node_id,
            reused = reused.len(),
            re_executed = re_executed.len(),
            added = new_nodes.len(),
            "replay planned"
        );

        Ok(ReplayPlan {
            execution_id: format!("exec-{}", Uuid::new_v4()),
            reused,
            re_executed,
            new_nodes,
            warnings,
            seeded_outputs,
            working_directory,
        })
    }
}
