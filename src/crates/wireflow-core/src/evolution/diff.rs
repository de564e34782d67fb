//! Workflow diff helper for evolution observability

use crate::workflow::Workflow;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// Set-level difference between two workflow versions.
///
/// Node entries are node ids; edge entries are `"source->target"` (with
/// the source handle suffixed as `#handle` when present) so logs stay
/// readable without carrying synthetic edge ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDiff {
    pub added_nodes: Vec<String>,
    pub removed_nodes: Vec<String>,
    pub changed_nodes: Vec<String>,
    pub added_edges: Vec<String>,
    pub removed_edges: Vec<String>,
}

impl WorkflowDiff {
    pub fn is_empty(&self) -> bool {
        self.added_nodes.is_empty()
            && self.removed_nodes.is_empty()
            && self.changed_nodes.is_empty()
            && self.added_edges.is_empty()
            && self.removed_edges.is_empty()
    }
}

/// Compare two workflow versions structurally.
pub fn describe_workflow_diff(before: &Workflow, after: &Workflow) -> WorkflowDiff {
    let before_nodes: HashMap<&str, &crate::workflow::Node> =
        before.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    let after_nodes: HashMap<&str, &crate::workflow::Node> =
        after.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    let mut added_nodes = Vec::new();
    let mut changed_nodes = Vec::new();
    for (id, node) in &after_nodes {
        match before_nodes.get(id) {
            None => added_nodes.push((*id).to_string()),
            Some(previous) => {
                let changed = previous.name != node.name
                    || previous.node_type != node.node_type
                    || previous.config != node.config;
                if changed {
                    changed_nodes.push((*id).to_string());
                }
            }
        }
    }
    let mut removed_nodes: Vec<String> = before_nodes
        .keys()
        .filter(|id| !after_nodes.contains_key(*id))
        .map(|id| id.to_string())
        .collect();

    let edge_key = |e: &crate::workflow::Edge| match &e.source_handle {
        Some(handle) => format!("{}->{}#{handle}", e.source, e.target),
        None => format!("{}->{}", e.source, e.target),
    };
    let before_edges: BTreeSet<String> = before.edges.iter().map(edge_key).collect();
    let after_edges: BTreeSet<String> = after.edges.iter().map(edge_key).collect();

    let added_edges: Vec<String> = after_edges.difference(&before_edges).cloned().collect();
    let removed_edges: Vec<String> = before_edges.difference(&after_edges).cloned().collect();

    added_nodes.sort();
    removed_nodes.sort();
    changed_nodes.sort();

    WorkflowDiff {
        added_nodes,
        removed_nodes,
        changed_nodes,
        added_edges,
        removed_edges,
    }
}
