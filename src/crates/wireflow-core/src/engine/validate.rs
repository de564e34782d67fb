//! Pre-run workflow validation
//!
//! Runs before `execution-start` can be emitted and collects every
//! finding rather than stopping at the first. Structural checks cover
//! the workflow invariants (single input, reachable output, no orphans,
//! unique names, acyclicity); per-node configuration checks delegate to
//! each executor's `validate`.
//!
//! Rejection-feedback edges (an approval's `rejected` handle pointing
//! back at one of its ancestors) are control edges, not data edges.
//! They are exempt from the acyclicity check; the engine drives the loop
//! they describe explicitly.

use crate::error::ValidationIssue;
use crate::registry::NodeRegistry;
use crate::workflow::{detect_cycle, NodeType, Workflow};
use std::collections::{HashMap, HashSet, VecDeque};

/// Outgoing approval edges that close a loop back onto an ancestor.
///
/// An edge qualifies when its source is an approval node and its target
/// can reach the source through the remaining edges, i.e. removing the
/// edge leaves the target an ancestor of the approval.
pub fn compute_feedback_edges(workflow: &Workflow) -> HashSet<String> {
    let mut feedback = HashSet::new();
    for edge in &workflow.edges {
        let source_is_approval = workflow
            .node(&edge.source)
            .map(|n| n.node_type == NodeType::Approval)
            .unwrap_or(false);
        if !source_is_approval {
            continue;
        }
        if reaches(workflow, &edge.target, &edge.source, &edge.id) {
            feedback.insert(edge.id.clone());
        }
    }
    feedback
}

/// Whether `from` reaches `to` without traversing `excluded_edge`.
fn reaches(workflow: &Workflow, from: &str, to: &str, excluded_edge: &str) -> bool {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([from.to_string()]);
    while let Some(current) = queue.pop_front() {
        if current == to {
            return true;
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        for edge in workflow.outgoing_edges(&current) {
            if edge.id != excluded_edge {
                queue.push_back(edge.target.clone());
            }
        }
    }
    false
}

/// Validate `workflow` for execution. Empty result means runnable.
pub fn validate_workflow(workflow: &Workflow, registry: &NodeRegistry) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if workflow.nodes.is_empty() {
        issues.push(ValidationIssue::new("EMPTY_WORKFLOW", "workflow has no nodes"));
        return issues;
    }

    let node_ids: HashSet<&str> = workflow.nodes.iter().map(|n| n.id.as_str()).collect();

    // Terminal counts.
    let input_count = workflow
        .nodes
        .iter()
        .filter(|n| n.node_type == NodeType::Input)
        .count();
    match input_count {
        0 => issues.push(ValidationIssue::new("MISSING_INPUT", "workflow has no input node")),
        1 => {}
        _ => issues.push(ValidationIssue::new(
            "MULTIPLE_INPUT",
            format!("workflow has {input_count} input nodes; exactly one is required"),
        )),
    }
    if workflow.output_nodes().next().is_none() {
        issues.push(ValidationIssue::new("MISSING_OUTPUT", "workflow has no output node"));
    }

    // Edge endpoint existence and self-loops.
    for edge in &workflow.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !node_ids.contains(endpoint.as_str()) {
                issues.push(ValidationIssue::new(
                    "EDGE_ENDPOINT",
                    format!("edge '{}' references missing node '{endpoint}'", edge.id),
                ));
            }
        }
        if edge.source == edge.target {
            issues.push(ValidationIssue::new(
                "SELF_LOOP",
                format!("edge '{}' loops node '{}' onto itself", edge.id, edge.source),
            ));
        }
    }

    // Unique names.
    let mut seen_names: HashMap<&str, &str> = HashMap::new();
    for node in &workflow.nodes {
        if let Some(previous) = seen_names.insert(node.name.as_str(), node.id.as_str()) {
            issues.push(ValidationIssue::for_node(
                "DUPLICATE_NAME",
                format!("node name '{}' is also used by '{previous}'", node.name),
                node.id.clone(),
            ));
        }
    }

    // Acyclicity over data edges (feedback edges exempt).
    let feedback = compute_feedback_edges(workflow);
    let ids: Vec<&str> = workflow.nodes.iter().map(|n| n.id.as_str()).collect();
    let data_edges: Vec<(&str, &str)> = workflow
        .edges
        .iter()
        .filter(|e| !feedback.contains(&e.id))
        .map(|e| (e.source.as_str(), e.target.as_str()))
        .collect();
    if detect_cycle(&ids, &data_edges) {
        issues.push(ValidationIssue::new("CYCLE", "workflow graph contains a cycle"));
    }

    // Orphans: every non-input node needs a predecessor.
    for node in &workflow.nodes {
        if node.node_type == NodeType::Input {
            continue;
        }
        if workflow.incoming_edges(&node.id).next().is_none() {
            issues.push(ValidationIssue::for_node(
                "ORPHANED_NODE",
                format!("node '{}' has no incoming edge", node.name),
                node.id.clone(),
            ));
        }
    }

    // Some output must be reachable from the input along data edges.
    if let Some(input) = workflow.input_node() {
        let mut reachable = HashSet::new();
        let mut queue = VecDeque::from([input.id.clone()]);
        while let Some(current) = queue.pop_front() {
            if !reachable.insert(current.clone()) {
                continue;
            }
            for edge in workflow.outgoing_edges(&current) {
                if !feedback.contains(&edge.id) {
                    queue.push_back(edge.target.clone());
                }
            }
        }
        let output_reachable = workflow.output_nodes().any(|n| reachable.contains(&n.id));
        if !output_reachable {
            issues.push(ValidationIssue::new(
                "OUTPUT_NOT_REACHABLE",
                "no output node is reachable from the input node",
            ));
        }
    }

    // Per-node configuration, via each type's executor.
    for node in &workflow.nodes {
        match registry.executor_for(node.node_type) {
            Ok(executor) => {
                if let Err(error) = executor.validate(node) {
                    issues.push(ValidationIssue::for_node(
                        "NODE_CONFIG",
                        error.to_string(),
                        node.id.clone(),
                    ));
                }
            }
            Err(error) => issues.push(ValidationIssue::for_node(
                "NODE_CONFIG",
                error.to_string(),
                node.id.clone(),
            )),
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ApprovalRegistry;
    use crate::config::EngineConfig;
    use crate::error::Result as EngineResult;
    use crate::runner::{AgentOutcome, AgentRequest, AgentRunner, Runners, ScriptRunner};
    use crate::workflow::{Edge, Node};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use wireflow_store::{EvolutionHistory, InMemoryStore};

    struct NullAgent;

    #[async_trait]
    impl AgentRunner for NullAgent {
        async fn run(
            &self,
            _request: AgentRequest,
            _chunks: mpsc::Sender<crate::event::NodeStreamEvent>,
            _cancel: CancellationToken,
        ) -> EngineResult<AgentOutcome> {
            Ok(AgentOutcome { output: Value::Null, session_id: None })
        }
    }

    struct NullScript;

    #[async_trait]
    impl ScriptRunner for NullScript {
        async fn evaluate(&self, _code: &str, inputs: Value) -> EngineResult<Value> {
            Ok(inputs)
        }
    }

    fn registry() -> NodeRegistry {
        NodeRegistry::builtin(
            Runners::uniform(Arc::new(NullAgent), Arc::new(NullScript)),
            Arc::new(ApprovalRegistry::new()),
            Arc::new(InMemoryStore::new()),
            EvolutionHistory::new(std::env::temp_dir().join("wireflow-validate-test")),
            &EngineConfig::default(),
        )
    }

    fn linear() -> Workflow {
        let mut wf = Workflow::new("wf", "Linear");
        wf.nodes = vec![
            Node::new("in", "Input", NodeType::Input, json!({})),
            Node::new("js", "Transform", NodeType::Javascript, json!({"code": "return x"})),
            Node::new("out", "Output", NodeType::Output, json!({})),
        ];
        wf.edges = vec![Edge::new("e1", "in", "js"), Edge::new("e2", "js", "out")];
        wf
    }

    fn codes(issues: &[ValidationIssue]) -> Vec<&str> {
        issues.iter().map(|i| i.code.as_str()).collect()
    }

    #[test]
    fn valid_workflow_passes() {
        assert!(validate_workflow(&linear(), &registry()).is_empty());
    }

    #[test]
    fn missing_terminals() {
        let mut wf = linear();
        wf.nodes.retain(|n| n.node_type != NodeType::Input);
        wf.edges.retain(|e| e.source != "in");
        let issues = validate_workflow(&wf, &registry());
        assert!(codes(&issues).contains(&"MISSING_INPUT"));

        let mut wf = linear();
        wf.nodes.push(Node::new("in2", "Input2", NodeType::Input, json!({})));
        let issues = validate_workflow(&wf, &registry());
        assert!(codes(&issues).contains(&"MULTIPLE_INPUT"));
    }

    #[test]
    fn cycles_orphans_and_duplicates_collected_together() {
        let mut wf = linear();
        wf.edges.push(Edge::new("back", "out", "js"));
        wf.nodes.push(Node::new("lost", "Transform", NodeType::Javascript, json!({"code": "1"})));
        let issues = validate_workflow(&wf, &registry());
        let codes = codes(&issues);
        assert!(codes.contains(&"CYCLE"));
        assert!(codes.contains(&"ORPHANED_NODE"));
        assert!(codes.contains(&"DUPLICATE_NAME"));
    }

    #[test]
    fn unreachable_output() {
        let mut wf = linear();
        // Output fed by a side chain the input never reaches.
        wf.edges.retain(|e| e.id != "e2");
        wf.nodes.push(Node::new("side", "Side", NodeType::Javascript, json!({"code": "1"})));
        wf.edges.push(Edge::new("e3", "side", "out"));
        wf.edges.push(Edge::new("e4", "out", "side"));
        let issues = validate_workflow(&wf, &registry());
        assert!(codes(&issues).contains(&"OUTPUT_NOT_REACHABLE"));
    }

    #[test]
    fn node_config_failures_are_attributed() {
        let mut wf = linear();
        wf.nodes[1].config = json!({"code": ""});
        let issues = validate_workflow(&wf, &registry());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, "NODE_CONFIG");
        assert_eq!(issues[0].node_id.as_deref(), Some("js"));
    }

    #[test]
    fn rejection_feedback_edge_is_not_a_cycle() {
        let mut wf = Workflow::new("wf", "Loop");
        wf.nodes = vec![
            Node::new("in", "Input", NodeType::Input, json!({})),
            Node::new("agent", "Writer", NodeType::ClaudeAgent, json!({"userQuery": "write"})),
            Node::new("gate", "Gate", NodeType::Approval, json!({
                "promptMessage": "ok?",
                "inputSelections": [{"nodeName": "Writer"}]
            })),
            Node::new("out", "Output", NodeType::Output, json!({})),
        ];
        wf.edges = vec![
            Edge::new("e1", "in", "agent"),
            Edge::new("e2", "agent", "gate"),
            Edge::new("e3", "gate", "out").with_source_handle("approved"),
            Edge::new("e4", "gate", "agent").with_source_handle("rejected"),
        ];

        let feedback = compute_feedback_edges(&wf);
        assert_eq!(feedback.len(), 1);
        assert!(feedback.contains("e4"));

        assert!(validate_workflow(&wf, &registry()).is_empty());
    }
}
