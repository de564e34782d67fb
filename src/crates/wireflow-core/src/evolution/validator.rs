//! Validation of proposed workflow mutations
//!
//! Validates a [`WorkflowEvolution`] against the current workflow, the
//! node config schemas, and the policy options of the proposing
//! self-reflect node. Nothing is short-circuited: every failed check
//! lands in the error list so the caller can report the batch in full.
//!
//! Structural ops (add/remove node, add/remove edge) are applied in order
//! to a working copy of the graph; an op that fails its checks is not
//! applied, and each applied op is checked for cycles and reverted if it
//! would create one. Self-protection rejects any op that targets the
//! proposing node or reshapes its incident edges: a self-reflect node
//! must never mutate itself.

use super::{EvolutionScope, Mutation, SanitizedEvolution, WorkflowEvolution};
use crate::schema::NodeConfigSchema;
use crate::workflow::{detect_cycle, Edge, NodeType, Workflow};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Default mutation cap when the node config does not set one.
pub const DEFAULT_MAX_MUTATIONS: usize = 10;

/// Policy inputs from the proposing self-reflect node.
#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Allowed scopes; every mutation's inferred scope must be a member
    pub scope: Option<Vec<EvolutionScope>>,
    /// Mutation count cap; [`DEFAULT_MAX_MUTATIONS`] when absent
    pub max_mutations: Option<usize>,
    /// The proposing node, protected from self-modification
    pub self_node_id: Option<String>,
}

/// Outcome of validation: verdict, collected errors, sanitized batch.
#[derive(Debug, Clone)]
pub struct EvolutionValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub sanitized: SanitizedEvolution,
}

/// Mutable projection of the graph that structural ops are applied to.
struct WorkingGraph {
    nodes: Vec<(String, String, NodeType)>,
    edges: Vec<Edge>,
}

impl WorkingGraph {
    fn from_workflow(workflow: &Workflow) -> Self {
        Self {
            nodes: workflow
                .nodes
                .iter()
                .map(|n| (n.id.clone(), n.name.clone(), n.node_type))
                .collect(),
            edges: workflow.edges.clone(),
        }
    }

    fn node(&self, node_id: &str) -> Option<&(String, String, NodeType)> {
        self.nodes.iter().find(|(id, _, _)| id == node_id)
    }

    fn has_name(&self, name: &str) -> bool {
        self.nodes.iter().any(|(_, n, _)| n == name)
    }

    fn has_cycle(&self) -> bool {
        let ids: Vec<&str> = self.nodes.iter().map(|(id, _, _)| id.as_str()).collect();
        let edges: Vec<(&str, &str)> = self
            .edges
            .iter()
            .map(|e| (e.source.as_str(), e.target.as_str()))
            .collect();
        detect_cycle(&ids, &edges)
    }

    fn direct_predecessors(&self, node_id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.target == node_id)
            .map(|e| e.source.as_str())
            .collect()
    }
}

/// Validate `evolution` against `workflow`. See module docs.
pub fn validate_evolution(
    workflow: &Workflow,
    evolution: &WorkflowEvolution,
    schemas: &HashMap<NodeType, Arc<NodeConfigSchema>>,
    options: &ValidateOptions,
) -> EvolutionValidation {
    let mut errors: Vec<String> = Vec::new();
    let mut mutations: Vec<Mutation> = Vec::new();

    for (index, raw) in evolution.mutations.iter().enumerate() {
        if !raw.is_object() {
            tracing::warn!(index, "dropping non-object mutation during sanitization");
            continue;
        }
        match serde_json::from_value::<Mutation>(raw.clone()) {
            Ok(mutation) => mutations.push(mutation),
            Err(error) => {
                let op = raw["op"].as_str().unwrap_or("<missing op>");
                errors.push(format!("mutation {index}: unknown or malformed op '{op}': {error}"));
            }
        }
    }

    let max_mutations = options.max_mutations.unwrap_or(DEFAULT_MAX_MUTATIONS);
    if mutations.len() > max_mutations {
        errors.push(format!(
            "mutation count {} exceeds the limit of {max_mutations}",
            mutations.len()
        ));
    }

    let mut working = WorkingGraph::from_workflow(workflow);
    for (index, mutation) in mutations.iter().enumerate() {
        let scope = validate_mutation(mutation, index, &mut working, schemas, options, &mut errors);
        if let (Some(scope), Some(allowed)) = (scope, options.scope.as_ref()) {
            if !allowed.contains(&scope) {
                errors.push(format!(
                    "mutation {index} ({}): scope '{scope:?}' is not permitted",
                    mutation.op()
                ));
            }
        }
    }

    EvolutionValidation {
        valid: errors.is_empty(),
        errors,
        sanitized: SanitizedEvolution {
            reasoning: evolution.reasoning.clone(),
            mutations,
            expected_impact: evolution.expected_impact.clone(),
            risk_assessment: evolution.risk_assessment.clone(),
        },
    }
}

/// Check one mutation, applying structural ops to the working copy when
/// they pass. Returns the inferred scope for policy enforcement.
fn validate_mutation(
    mutation: &Mutation,
    index: usize,
    working: &mut WorkingGraph,
    schemas: &HashMap<NodeType, Arc<NodeConfigSchema>>,
    options: &ValidateOptions,
    errors: &mut Vec<String>,
) -> Option<EvolutionScope> {
    let self_node = options.self_node_id.as_deref();
    let mut fail = |message: String| errors.push(format!("mutation {index} ({}): {message}", mutation.op()));

    match mutation {
        Mutation::UpdateNodeConfig { node_id, path, value } => {
            if self_node == Some(node_id.as_str()) {
                fail("Cannot modify the self-reflect node".into());
                return None;
            }
            if is_pollution_path(path) {
                fail(format!("path '{path}' contains a forbidden segment"));
                return None;
            }
            let Some((_, _, node_type)) = working.node(node_id) else {
                fail(format!("node '{node_id}' does not exist"));
                return None;
            };
            let Some(schema) = schemas.get(node_type) else {
                fail(format!("no schema registered for node type '{node_type}'"));
                return None;
            };
            match schema.resolve_path(path) {
                None => fail(format!("path '{path}' is not declared for type '{node_type}'")),
                Some(kind) if !kind.matches(value) => {
                    fail(format!("value for '{path}' must be of kind {kind}"))
                }
                Some(_) => {}
            }
            Some(infer_config_scope(path))
        }

        Mutation::UpdatePrompt { node_id, value: _ } => {
            if self_node == Some(node_id.as_str()) {
                fail("Cannot modify the self-reflect node".into());
                return None;
            }
            match working.node(node_id) {
                None => fail(format!("node '{node_id}' does not exist")),
                Some((_, _, node_type)) if !node_type.is_agent() => {
                    fail(format!("node '{node_id}' is not an agent node"))
                }
                Some((_, _, node_type)) => {
                    let declared = schemas
                        .get(node_type)
                        .and_then(|s| s.property("userQuery"))
                        .is_some();
                    if !declared {
                        fail(format!("type '{node_type}' declares no prompt field"));
                    }
                }
            }
            Some(EvolutionScope::Prompts)
        }

        Mutation::UpdateModel { node_id, value: _ } => {
            if self_node == Some(node_id.as_str()) {
                fail("Cannot modify the self-reflect node".into());
                return None;
            }
            match working.node(node_id) {
                None => fail(format!("node '{node_id}' does not exist")),
                Some((_, _, node_type)) => {
                    let has_model = schemas.get(node_type).map(|s| s.has_model()).unwrap_or(false);
                    if !has_model {
                        fail(format!("type '{node_type}' declares no model property"));
                    }
                }
            }
            Some(EvolutionScope::Models)
        }

        Mutation::AddNode { node, connect_from, connect_to } => {
            let mut ok = true;
            let Some(node_type) = NodeType::from_tag(&node.node_type) else {
                fail(format!("unknown node type '{}'", node.node_type));
                return Some(EvolutionScope::Nodes);
            };
            if working.node(&node.id).is_some() {
                fail(format!("node id '{}' already exists", node.id));
                ok = false;
            }
            let name = node.name.clone().unwrap_or_else(|| node.id.clone());
            if working.has_name(&name) {
                fail(format!("node name '{name}' is already taken"));
                ok = false;
            }
            if !position_is_numeric(&node.position) {
                fail("position must be an object with numeric x and y".into());
                ok = false;
            }
            if let Some(schema) = schemas.get(&node_type) {
                for property in schema.required_properties() {
                    match node.data.get(property.path) {
                        None => {
                            fail(format!("config is missing required field '{}'", property.path));
                            ok = false;
                        }
                        Some(value) if !property.kind.matches(value) => {
                            fail(format!("config field '{}' must be of kind {}", property.path, property.kind));
                            ok = false;
                        }
                        Some(_) => {}
                    }
                }
            }
            for endpoint in [connect_from, connect_to].into_iter().flatten() {
                if self_node == Some(endpoint.as_str()) {
                    fail("Cannot modify the self-reflect node".into());
                    ok = false;
                } else if working.node(endpoint).is_none() {
                    fail(format!("connection endpoint '{endpoint}' does not exist"));
                    ok = false;
                }
            }

            if ok {
                working.nodes.push((node.id.clone(), name, node_type));
                if let Some(from) = connect_from {
                    working.edges.push(Edge::new(format!("proj-{index}-in"), from, &node.id));
                }
                if let Some(to) = connect_to {
                    working.edges.push(Edge::new(format!("proj-{index}-out"), &node.id, to));
                }
                if working.has_cycle() {
                    errors.push(format!(
                        "mutation {index} (add-node): connections would introduce a cycle"
                    ));
                    working.nodes.retain(|(id, _, _)| id != &node.id);
                    working.edges.retain(|e| e.source != node.id && e.target != node.id);
                }
            }
            Some(EvolutionScope::Nodes)
        }

        Mutation::RemoveNode { node_id } => {
            if self_node == Some(node_id.as_str()) {
                fail("Cannot remove the self-reflect node".into());
                return Some(EvolutionScope::Nodes);
            }
            match working.node(node_id) {
                None => fail(format!("node '{node_id}' does not exist")),
                Some((_, _, NodeType::Input)) => fail("cannot remove the input node".into()),
                Some((_, _, NodeType::Output)) => fail("cannot remove an output node".into()),
                Some(_) => {
                    if let Some(self_id) = self_node {
                        if working.direct_predecessors(self_id).contains(&node_id.as_str()) {
                            fail("Cannot remove a direct predecessor of the self-reflect node".into());
                            return Some(EvolutionScope::Nodes);
                        }
                    }
                    working.nodes.retain(|(id, _, _)| id != node_id);
                    working.edges.retain(|e| e.source != *node_id && e.target != *node_id);
                }
            }
            Some(EvolutionScope::Nodes)
        }

        Mutation::AddEdge { source, target, source_handle, target_handle } => {
            let mut ok = true;
            for endpoint in [source, target] {
                if self_node == Some(endpoint.as_str()) {
                    fail("Cannot modify the self-reflect node".into());
                    ok = false;
                } else if working.node(endpoint).is_none() {
                    fail(format!("endpoint '{endpoint}' does not exist"));
                    ok = false;
                }
            }
            let duplicate = working.edges.iter().any(|e| {
                e.source == *source && e.target == *target && e.source_handle == *source_handle
            });
            if duplicate {
                fail(format!("edge {source} -> {target} already exists"));
                ok = false;
            }

            if ok {
                working.edges.push(Edge {
                    id: format!("proj-{index}"),
                    source: source.clone(),
                    target: target.clone(),
                    source_handle: source_handle.clone(),
                    target_handle: target_handle.clone(),
                });
                if working.has_cycle() {
                    errors.push(format!(
                        "mutation {index} (add-edge): edge {source} -> {target} would introduce a cycle"
                    ));
                    working.edges.pop();
                }
            }
            Some(EvolutionScope::Edges)
        }

        Mutation::RemoveEdge { edge_id, source, target, source_handle } => {
            let position = working.edges.iter().position(|e| match edge_id {
                Some(id) => e.id == *id,
                None => {
                    source.as_deref() == Some(e.source.as_str())
                        && target.as_deref() == Some(e.target.as_str())
                        && (source_handle.is_none() || *source_handle == e.source_handle)
                }
            });
            match position {
                None => fail("edge does not exist".into()),
                Some(found) => {
                    let edge = &working.edges[found];
                    let incident_to_self = self_node
                        .map(|id| edge.source == id || edge.target == id)
                        .unwrap_or(false);
                    if incident_to_self {
                        fail("Cannot modify the self-reflect node".into());
                    } else {
                        working.edges.remove(found);
                    }
                }
            }
            Some(EvolutionScope::Edges)
        }

        Mutation::UpdateWorkflowSetting { field, value } => {
            const SETTABLE: [&str; 3] = ["name", "description", "workingDirectory"];
            if !SETTABLE.contains(&field.as_str()) {
                fail(format!("'{field}' is not a settable workflow field"));
            } else if !value.is_string() {
                fail(format!("'{field}' must be a string"));
            }
            Some(EvolutionScope::Parameters)
        }
    }
}

/// Scope class of an `update-node-config` path.
fn infer_config_scope(path: &str) -> EvolutionScope {
    if path.starts_with("userQuery") {
        EvolutionScope::Prompts
    } else if path.starts_with("model") {
        EvolutionScope::Models
    } else if path.starts_with("tools") {
        EvolutionScope::Tools
    } else {
        EvolutionScope::Parameters
    }
}

/// Reject dotted paths that could reach prototype machinery when the
/// config lands in a JavaScript runtime.
pub(crate) fn is_pollution_path(path: &str) -> bool {
    path.split('.')
        .any(|segment| matches!(segment, "__proto__" | "prototype" | "constructor"))
}

fn position_is_numeric(position: &Value) -> bool {
    position.get("x").map(Value::is_number).unwrap_or(false)
        && position.get("y").map(Value::is_number).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::builtin_schemas;
    use crate::workflow::Node;
    use serde_json::json;

    fn workflow_with_self() -> Workflow {
        let mut wf = Workflow::new("wf-1", "Demo");
        wf.nodes = vec![
            Node::new("in", "Input", NodeType::Input, json!({})),
            Node::new("agent", "Writer", NodeType::ClaudeAgent, json!({"userQuery": "write"})),
            Node::new("self-1", "Reflect", NodeType::SelfReflect, json!({"reflectionGoal": "improve"})),
            Node::new("out", "Output", NodeType::Output, json!({})),
        ];
        wf.edges = vec![
            Edge::new("e1", "in", "agent"),
            Edge::new("e2", "agent", "self-1"),
            Edge::new("e3", "agent", "out"),
        ];
        wf
    }

    fn evolution(mutations: Vec<Value>) -> WorkflowEvolution {
        WorkflowEvolution {
            reasoning: "because".into(),
            mutations,
            expected_impact: "better".into(),
            risk_assessment: "low".into(),
        }
    }

    fn options_with_self() -> ValidateOptions {
        ValidateOptions {
            self_node_id: Some("self-1".into()),
            ..ValidateOptions::default()
        }
    }

    #[test]
    fn removing_the_self_node_is_blocked() {
        let wf = workflow_with_self();
        let result = validate_evolution(
            &wf,
            &evolution(vec![json!({"op": "remove-node", "nodeId": "self-1"})]),
            &builtin_schemas(),
            &options_with_self(),
        );
        assert!(!result.valid);
        assert!(result.errors[0].contains("Cannot remove the self-reflect node"));
    }

    #[test]
    fn edges_incident_to_self_are_blocked() {
        let wf = workflow_with_self();
        let result = validate_evolution(
            &wf,
            &evolution(vec![
                json!({"op": "add-edge", "source": "in", "target": "self-1"}),
                json!({"op": "remove-edge", "source": "agent", "target": "self-1"}),
            ]),
            &builtin_schemas(),
            &options_with_self(),
        );
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 2);
        for error in &result.errors {
            assert!(error.contains("Cannot modify the self-reflect node"), "{error}");
        }
    }

    #[test]
    fn update_config_checks_schema_path_and_kind() {
        let wf = workflow_with_self();
        let schemas = builtin_schemas();

        let result = validate_evolution(
            &wf,
            &evolution(vec![json!({
                "op": "update-node-config",
                "nodeId": "agent",
                "path": "maxTurns",
                "value": 5
            })]),
            &schemas,
            &ValidateOptions::default(),
        );
        assert!(result.valid, "{:?}", result.errors);

        // Undeclared path.
        let result = validate_evolution(
            &wf,
            &evolution(vec![json!({
                "op": "update-node-config",
                "nodeId": "agent",
                "path": "temperature",
                "value": 0.5
            })]),
            &schemas,
            &ValidateOptions::default(),
        );
        assert!(!result.valid);
        assert!(result.errors[0].contains("not declared"));

        // Kind mismatch.
        let result = validate_evolution(
            &wf,
            &evolution(vec![json!({
                "op": "update-node-config",
                "nodeId": "agent",
                "path": "maxTurns",
                "value": "five"
            })]),
            &schemas,
            &ValidateOptions::default(),
        );
        assert!(!result.valid);
        assert!(result.errors[0].contains("kind number"));
    }

    #[test]
    fn pollution_paths_are_rejected() {
        let wf = workflow_with_self();
        for path in ["__proto__.polluted", "outputConfig.__proto__", "constructor.prototype.x"] {
            let result = validate_evolution(
                &wf,
                &evolution(vec![json!({
                    "op": "update-node-config",
                    "nodeId": "agent",
                    "path": path,
                    "value": 1
                })]),
                &builtin_schemas(),
                &ValidateOptions::default(),
            );
            assert!(!result.valid, "path {path} should be rejected");
        }
    }

    #[test]
    fn cycle_introduction_is_detected_on_the_projection() {
        let wf = workflow_with_self();
        let result = validate_evolution(
            &wf,
            &evolution(vec![json!({"op": "add-edge", "source": "out", "target": "in"})]),
            &builtin_schemas(),
            &ValidateOptions::default(),
        );
        assert!(!result.valid);
        assert!(result.errors[0].contains("cycle"));
    }

    #[test]
    fn add_node_requires_known_type_unique_ids_and_required_config() {
        let wf = workflow_with_self();
        let schemas = builtin_schemas();

        let result = validate_evolution(
            &wf,
            &evolution(vec![json!({
                "op": "add-node",
                "node": {"id": "js-1", "type": "javascript", "position": {"x": 1, "y": 2},
                         "data": {"code": "return 1"}},
                "connectFrom": "agent",
                "connectTo": "out"
            })]),
            &schemas,
            &ValidateOptions::default(),
        );
        assert!(result.valid, "{:?}", result.errors);

        let result = validate_evolution(
            &wf,
            &evolution(vec![
                json!({"op": "add-node", "node": {"id": "x", "type": "teleport", "position": {"x": 0, "y": 0}}}),
                json!({"op": "add-node", "node": {"id": "agent", "type": "javascript", "position": {"x": 0, "y": 0}, "data": {"code": "1"}}}),
                json!({"op": "add-node", "node": {"id": "js-2", "type": "javascript", "position": {"x": 0, "y": 0}, "data": {}}}),
            ]),
            &schemas,
            &ValidateOptions::default(),
        );
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 3);
        assert!(result.errors[0].contains("unknown node type"));
        assert!(result.errors[1].contains("already exists"));
        assert!(result.errors[2].contains("missing required field 'code'"));
    }

    #[test]
    fn scope_enforcement() {
        let wf = workflow_with_self();
        let options = ValidateOptions {
            scope: Some(vec![EvolutionScope::Prompts]),
            ..ValidateOptions::default()
        };
        let result = validate_evolution(
            &wf,
            &evolution(vec![
                json!({"op": "update-prompt", "nodeId": "agent", "value": "better prompt"}),
                json!({"op": "update-model", "nodeId": "agent", "value": "bigger-model"}),
            ]),
            &builtin_schemas(),
            &options,
        );
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("scope"));
    }

    #[test]
    fn max_mutations_and_sanitization() {
        let wf = workflow_with_self();
        let mut mutations: Vec<Value> = (0..3)
            .map(|i| json!({"op": "update-prompt", "nodeId": "agent", "value": format!("v{i}")}))
            .collect();
        mutations.push(json!("not an object"));
        mutations.push(json!({"op": "do-magic"}));

        let options = ValidateOptions {
            max_mutations: Some(2),
            ..ValidateOptions::default()
        };
        let result = validate_evolution(&wf, &evolution(mutations), &builtin_schemas(), &options);

        assert!(!result.valid);
        // Non-object dropped silently; unknown op and the cap both error.
        assert_eq!(result.sanitized.mutations.len(), 3);
        assert!(result.errors.iter().any(|e| e.contains("do-magic")));
        assert!(result.errors.iter().any(|e| e.contains("exceeds the limit")));
    }

    #[test]
    fn all_errors_are_collected_not_short_circuited() {
        let wf = workflow_with_self();
        let result = validate_evolution(
            &wf,
            &evolution(vec![
                json!({"op": "remove-node", "nodeId": "ghost"}),
                json!({"op": "remove-node", "nodeId": "in"}),
                json!({"op": "update-workflow-setting", "field": "ownerEmail", "value": "x"}),
                json!({"op": "update-workflow-setting", "field": "name", "value": 7}),
            ]),
            &builtin_schemas(),
            &ValidateOptions::default(),
        );
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 4);
    }

    #[test]
    fn removing_self_predecessor_is_blocked() {
        let wf = workflow_with_self();
        let result = validate_evolution(
            &wf,
            &evolution(vec![json!({"op": "remove-node", "nodeId": "agent"})]),
            &builtin_schemas(),
            &options_with_self(),
        );
        assert!(!result.valid);
        assert!(result.errors[0].contains("direct predecessor of the self-reflect node"));
    }

    #[test]
    fn valid_batch_passes_with_sanitized_mutations() {
        let wf = workflow_with_self();
        let result = validate_evolution(
            &wf,
            &evolution(vec![
                json!({"op": "update-prompt", "nodeId": "agent", "value": "sharper"}),
                json!({"op": "update-workflow-setting", "field": "description", "value": "v2"}),
            ]),
            &builtin_schemas(),
            &ValidateOptions::default(),
        );
        assert!(result.valid, "{:?}", result.errors);
        assert_eq!(result.sanitized.mutations.len(), 2);
        assert_eq!(result.sanitized.reasoning, "because");
    }
}
