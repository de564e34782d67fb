//! Per-run execution state
//!
//! One [`ExecutionContext`] exists per execution, owned by the engine for
//! the duration of the run. Executors receive it behind an `Arc` and use
//! it to read upstream outputs, resolve `{{NodeName.path}}` references,
//! observe cancellation, and (for approvals) publish variables. The
//! engine is the only writer of scheduling state; executor-visible maps
//! use interior locking with short critical sections so nothing holds a
//! lock across an await point.
//!
//! # Reference syntax
//!
//! `{{NodeName}}` resolves to the entire output of the named node;
//! `{{NodeName.dotted.path}}` resolves the dotted path into that output,
//! where integer segments index arrays (only when the value actually is
//! an array). References that do not resolve are left literally in the
//! text. Variables are consulted when the head segment is not a node
//! name.

use crate::workflow::Workflow;
use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use tokio_util::sync::CancellationToken;
use wireflow_store::{NodeRecord, NodeStatus};

/// Mutable state of one workflow execution.
pub struct ExecutionContext {
    pub execution_id: String,
    pub workflow_id: String,
    pub working_directory: Option<String>,

    workflow: Arc<Workflow>,
    node_name_to_id: HashMap<String, String>,
    node_id_to_name: HashMap<String, String>,

    workflow_input: RwLock<Value>,
    node_outputs: RwLock<HashMap<String, Value>>,
    variables: RwLock<HashMap<String, Value>>,
    node_states: RwLock<HashMap<String, NodeRecord>>,
    run_counts: RwLock<HashMap<String, u32>>,
    feedback: RwLock<HashMap<String, String>>,

    cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(
        workflow: Arc<Workflow>,
        execution_id: impl Into<String>,
        working_directory: Option<String>,
    ) -> Self {
        let node_name_to_id: HashMap<String, String> = workflow
            .nodes
            .iter()
            .map(|n| (n.name.clone(), n.id.clone()))
            .collect();
        let node_id_to_name: HashMap<String, String> = workflow
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.name.clone()))
            .collect();
        let node_states: HashMap<String, NodeRecord> = workflow
            .nodes
            .iter()
            .map(|n| (n.id.clone(), NodeRecord::pending()))
            .collect();

        Self {
            execution_id: execution_id.into(),
            workflow_id: workflow.id.clone(),
            working_directory,
            workflow,
            node_name_to_id,
            node_id_to_name,
            workflow_input: RwLock::new(Value::Null),
            node_outputs: RwLock::new(HashMap::new()),
            variables: RwLock::new(HashMap::new()),
            node_states: RwLock::new(node_states),
            run_counts: RwLock::new(HashMap::new()),
            feedback: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// The workflow this run executes. Immutable for the run's duration.
    pub fn workflow(&self) -> &Arc<Workflow> {
        &self.workflow
    }

    // ---- lookup maps -----------------------------------------------------

    pub fn node_id_for_name(&self, name: &str) -> Option<&str> {
        self.node_name_to_id.get(name).map(String::as_str)
    }

    pub fn node_name_for_id(&self, node_id: &str) -> Option<&str> {
        self.node_id_to_name.get(node_id).map(String::as_str)
    }

    // ---- graph accessors -------------------------------------------------

    pub fn predecessors_of(&self, node_id: &str) -> Vec<String> {
        self.workflow.predecessors_of(node_id)
    }

    pub fn successors_of(&self, node_id: &str) -> Vec<String> {
        self.workflow.successors_of(node_id)
    }

    /// Transitive ancestors of `node_id`.
    pub fn ancestors_of(&self, node_id: &str) -> std::collections::HashSet<String> {
        self.workflow.ancestors_of(node_id)
    }

    // ---- run input -------------------------------------------------------

    pub fn set_workflow_input(&self, input: Value) {
        *self.workflow_input.write().expect("context lock poisoned") = input;
    }

    pub fn workflow_input(&self) -> Value {
        self.workflow_input.read().expect("context lock poisoned").clone()
    }

    // ---- node outputs ----------------------------------------------------

    pub fn output_of(&self, node_id: &str) -> Option<Value> {
        self.node_outputs
            .read()
            .expect("context lock poisoned")
            .get(node_id)
            .cloned()
    }

    pub fn set_output(&self, node_id: &str, output: Value) {
        self.node_outputs
            .write()
            .expect("context lock poisoned")
            .insert(node_id.to_string(), output);
    }

    /// Pre-load outputs (replay seeding). Seeded nodes are also marked
    /// `complete` so readiness treats them as settled.
    pub fn seed_outputs(&self, outputs: HashMap<String, Value>) {
        let mut states = self.node_states.write().expect("context lock poisoned");
        for node_id in outputs.keys() {
            if let Some(record) = states.get_mut(node_id) {
                record.status = NodeStatus::Complete;
                record.result = Some(outputs[node_id].clone());
            }
        }
        drop(states);
        self.node_outputs
            .write()
            .expect("context lock poisoned")
            .extend(outputs);
    }

    pub fn outputs_snapshot(&self) -> HashMap<String, Value> {
        self.node_outputs.read().expect("context lock poisoned").clone()
    }

    // ---- variables -------------------------------------------------------

    pub fn set_variable(&self, key: impl Into<String>, value: Value) {
        self.variables
            .write()
            .expect("context lock poisoned")
            .insert(key.into(), value);
    }

    pub fn get_variable(&self, key: &str) -> Option<Value> {
        self.variables
            .read()
            .expect("context lock poisoned")
            .get(key)
            .cloned()
    }

    // ---- node lifecycle --------------------------------------------------

    pub fn status_of(&self, node_id: &str) -> NodeStatus {
        self.node_states
            .read()
            .expect("context lock poisoned")
            .get(node_id)
            .map(|r| r.status)
            .unwrap_or(NodeStatus::Pending)
    }

    pub fn node_state(&self, node_id: &str) -> Option<NodeRecord> {
        self.node_states
            .read()
            .expect("context lock poisoned")
            .get(node_id)
            .cloned()
    }

    pub fn mark_running(&self, node_id: &str) {
        self.update_state(node_id, |record| {
            record.status = NodeStatus::Running;
            record.started_at = Some(Utc::now());
            record.completed_at = None;
            record.error = None;
        });
    }

    pub fn mark_waiting(&self, node_id: &str) {
        self.update_state(node_id, |record| record.status = NodeStatus::Waiting);
    }

    pub fn mark_complete(&self, node_id: &str, result: Value) {
        self.set_output(node_id, result.clone());
        self.update_state(node_id, |record| {
            record.status = NodeStatus::Complete;
            record.completed_at = Some(Utc::now());
            record.result = Some(result);
            record.error = None;
        });
    }

    pub fn mark_error(&self, node_id: &str, error: impl Into<String>) {
        let error = error.into();
        self.update_state(node_id, |record| {
            record.status = NodeStatus::Error;
            record.completed_at = Some(Utc::now());
            record.error = Some(error);
        });
    }

    pub fn mark_skipped(&self, node_id: &str) {
        self.update_state(node_id, |record| {
            record.status = NodeStatus::Skipped;
            record.completed_at = Some(Utc::now());
        });
    }

    /// Rejection-feedback re-entry: node goes back to `pending` with its
    /// prior timestamps cleared. Outputs are retained until overwritten.
    pub fn reset_to_pending(&self, node_id: &str) {
        self.update_state(node_id, |record| {
            record.status = NodeStatus::Pending;
            record.started_at = None;
            record.completed_at = None;
            record.error = None;
        });
    }

    fn update_state(&self, node_id: &str, apply: impl FnOnce(&mut NodeRecord)) {
        let mut states = self.node_states.write().expect("context lock poisoned");
        let record = states
            .entry(node_id.to_string())
            .or_insert_with(NodeRecord::pending);
        apply(record);
    }

    pub fn states_snapshot(&self) -> HashMap<String, NodeRecord> {
        self.node_states.read().expect("context lock poisoned").clone()
    }

    // ---- run counters ----------------------------------------------------

    /// Number of times the node has started within this run.
    pub fn run_count(&self, node_id: &str) -> u32 {
        self.run_counts
            .read()
            .expect("context lock poisoned")
            .get(node_id)
            .copied()
            .unwrap_or(0)
    }

    /// Increment and return the node's run counter.
    pub fn bump_run_count(&self, node_id: &str) -> u32 {
        let mut counts = self.run_counts.write().expect("context lock poisoned");
        let count = counts.entry(node_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    // ---- rejection feedback ----------------------------------------------

    pub fn set_feedback(&self, node_id: &str, feedback: impl Into<String>) {
        self.feedback
            .write()
            .expect("context lock poisoned")
            .insert(node_id.to_string(), feedback.into());
    }

    /// Consume the feedback injected for this node, if any.
    pub fn take_feedback(&self, node_id: &str) -> Option<String> {
        self.feedback
            .write()
            .expect("context lock poisoned")
            .remove(node_id)
    }

    // ---- cancellation ----------------------------------------------------

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // ---- references and interpolation ------------------------------------

    /// Resolve one reference (`NodeName` or `NodeName.dotted.path`).
    ///
    /// Resolution order: node output by name, then variables by full
    /// dotted key, then variables by head segment with the remainder
    /// walked into the stored value. `None` when nothing matches.
    pub fn resolve_reference(&self, reference: &str) -> Option<Value> {
        let reference = reference.trim();
        let (head, rest) = match reference.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (reference, None),
        };

        if let Some(node_id) = self.node_id_for_name(head) {
            let output = self.output_of(node_id)?;
            return match rest {
                Some(path) => get_nested_value(&output, path),
                None => Some(output),
            };
        }

        if let Some(value) = self.get_variable(reference) {
            return Some(value);
        }

        if let Some(path) = rest {
            if let Some(root) = self.get_variable(head) {
                return get_nested_value(&root, path);
            }
        }

        None
    }

    /// Expand every `{{reference}}` placeholder in `text`. Unresolved
    /// references are left literally.
    pub fn interpolate(&self, text: &str) -> String {
        static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
        let placeholder = PLACEHOLDER
            .get_or_init(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("placeholder regex"));

        placeholder
            .replace_all(text, |captures: &regex::Captures<'_>| {
                let reference = &captures[1];
                match self.resolve_reference(reference) {
                    Some(value) => value_to_text(&value),
                    None => captures[0].to_string(),
                }
            })
            .into_owned()
    }
}

/// Render a resolved value into interpolated text: strings verbatim,
/// everything else as compact JSON.
fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Walk a dotted path into a JSON value.
///
/// An integer segment indexes arrays only when the containing value is an
/// array; on objects it is an ordinary string key. Missing segments
/// resolve to `None`, never a panic.
pub fn get_nested_value(value: &Value, path: &str) -> Option<Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            Value::Object(map) => map.get(segment)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{Edge, Node, NodeType};
    use serde_json::json;

    fn context() -> ExecutionContext {
        let mut wf = Workflow::new("wf-1", "Demo");
        wf.nodes = vec![
            Node::new("in", "Input", NodeType::Input, json!({})),
            Node::new("agent", "Writer", NodeType::ClaudeAgent, json!({})),
            Node::new("out", "Output", NodeType::Output, json!({})),
        ];
        wf.edges = vec![Edge::new("e1", "in", "agent"), Edge::new("e2", "agent", "out")];
        ExecutionContext::new(Arc::new(wf), "exec-1", None)
    }

    #[test]
    fn nested_value_semantics() {
        let value = json!({
            "items": [{"name": "first"}, {"name": "second"}],
            "meta": {"0": "string-key"}
        });

        assert_eq!(get_nested_value(&value, "items.1.name"), Some(json!("second")));
        // Integer segments are plain keys on objects.
        assert_eq!(get_nested_value(&value, "meta.0"), Some(json!("string-key")));
        // String keys on arrays resolve to nothing.
        assert_eq!(get_nested_value(&value, "items.name"), None);
        assert_eq!(get_nested_value(&value, "missing.path"), None);
        // Descending into a scalar resolves to nothing.
        assert_eq!(get_nested_value(&json!(42), "field"), None);
    }

    #[test]
    fn interpolation_resolves_node_outputs() {
        let ctx = context();
        ctx.set_output("agent", json!({"text": "a draft", "score": 7}));

        assert_eq!(
            ctx.interpolate("Review: {{Writer.text}} ({{Writer.score}})"),
            "Review: a draft (7)"
        );
        // Whole-output reference renders as compact JSON.
        assert_eq!(
            ctx.interpolate("{{Writer}}"),
            r#"{"score":7,"text":"a draft"}"#
        );
    }

    #[test]
    fn unresolved_references_stay_literal() {
        let ctx = context();
        assert_eq!(ctx.interpolate("hello {{Nobody.field}}"), "hello {{Nobody.field}}");
        assert_eq!(ctx.interpolate("{{Writer.text}}"), "{{Writer.text}}");
    }

    #[test]
    fn variables_resolve_after_node_names() {
        let ctx = context();
        ctx.set_variable("node.agent.approved", json!(true));
        ctx.set_variable("settings", json!({"retries": 3}));

        assert_eq!(ctx.resolve_reference("node.agent.approved"), Some(json!(true)));
        assert_eq!(ctx.resolve_reference("settings.retries"), Some(json!(3)));
        assert_eq!(ctx.resolve_reference("settings.missing"), None);
    }

    #[test]
    fn lifecycle_transitions_track_timestamps() {
        let ctx = context();
        assert_eq!(ctx.status_of("agent"), NodeStatus::Pending);

        ctx.mark_running("agent");
        let state = ctx.node_state("agent").unwrap();
        assert_eq!(state.status, NodeStatus::Running);
        assert!(state.started_at.is_some());
        assert!(state.completed_at.is_none());

        ctx.mark_complete("agent", json!("done"));
        let state = ctx.node_state("agent").unwrap();
        assert_eq!(state.status, NodeStatus::Complete);
        assert!(state.completed_at.is_some());
        assert_eq!(ctx.output_of("agent"), Some(json!("done")));

        ctx.reset_to_pending("agent");
        let state = ctx.node_state("agent").unwrap();
        assert_eq!(state.status, NodeStatus::Pending);
        assert!(state.started_at.is_none());
        // Prior output survives the reset until the re-run overwrites it.
        assert_eq!(ctx.output_of("agent"), Some(json!("done")));
    }

    #[test]
    fn run_counters_and_feedback() {
        let ctx = context();
        assert_eq!(ctx.run_count("agent"), 0);
        assert_eq!(ctx.bump_run_count("agent"), 1);
        assert_eq!(ctx.bump_run_count("agent"), 2);

        ctx.set_feedback("agent", "add detail");
        assert_eq!(ctx.take_feedback("agent").as_deref(), Some("add detail"));
        assert_eq!(ctx.take_feedback("agent"), None);
    }

    #[test]
    fn seeding_marks_nodes_complete() {
        let ctx = context();
        let mut seeds = HashMap::new();
        seeds.insert("in".to_string(), json!("hello"));
        ctx.seed_outputs(seeds);

        assert_eq!(ctx.status_of("in"), NodeStatus::Complete);
        assert_eq!(ctx.output_of("in"), Some(json!("hello")));
        assert_eq!(ctx.status_of("agent"), NodeStatus::Pending);
    }
}
