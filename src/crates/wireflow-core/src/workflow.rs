//! Core workflow data structures
//!
//! This module defines the fundamental building blocks of an executable
//! workflow: [`Workflow`], [`Node`], [`Edge`], and the closed [`NodeType`]
//! set, plus the graph accessors the engine and the evolution machinery
//! share (adjacency, transitive ancestors, cycle detection).
//!
//! # Shape
//!
//! A workflow is a directed acyclic graph. Nodes carry a type tag and a
//! typed configuration bag whose recognized keys depend on the type (see
//! the executor modules). Edges carry data from source to target; an edge
//! may bind to a named **output handle** of its source (e.g. a condition's
//! `true`/`false`), in which case data flows only when the source nominates
//! that handle. Edges with no handle match every handle.
//!
//! Workflows serialize as camelCase JSON documents, the same document the
//! store persists and the evolution applier mutates.
//!
//! # Invariants
//!
//! - Edge endpoints refer to existing node ids
//! - The graph has no cycles
//! - Node names are unique within the workflow
//! - Exactly one `input` node, at least one `output` node in a runnable
//!   workflow
//!
//! These are enforced by the engine's pre-run validation
//! ([`crate::engine::validate_workflow`]), not by construction, so that
//! drafts and in-progress evolution copies can exist in invalid states.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};

/// Closed set of node type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    #[serde(rename = "input")]
    Input,
    #[serde(rename = "output")]
    Output,
    #[serde(rename = "claude-agent")]
    ClaudeAgent,
    #[serde(rename = "codex-agent")]
    CodexAgent,
    #[serde(rename = "condition")]
    Condition,
    #[serde(rename = "merge")]
    Merge,
    #[serde(rename = "javascript")]
    Javascript,
    #[serde(rename = "approval")]
    Approval,
    #[serde(rename = "self-reflect")]
    SelfReflect,
}

impl NodeType {
    /// All known type tags, in registry order.
    pub const ALL: [NodeType; 9] = [
        NodeType::Input,
        NodeType::Output,
        NodeType::ClaudeAgent,
        NodeType::CodexAgent,
        NodeType::Condition,
        NodeType::Merge,
        NodeType::Javascript,
        NodeType::Approval,
        NodeType::SelfReflect,
    ];

    /// Whether this type is driven by an agent runner.
    pub fn is_agent(&self) -> bool {
        matches!(self, NodeType::ClaudeAgent | NodeType::CodexAgent)
    }

    /// The wire tag for this type, e.g. `"claude-agent"`.
    pub fn tag(&self) -> &'static str {
        match self {
            NodeType::Input => "input",
            NodeType::Output => "output",
            NodeType::ClaudeAgent => "claude-agent",
            NodeType::CodexAgent => "codex-agent",
            NodeType::Condition => "condition",
            NodeType::Merge => "merge",
            NodeType::Javascript => "javascript",
            NodeType::Approval => "approval",
            NodeType::SelfReflect => "self-reflect",
        }
    }

    /// Parse a wire tag. Unknown tags yield `None`; callers decide whether
    /// that is an error (the evolution validator) or a skip.
    pub fn from_tag(tag: &str) -> Option<NodeType> {
        NodeType::ALL.iter().copied().find(|t| t.tag() == tag)
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Canvas position. Opaque to the engine, carried for the UI.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// One vertex of a workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Opaque unique id
    pub id: String,

    /// Display name; unique within a workflow, used by `{{Name.path}}`
    /// references
    pub name: String,

    #[serde(rename = "type")]
    pub node_type: NodeType,

    #[serde(default)]
    pub position: Position,

    /// Typed configuration bag; recognized keys depend on `node_type`
    #[serde(default)]
    pub config: Value,
}

impl Node {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        node_type: NodeType,
        config: Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            node_type,
            position: Position::default(),
            config,
        }
    }

    /// Deserialize this node's config bag into an executor's typed config.
    /// A null bag reads as an empty object so type defaults apply.
    pub fn typed_config<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let config = if self.config.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            self.config.clone()
        };
        serde_json::from_value(config).map_err(|e| EngineError::node_config(&self.id, e.to_string()))
    }
}

/// One directed edge of a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,

    /// Named output handle on the source this edge binds to; `None` matches
    /// every handle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Edge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
        }
    }

    pub fn with_source_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }

    /// Whether this edge carries data when the source nominated `handle`.
    ///
    /// Edges with no source handle match every nomination; a nomination of
    /// `None` means the source has a single unnamed output, which only
    /// unhandled edges match.
    pub fn matches_handle(&self, nominated: Option<&str>) -> bool {
        match (&self.source_handle, nominated) {
            (None, _) => true,
            (Some(own), Some(handle)) => own == handle,
            (Some(_), None) => false,
        }
    }
}

/// A complete workflow description: immutable for the duration of one
/// execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,

    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Workflow {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            working_directory: None,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn edge(&self, edge_id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == edge_id)
    }

    /// The unique `input` node, when exactly one exists.
    pub fn input_node(&self) -> Option<&Node> {
        let mut inputs = self.nodes.iter().filter(|n| n.node_type == NodeType::Input);
        match (inputs.next(), inputs.next()) {
            (Some(node), None) => Some(node),
            _ => None,
        }
    }

    pub fn output_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.node_type == NodeType::Output)
    }

    pub fn incoming_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.target == node_id)
    }

    pub fn outgoing_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    /// Direct predecessor node ids, deduplicated, in edge order.
    pub fn predecessors_of(&self, node_id: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.incoming_edges(node_id)
            .filter(|e| seen.insert(e.source.clone()))
            .map(|e| e.source.clone())
            .collect()
    }

    /// Direct successor node ids, deduplicated, in edge order.
    pub fn successors_of(&self, node_id: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.outgoing_edges(node_id)
            .filter(|e| seen.insert(e.target.clone()))
            .map(|e| e.target.clone())
            .collect()
    }

    /// Every node from which a directed path reaches `node_id`.
    pub fn ancestors_of(&self, node_id: &str) -> HashSet<String> {
        let mut ancestors = HashSet::new();
        let mut queue: VecDeque<String> = self.predecessors_of(node_id).into();
        while let Some(current) = queue.pop_front() {
            if ancestors.insert(current.clone()) {
                queue.extend(self.predecessors_of(&current));
            }
        }
        ancestors
    }

    /// Every node reachable from `node_id` by directed edges.
    pub fn descendants_of(&self, node_id: &str) -> HashSet<String> {
        let mut descendants = HashSet::new();
        let mut queue: VecDeque<String> = self.successors_of(node_id).into();
        while let Some(current) = queue.pop_front() {
            if descendants.insert(current.clone()) {
                queue.extend(self.successors_of(&current));
            }
        }
        descendants
    }

    /// Whether the graph contains a directed cycle.
    pub fn has_cycle(&self) -> bool {
        let ids: Vec<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        let edges: Vec<(&str, &str)> = self
            .edges
            .iter()
            .map(|e| (e.source.as_str(), e.target.as_str()))
            .collect();
        detect_cycle(&ids, &edges)
    }
}

/// DFS back-edge cycle detection over an arbitrary node/edge projection.
///
/// Shared by workflow validation and the evolution validator, which runs it
/// on a working copy with mutations applied. Edges whose endpoints are not
/// in `nodes` are ignored; endpoint existence is a separate check.
pub fn detect_cycle(nodes: &[&str], edges: &[(&str, &str)]) -> bool {
    let index: HashMap<&str, usize> = nodes.iter().enumerate().map(|(i, n)| (*n, i)).collect();
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (source, target) in edges {
        if let (Some(&s), Some(&t)) = (index.get(source), index.get(target)) {
            adjacency[s].push(t);
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let mut marks = vec![Mark::Unvisited; nodes.len()];

    // Iterative DFS; an edge into an in-progress node is a back edge.
    for start in 0..nodes.len() {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        marks[start] = Mark::InProgress;
        while let Some(frame) = stack.last_mut() {
            let (node, next) = *frame;
            if next < adjacency[node].len() {
                frame.1 += 1;
                let child = adjacency[node][next];
                match marks[child] {
                    Mark::InProgress => return true,
                    Mark::Unvisited => {
                        marks[child] = Mark::InProgress;
                        stack.push((child, 0));
                    }
                    Mark::Done => {}
                }
            } else {
                marks[node] = Mark::Done;
                stack.pop();
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn diamond() -> Workflow {
        let mut wf = Workflow::new("wf-1", "Diamond");
        wf.nodes = vec![
            Node::new("in", "Input", NodeType::Input, json!({})),
            Node::new("a", "A", NodeType::Javascript, json!({})),
            Node::new("b", "B", NodeType::Javascript, json!({})),
            Node::new("out", "Output", NodeType::Output, json!({})),
        ];
        wf.edges = vec![
            Edge::new("e1", "in", "a"),
            Edge::new("e2", "in", "b"),
            Edge::new("e3", "a", "out"),
            Edge::new("e4", "b", "out"),
        ];
        wf
    }

    #[test]
    fn node_type_tags_round_trip() {
        for ty in NodeType::ALL {
            assert_eq!(NodeType::from_tag(ty.tag()), Some(ty));
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{}\"", ty.tag()));
        }
        assert_eq!(NodeType::from_tag("mystery"), None);
    }

    #[test]
    fn adjacency_accessors() {
        let wf = diamond();
        assert_eq!(wf.predecessors_of("out"), vec!["a", "b"]);
        assert_eq!(wf.successors_of("in"), vec!["a", "b"]);
        assert!(wf.predecessors_of("in").is_empty());
    }

    #[test]
    fn ancestors_are_transitive() {
        let wf = diamond();
        let ancestors = wf.ancestors_of("out");
        assert_eq!(ancestors.len(), 3);
        assert!(ancestors.contains("in"));
        assert!(ancestors.contains("a"));
        assert!(ancestors.contains("b"));

        let descendants = wf.descendants_of("in");
        assert_eq!(descendants.len(), 3);
        assert!(descendants.contains("out"));
    }

    #[test]
    fn cycle_detection() {
        let mut wf = diamond();
        assert!(!wf.has_cycle());

        wf.edges.push(Edge::new("back", "out", "in"));
        assert!(wf.has_cycle());
    }

    #[test]
    fn detect_cycle_ignores_dangling_edges() {
        assert!(!detect_cycle(&["a", "b"], &[("a", "b"), ("b", "ghost")]));
        assert!(detect_cycle(&["a", "b"], &[("a", "b"), ("b", "a")]));
        assert!(detect_cycle(&["a"], &[("a", "a")]));
    }

    #[test]
    fn handle_matching() {
        let plain = Edge::new("e1", "cond", "left");
        let bound = Edge::new("e2", "cond", "right").with_source_handle("false");

        assert!(plain.matches_handle(Some("true")));
        assert!(plain.matches_handle(None));
        assert!(bound.matches_handle(Some("false")));
        assert!(!bound.matches_handle(Some("true")));
        assert!(!bound.matches_handle(None));
    }

    #[test]
    fn workflow_document_round_trips() {
        let wf = diamond();
        let doc = serde_json::to_value(&wf).unwrap();
        assert_eq!(doc["nodes"][0]["type"], "input");
        assert_eq!(doc["workingDirectory"], Value::Null);

        let back: Workflow = serde_json::from_value(doc).unwrap();
        assert_eq!(back.nodes.len(), 4);
        assert_eq!(back.node("a").unwrap().name, "A");
    }

    #[test]
    fn input_node_requires_exactly_one() {
        let mut wf = diamond();
        assert_eq!(wf.input_node().unwrap().id, "in");

        wf.nodes.push(Node::new("in2", "Input2", NodeType::Input, json!({})));
        assert!(wf.input_node().is_none());
    }
}
