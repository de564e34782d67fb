//! Transactional application of validated mutations
//!
//! Application never mutates the stored workflow in place: the batch is
//! applied to a deep copy, the copy is persisted through the store in one
//! write, and an [`EvolutionRecord`] with before/after snapshots is
//! appended to the workflow's journal. A reader can therefore never
//! observe a partial batch.
//!
//! The prototype-pollution path check runs here again even though the
//! validator already enforced it; the applier is also reachable with
//! externally-constructed batches.

use super::validator::is_pollution_path;
use super::{EvolutionMode, EvolutionRecord, Mutation, SanitizedEvolution, WorkflowSnapshot};
use crate::error::{EngineError, Result};
use crate::workflow::{Edge, Node, NodeType, Position, Workflow};
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;
use wireflow_store::{EvolutionHistory, Store, StoreError};

/// Applies validated evolutions and owns the journal.
pub struct EvolutionApplier {
    store: Arc<dyn Store>,
    history: EvolutionHistory,
}

impl EvolutionApplier {
    pub fn new(store: Arc<dyn Store>, history: EvolutionHistory) -> Self {
        Self { store, history }
    }

    /// Apply a validated batch: snapshot, project, persist, snapshot,
    /// journal. Returns the updated workflow and the journaled record.
    pub async fn apply(
        &self,
        workflow: &Workflow,
        evolution: &SanitizedEvolution,
        execution_id: &str,
        self_node_id: &str,
        mode: EvolutionMode,
    ) -> Result<(Workflow, EvolutionRecord)> {
        let before_snapshot = WorkflowSnapshot::capture(workflow);
        let updated = project_evolution(workflow, &evolution.mutations)?;

        let document = serde_json::to_value(&updated)?;
        self.store
            .update_workflow(&workflow.id, document)
            .await
            .map_err(|error| match error {
                StoreError::WorkflowNotFound(id) => EngineError::WorkflowNotFound(id),
                other => EngineError::Store(other),
            })?;

        let record = EvolutionRecord {
            timestamp: Utc::now(),
            workflow_id: workflow.id.clone(),
            execution_id: execution_id.to_string(),
            self_node_id: self_node_id.to_string(),
            mode,
            mutations: evolution.mutations.clone(),
            before_snapshot,
            after_snapshot: Some(WorkflowSnapshot::capture(&updated)),
            applied: true,
            reasoning: evolution.reasoning.clone(),
            expected_impact: evolution.expected_impact.clone(),
            risk_assessment: evolution.risk_assessment.clone(),
            validation_errors: None,
        };
        self.history.append(&workflow.id, &record).await?;

        tracing::info!(
            workflow = %workflow.id,
            mutations = evolution.mutations.len(),
            "applied workflow evolution"
        );
        Ok((updated, record))
    }

    /// Journal an evolution that was not applied (suggest / dry-run /
    /// rejected batches). Keeps the audit trail complete.
    pub async fn journal(&self, record: &EvolutionRecord) -> Result<()> {
        self.history.append(&record.workflow_id, record).await?;
        Ok(())
    }

    /// The parsed journal for a workflow; empty when none exists.
    pub async fn read_history(&self, workflow_id: &str) -> Result<Vec<EvolutionRecord>> {
        Ok(self.history.read(workflow_id).await?)
    }
}

/// Apply mutations in order to a deep copy of `workflow`.
///
/// Shared by the applier and dry-run projection. Structural faults that
/// slipped past validation surface as [`EngineError::EdgeConflict`],
/// [`EngineError::CycleIntroduced`], or
/// [`EngineError::EvolutionValidation`].
pub fn project_evolution(workflow: &Workflow, mutations: &[Mutation]) -> Result<Workflow> {
    let mut updated = workflow.clone();

    for mutation in mutations {
        match mutation {
            Mutation::UpdateNodeConfig { node_id, path, value } => {
                set_node_config(&mut updated, node_id, path, value.clone())?;
            }
            Mutation::UpdatePrompt { node_id, value } => {
                set_node_config(&mut updated, node_id, "userQuery", Value::String(value.clone()))?;
            }
            Mutation::UpdateModel { node_id, value } => {
                set_node_config(&mut updated, node_id, "model", Value::String(value.clone()))?;
            }
            Mutation::AddNode { node, connect_from, connect_to } => {
                let node_type = NodeType::from_tag(&node.node_type).ok_or_else(|| {
                    EngineError::EvolutionValidation(vec![format!(
                        "unknown node type '{}'",
                        node.node_type
                    )])
                })?;
                let position: Position =
                    serde_json::from_value(node.position.clone()).unwrap_or_default();
                updated.nodes.push(Node {
                    id: node.id.clone(),
                    name: node.name.clone().unwrap_or_else(|| node.id.clone()),
                    node_type,
                    position,
                    config: node.data.clone(),
                });
                if let Some(from) = connect_from {
                    updated.edges.push(fresh_edge(from, &node.id, None));
                }
                if let Some(to) = connect_to {
                    updated.edges.push(fresh_edge(&node.id, to, None));
                }
            }
            Mutation::RemoveNode { node_id } => {
                updated.nodes.retain(|n| n.id != *node_id);
                // Cascade: every incident edge goes with the node.
                updated.edges.retain(|e| e.source != *node_id && e.target != *node_id);
            }
            Mutation::AddEdge { source, target, source_handle, target_handle } => {
                let duplicate = updated.edges.iter().any(|e| {
                    e.source == *source && e.target == *target && e.source_handle == *source_handle
                });
                if duplicate {
                    return Err(EngineError::EdgeConflict(format!(
                        "edge {source} -> {target} already exists"
                    )));
                }
                let mut edge = fresh_edge(source, target, source_handle.clone());
                edge.target_handle = target_handle.clone();
                updated.edges.push(edge);
            }
            Mutation::RemoveEdge { edge_id, source, target, source_handle } => {
                let position = updated.edges.iter().position(|e| match edge_id {
                    Some(id) => e.id == *id,
                    None => {
                        source.as_deref() == Some(e.source.as_str())
                            && target.as_deref() == Some(e.target.as_str())
                            && (source_handle.is_none() || *source_handle == e.source_handle)
                    }
                });
                match position {
                    Some(found) => {
                        updated.edges.remove(found);
                    }
                    None => {
                        return Err(EngineError::EdgeConflict("edge does not exist".into()));
                    }
                }
            }
            Mutation::UpdateWorkflowSetting { field, value } => {
                let text = value.as_str().map(str::to_string).ok_or_else(|| {
                    EngineError::EvolutionValidation(vec![format!("'{field}' must be a string")])
                })?;
                match field.as_str() {
                    "name" => updated.name = text,
                    "description" => updated.description = Some(text),
                    "workingDirectory" => updated.working_directory = Some(text),
                    other => {
                        return Err(EngineError::EvolutionValidation(vec![format!(
                            "'{other}' is not a settable workflow field"
                        )]))
                    }
                }
            }
        }
    }

    if updated.has_cycle() {
        return Err(EngineError::CycleIntroduced(
            "mutation batch leaves the graph cyclic".into(),
        ));
    }
    Ok(updated)
}

fn fresh_edge(source: &str, target: &str, source_handle: Option<String>) -> Edge {
    Edge {
        id: format!("edge-{}", Uuid::new_v4()),
        source: source.to_string(),
        target: target.to_string(),
        source_handle,
        target_handle: None,
    }
}

/// Set a dotted path inside a node's config bag, creating missing
/// intermediate objects. Pollution segments are rejected here as well as
/// in the validator.
fn set_node_config(workflow: &mut Workflow, node_id: &str, path: &str, value: Value) -> Result<()> {
    if is_pollution_path(path) {
        return Err(EngineError::EvolutionValidation(vec![format!(
            "path '{path}' contains a forbidden segment"
        )]));
    }
    let node = workflow
        .nodes
        .iter_mut()
        .find(|n| n.id == node_id)
        .ok_or_else(|| {
            EngineError::EvolutionValidation(vec![format!("node '{node_id}' does not exist")])
        })?;

    if !node.config.is_object() {
        node.config = Value::Object(Map::new());
    }
    set_path(&mut node.config, path, value).map_err(|message| {
        EngineError::EvolutionValidation(vec![format!("cannot set '{path}': {message}")])
    })
}

fn set_path(root: &mut Value, path: &str, value: Value) -> std::result::Result<(), String> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = root;

    for (index, segment) in segments.iter().enumerate() {
        let last = index == segments.len() - 1;
        match current {
            Value::Object(map) => {
                if last {
                    map.insert(segment.to_string(), value);
                    return Ok(());
                }
                current = map
                    .entry(segment.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
            }
            Value::Array(items) => {
                let position: usize = segment
                    .parse()
                    .map_err(|_| format!("'{segment}' is not an array index"))?;
                let slot = items
                    .get_mut(position)
                    .ok_or_else(|| format!("index {position} is out of bounds"))?;
                if last {
                    *slot = value;
                    return Ok(());
                }
                current = slot;
            }
            other => {
                return Err(format!(
                    "segment '{segment}' descends into a {} value",
                    value_kind_name(other)
                ))
            }
        }
    }
    Ok(())
}

fn value_kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
