//! DAG execution engine
//!
//! [`DAGEngine`] drives a single workflow execution to a terminal state:
//! it validates the graph, computes a readiness frontier over active
//! edges, dispatches ready nodes to their executors concurrently, and
//! folds completions back into scheduling state one at a time. Branch
//! decisions mask edges; skipping is derived from edge activity rather
//! than stored per node, which keeps merge semantics uniform under
//! nested branches.
//!
//! # Concurrency shape
//!
//! Executors run as spawned tasks; their results return over a single
//! completion channel, so all scheduling state transitions are
//! serialized in the engine's own loop. The engine never suspends except
//! to await that channel (or cancellation). Approval executors suspend
//! themselves on the [`ApprovalRegistry`]; from the engine's view they
//! are simply long-running tasks in `waiting` state.
//!
//! # Rejection feedback
//!
//! An approval whose outgoing `rejected` edge targets one of its own
//! ancestors describes a revision loop, not a data edge. When that
//! approval rejects, the engine re-arms the ancestor's entire downstream
//! subtree (statuses back to `pending`, masked edges re-activated),
//! injects the rejection feedback into the ancestor, and bumps the
//! ancestor's run counter. Agent nodes bound the loop through their
//! `rejectionHandler`; handler-less ancestors fall back to the engine's
//! `max_feedback_cycles` safety valve.

mod validate;

pub use validate::{compute_feedback_edges, validate_workflow};

use crate::approval::ApprovalRegistry;
use crate::bus::{EventBus, EventEmitter};
use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::event::{ExecutionEvent, NodeStreamEvent};
use crate::executors::{AgentNodeConfig, MergeExecutor, MergeStrategy, NodeExecution, OnMaxRetries};
use crate::registry::NodeRegistry;
use crate::workflow::{Node, NodeType, Workflow};
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;
use wireflow_store::{ExecutionStatus, ExecutionSummary, NodeRecord, NodeStatus};

/// Optional knobs for one run; replay seeds context through this.
#[derive(Default)]
pub struct EngineOptions {
    /// Execution id; generated when absent
    pub execution_id: Option<String>,
    /// Working directory override (explicit > workflow > engine default)
    pub working_directory: Option<String>,
    /// Outputs to seed as already-complete (replay reuse)
    pub seeded_outputs: HashMap<String, Value>,
}

/// What an executor task reports back to the scheduling loop.
struct Completion {
    node_id: String,
    result: Result<NodeExecution>,
}

/// Drives one execution of one workflow. See module docs.
pub struct DAGEngine {
    workflow: Arc<Workflow>,
    registry: Arc<NodeRegistry>,
    approvals: Arc<ApprovalRegistry>,
    config: EngineConfig,
    ctx: Arc<ExecutionContext>,
    bus: Arc<EventBus>,
    feedback_edges: HashSet<String>,
    started: AtomicBool,
}

impl DAGEngine {
    pub fn new(
        workflow: Workflow,
        registry: Arc<NodeRegistry>,
        approvals: Arc<ApprovalRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self::with_options(workflow, registry, approvals, config, EngineOptions::default())
    }

    pub fn with_options(
        workflow: Workflow,
        registry: Arc<NodeRegistry>,
        approvals: Arc<ApprovalRegistry>,
        config: EngineConfig,
        options: EngineOptions,
    ) -> Self {
        let workflow = Arc::new(workflow);
        let execution_id = options
            .execution_id
            .unwrap_or_else(|| format!("exec-{}", Uuid::new_v4()));
        let working_directory = options
            .working_directory
            .or_else(|| workflow.working_directory.clone())
            .or_else(|| config.default_working_directory.clone());

        let ctx = Arc::new(ExecutionContext::new(
            Arc::clone(&workflow),
            execution_id.clone(),
            working_directory,
        ));
        if !options.seeded_outputs.is_empty() {
            ctx.seed_outputs(options.seeded_outputs);
        }

        let bus = Arc::new(EventBus::new(execution_id, config.event_buffer_size));
        let feedback_edges = compute_feedback_edges(&workflow);

        Self {
            workflow,
            registry,
            approvals,
            config,
            ctx,
            bus,
            feedback_edges,
            started: AtomicBool::new(false),
        }
    }

    pub fn execution_id(&self) -> &str {
        self.bus.execution_id()
    }

    /// The run's context; read-only observation for hosts building
    /// summaries.
    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.ctx
    }

    /// Subscribe to the execution's ordered event stream.
    pub fn subscribe(&self) -> ReceiverStream<ExecutionEvent> {
        self.bus.subscribe()
    }

    pub fn get_node_state(&self, node_id: &str) -> Option<NodeRecord> {
        self.ctx.node_state(node_id)
    }

    /// Build a persistable summary of the run as it stands. Hosts call
    /// this at terminal states; the captured node configs are what makes
    /// later replays able to detect configuration drift.
    pub fn snapshot_summary(&self, status: ExecutionStatus) -> ExecutionSummary {
        let mut summary = ExecutionSummary::started(
            self.execution_id(),
            &self.workflow.id,
            &self.workflow.name,
            self.ctx.workflow_input(),
        );
        summary.status = status;
        summary.working_directory = self.ctx.working_directory.clone();
        summary.nodes = self.ctx.states_snapshot();
        summary.node_configs = self
            .workflow
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.config.clone()))
            .collect();
        if status != ExecutionStatus::Running {
            summary.completed_at = Some(Utc::now());
        }
        if status == ExecutionStatus::Complete {
            summary.final_result = Some(self.gather_final_result());
        }
        summary
    }

    /// Cooperatively cancel the run. Idempotent; a completed run ignores
    /// it. Cancels every approval pending for this execution.
    pub fn interrupt(&self) {
        if self.ctx.is_cancelled() {
            return;
        }
        tracing::info!(execution = %self.execution_id(), "interrupt requested");
        self.ctx.cancel_token().cancel();
        self.approvals.cancel_all(self.execution_id());
    }

    /// Execute the workflow to a terminal state.
    ///
    /// Emits the full event stream along the way; the returned value is
    /// the gathered output-node result. A second call on the same engine
    /// is an error: one engine drives one execution.
    pub async fn execute(&self, input: Value) -> Result<Value> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Custom(
                "engine already executed; build a new engine per run".into(),
            ));
        }

        let issues = validate_workflow(&self.workflow, &self.registry);
        if !issues.is_empty() {
            self.bus
                .publish(ExecutionEvent::ValidationError {
                    execution_id: self.execution_id().to_string(),
                    errors: issues.clone(),
                    timestamp: Utc::now(),
                })
                .await;
            return Err(EngineError::Validation(issues));
        }

        self.ctx.set_workflow_input(input);
        self.bus
            .publish(ExecutionEvent::ExecutionStart {
                execution_id: self.execution_id().to_string(),
                workflow_id: self.workflow.id.clone(),
                timestamp: Utc::now(),
            })
            .await;

        match self.run_loop().await {
            Ok(result) => {
                self.bus
                    .publish(ExecutionEvent::ExecutionComplete {
                        execution_id: self.execution_id().to_string(),
                        result: Some(result.clone()),
                        timestamp: Utc::now(),
                    })
                    .await;
                Ok(result)
            }
            Err(error) => {
                self.bus
                    .publish(ExecutionEvent::ExecutionError {
                        execution_id: self.execution_id().to_string(),
                        error: error.to_string(),
                        timestamp: Utc::now(),
                    })
                    .await;
                Err(error)
            }
        }
    }

    async fn run_loop(&self) -> Result<Value> {
        // Active data edges; feedback edges never participate in
        // readiness or skipping.
        let mut active: HashSet<String> = self
            .workflow
            .edges
            .iter()
            .filter(|e| !self.feedback_edges.contains(&e.id))
            .map(|e| e.id.clone())
            .collect();

        let (completion_tx, mut completion_rx) = mpsc::unbounded_channel::<Completion>();
        let mut in_flight: HashMap<String, JoinHandle<()>> = HashMap::new();
        let cancel = self.ctx.cancel_token();

        loop {
            for node_id in self.ready_nodes(&active, &in_flight) {
                if let Err(error) = self.dispatch(&node_id, &completion_tx, &mut in_flight).await {
                    cancel.cancel();
                    self.approvals.cancel_all(self.execution_id());
                    self.quiesce(&mut in_flight, &mut completion_rx).await;
                    return Err(error);
                }
            }

            if in_flight.is_empty() {
                if self.has_pending() {
                    // Nothing runnable, nothing running: the frontier is
                    // wedged (should be unreachable on a validated graph).
                    return Err(EngineError::Custom(
                        "execution stalled with unreachable pending nodes".into(),
                    ));
                }
                break;
            }

            // The engine keeps a sender alive, so recv() only yields None
            // on cancellation racing the channel; fold both into one path.
            let completion = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                completion = completion_rx.recv() => completion,
            };

            let Some(completion) = completion else {
                self.approvals.cancel_all(self.execution_id());
                self.quiesce(&mut in_flight, &mut completion_rx).await;
                return Err(EngineError::Cancelled);
            };

            in_flight.remove(&completion.node_id);
            if let Err(error) = self.handle_completion(completion, &mut active).await {
                // Failure policy: stop the world, let executors observe
                // the token, drain their terminal completions, then
                // surface the error once at execution level.
                cancel.cancel();
                self.approvals.cancel_all(self.execution_id());
                self.quiesce(&mut in_flight, &mut completion_rx).await;
                return Err(error);
            }
        }

        Ok(self.gather_final_result())
    }

    /// Pending nodes whose active incoming edges admit execution.
    fn ready_nodes(
        &self,
        active: &HashSet<String>,
        in_flight: &HashMap<String, JoinHandle<()>>,
    ) -> Vec<String> {
        let mut ready = Vec::new();
        for node in &self.workflow.nodes {
            if self.ctx.status_of(&node.id) != NodeStatus::Pending || in_flight.contains_key(&node.id) {
                continue;
            }

            let sources: Vec<String> = self
                .workflow
                .incoming_edges(&node.id)
                .filter(|e| active.contains(&e.id))
                .map(|e| e.source.clone())
                .collect();

            let admitted = if sources.is_empty() {
                // Only the entry frontier has no active inputs; skipped
                // subtrees are settled by propagate_skips before we get
                // here.
                node.node_type == NodeType::Input
            } else {
                let complete = |id: &String| self.ctx.status_of(id) == NodeStatus::Complete;
                let settled = |id: &String| self.ctx.status_of(id).is_settled();
                match merge_strategy(node) {
                    Some(MergeStrategy::FirstComplete) => sources.iter().any(complete),
                    // wait-all merges and plain nodes: every active
                    // source settled, at least one of them complete.
                    _ => sources.iter().all(settled) && sources.iter().any(complete),
                }
            };
            if admitted {
                ready.push(node.id.clone());
            }
        }
        ready
    }

    fn has_pending(&self) -> bool {
        self.workflow
            .nodes
            .iter()
            .any(|n| self.ctx.status_of(&n.id) == NodeStatus::Pending)
    }

    async fn dispatch(
        &self,
        node_id: &str,
        completion_tx: &mpsc::UnboundedSender<Completion>,
        in_flight: &mut HashMap<String, JoinHandle<()>>,
    ) -> Result<()> {
        let node = self
            .workflow
            .node(node_id)
            .ok_or_else(|| EngineError::Custom(format!("dispatched unknown node '{node_id}'")))?
            .clone();
        let executor = self.registry.executor_for(node.node_type)?;

        self.ctx.mark_running(&node.id);
        let run_count = self.ctx.bump_run_count(&node.id);
        self.bus
            .publish(ExecutionEvent::NodeStart {
                execution_id: self.execution_id().to_string(),
                node_id: node.id.clone(),
                node_name: node.name.clone(),
                run_count,
                timestamp: Utc::now(),
            })
            .await;
        tracing::debug!(node = %node.id, run_count, "node dispatched");

        let emitter = EventEmitter::new(Arc::clone(&self.bus), node.id.clone(), node.name.clone());
        let ctx = Arc::clone(&self.ctx);
        let tx = completion_tx.clone();
        let task_node_id = node.id.clone();
        let handle = tokio::spawn(async move {
            let result = executor.execute(&node, ctx, emitter).await;
            let _ = tx.send(Completion {
                node_id: task_node_id,
                result,
            });
        });
        in_flight.insert(node_id.to_string(), handle);
        Ok(())
    }

    async fn handle_completion(
        &self,
        completion: Completion,
        active: &mut HashSet<String>,
    ) -> Result<()> {
        let node_id = completion.node_id;
        let node = self
            .workflow
            .node(&node_id)
            .ok_or_else(|| EngineError::Custom(format!("completion for unknown node '{node_id}'")))?;

        let execution = match completion.result {
            Ok(execution) => execution,
            Err(error) => {
                if error.is_cancelled() && self.ctx.is_cancelled() {
                    // Cancellation is reported once, at execution level.
                    return Ok(());
                }
                self.ctx.mark_error(&node_id, error.to_string());
                self.bus
                    .publish(ExecutionEvent::NodeError {
                        execution_id: self.execution_id().to_string(),
                        node_id: node_id.clone(),
                        error: error.to_string(),
                        timestamp: Utc::now(),
                    })
                    .await;
                return Err(EngineError::node_execution(&node_id, error.to_string()));
            }
        };

        let executor = self.registry.executor_for(node.node_type)?;
        let mut handle = executor.output_handle(&execution, node);

        self.ctx.mark_complete(&node_id, execution.output.clone());
        self.bus
            .publish(ExecutionEvent::NodeComplete {
                execution_id: self.execution_id().to_string(),
                node_id: node_id.clone(),
                result: execution.output.clone(),
                timestamp: Utc::now(),
            })
            .await;

        // Rejected approvals may close a revision loop instead of
        // branching.
        if node.node_type == NodeType::Approval && handle.as_deref() == Some("rejected") {
            match self.arm_rejection_loop(node, &execution, active).await? {
                LoopDecision::LoopArmed => return Ok(()),
                LoopDecision::ForceApprove => handle = Some("approved".to_string()),
                LoopDecision::NoLoop => {}
            }
        }

        self.apply_branch_masking(&node_id, handle.as_deref(), active);
        self.propagate_skips(active);
        Ok(())
    }

    /// Mask outgoing edges whose handle differs from the nomination.
    fn apply_branch_masking(
        &self,
        node_id: &str,
        nominated: Option<&str>,
        active: &mut HashSet<String>,
    ) {
        for edge in self.workflow.outgoing_edges(node_id) {
            if self.feedback_edges.contains(&edge.id) {
                continue;
            }
            if !edge.matches_handle(nominated) {
                tracing::debug!(edge = %edge.id, ?nominated, "edge masked by branch decision");
                active.remove(&edge.id);
            }
        }
    }

    /// Derive skips from edge activity: a pending node with no live
    /// active input (none at all, or every source skipped) is skipped,
    /// and the derivation cascades.
    fn propagate_skips(&self, active: &HashSet<String>) {
        loop {
            let mut changed = false;
            for node in &self.workflow.nodes {
                if self.ctx.status_of(&node.id) != NodeStatus::Pending
                    || node.node_type == NodeType::Input
                {
                    continue;
                }
                let sources: Vec<String> = self
                    .workflow
                    .incoming_edges(&node.id)
                    .filter(|e| active.contains(&e.id))
                    .map(|e| e.source.clone())
                    .collect();
                let dead = sources.is_empty()
                    || sources
                        .iter()
                        .all(|id| self.ctx.status_of(id) == NodeStatus::Skipped);
                if dead {
                    tracing::debug!(node = %node.id, "node skipped");
                    self.ctx.mark_skipped(&node.id);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Try to arm the rejection-feedback loop for a rejected approval.
    async fn arm_rejection_loop(
        &self,
        approval: &Node,
        execution: &NodeExecution,
        active: &mut HashSet<String>,
    ) -> Result<LoopDecision> {
        // Ancestry was computed pre-run; feedback edges are the ones that
        // point back into it.
        let target = self
            .workflow
            .outgoing_edges(&approval.id)
            .filter(|e| self.feedback_edges.contains(&e.id))
            .filter(|e| e.matches_handle(Some("rejected")))
            .map(|e| e.target.clone())
            .next();
        let Some(ancestor_id) = target else {
            return Ok(LoopDecision::NoLoop);
        };
        let ancestor = self
            .workflow
            .node(&ancestor_id)
            .ok_or_else(|| EngineError::Custom(format!("feedback target '{ancestor_id}' missing")))?;

        // Bound the loop: the ancestor's handler if it has one, the
        // engine safety valve otherwise.
        let handler = (ancestor.node_type.is_agent())
            .then(|| ancestor.typed_config::<AgentNodeConfig>().ok())
            .flatten()
            .and_then(|c| c.rejection_handler);
        let max_cycles = handler
            .as_ref()
            .map(|h| h.max_retries)
            .unwrap_or(self.config.max_feedback_cycles);
        let cycles_done = self.ctx.run_count(&ancestor_id).saturating_sub(1);

        if cycles_done >= max_cycles {
            let behavior = handler.map(|h| h.on_max_retries).unwrap_or_default();
            tracing::warn!(
                ancestor = %ancestor_id,
                cycles_done,
                ?behavior,
                "rejection limit reached"
            );
            return match behavior {
                OnMaxRetries::Fail => {
                    let message = format!(
                        "rejection limit of {max_cycles} reached for node '{}'",
                        ancestor.name
                    );
                    self.ctx.mark_error(&ancestor_id, &message);
                    self.bus
                        .publish(ExecutionEvent::NodeError {
                            execution_id: self.execution_id().to_string(),
                            node_id: ancestor_id.clone(),
                            error: message.clone(),
                            timestamp: Utc::now(),
                        })
                        .await;
                    Err(EngineError::node_execution(&ancestor_id, message))
                }
                // Give up on revision; the rejected branch proceeds.
                OnMaxRetries::Skip => Ok(LoopDecision::NoLoop),
                OnMaxRetries::ApproveAnyway => Ok(LoopDecision::ForceApprove),
            };
        }

        // Re-arm the ancestor's downstream subtree, the approval
        // included; the gate has to fire again on the revised output.
        let mut reset: HashSet<String> = self.workflow.descendants_of(&ancestor_id);
        reset.insert(ancestor_id.clone());
        for node_id in &reset {
            self.ctx.reset_to_pending(node_id);
        }
        for edge in &self.workflow.edges {
            if reset.contains(&edge.source) && !self.feedback_edges.contains(&edge.id) {
                active.insert(edge.id.clone());
            }
        }

        let feedback = execution.output["feedback"]
            .as_str()
            .unwrap_or("The result was rejected")
            .to_string();
        self.ctx.set_feedback(&ancestor_id, feedback);

        self.bus
            .publish(ExecutionEvent::NodeOutput {
                execution_id: self.execution_id().to_string(),
                node_id: ancestor_id.clone(),
                event: NodeStreamEvent::RunStart {
                    run_count: self.ctx.run_count(&ancestor_id) + 1,
                },
                timestamp: Utc::now(),
            })
            .await;
        tracing::info!(ancestor = %ancestor_id, "rejection loop armed");
        Ok(LoopDecision::LoopArmed)
    }

    /// Quiesce the run: await every in-flight executor (they observe the
    /// cancellation token; parked approvals were already rejected), then
    /// drain terminal completions so late successes still land in the
    /// context before the summary is written.
    async fn quiesce(
        &self,
        in_flight: &mut HashMap<String, JoinHandle<()>>,
        completion_rx: &mut mpsc::UnboundedReceiver<Completion>,
    ) {
        for (node_id, handle) in in_flight.drain() {
            if let Err(error) = handle.await {
                tracing::warn!(node = %node_id, %error, "executor task aborted during shutdown");
            }
        }
        while let Ok(completion) = completion_rx.try_recv() {
            if let Ok(execution) = completion.result {
                self.ctx.mark_complete(&completion.node_id, execution.output);
            }
        }
    }

    /// Gather outputs of completed output nodes into the final result.
    fn gather_final_result(&self) -> Value {
        let mut outputs: Vec<(String, Value)> = Vec::new();
        for node in self.workflow.output_nodes() {
            if self.ctx.status_of(&node.id) == NodeStatus::Complete {
                if let Some(value) = self.ctx.output_of(&node.id) {
                    outputs.push((node.name.clone(), value));
                }
            }
        }
        match outputs.len() {
            0 => Value::Null,
            1 => outputs.remove(0).1,
            _ => Value::Object(outputs.into_iter().collect::<Map<String, Value>>()),
        }
    }
}

fn merge_strategy(node: &Node) -> Option<MergeStrategy> {
    (node.node_type == NodeType::Merge).then(|| MergeExecutor::strategy_of(node))
}

enum LoopDecision {
    /// The ancestor subtree was re-armed; no branch masking applies
    LoopArmed,
    /// Retry budget exhausted with `approve-anyway`: proceed as approved
    ForceApprove,
    /// Not a feedback rejection; mask branches normally
    NoLoop,
}
