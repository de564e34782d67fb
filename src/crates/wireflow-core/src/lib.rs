//! # wireflow-core - DAG execution engine for agent workflows
//!
//! Executes user-defined agent workflows expressed as directed acyclic
//! graphs: typed nodes (AI agents, conditional branches, merge points,
//! scripted transforms, human-approval gates, input/output terminals)
//! connected by data edges. The engine drives concurrent node execution,
//! streams per-node progress events, suspends cooperatively for human
//! approval, replays prior executions from a chosen node, and gates
//! structural self-modification behind a validator.
//!
//! ## Core Concepts
//!
//! - **[`Workflow`]** - the immutable graph description: nodes, edges,
//!   named output handles
//! - **[`DAGEngine`]** - topological scheduler: readiness tracking over
//!   active edges, fan-out, branch masking, rejection-feedback loops,
//!   cooperative cancellation
//! - **[`EventBus`]** / **[`ExecutionEvent`]** - ordered per-execution
//!   event stream with per-subscriber backpressure
//! - **[`ApprovalRegistry`]** - process-wide rendezvous for pending human
//!   approvals; `submit` / `cancel` / timeout resolve each entry exactly
//!   once
//! - **[`ReplayPlanner`]** - reuse/re-execute partitioning with
//!   configuration-drift demotion
//! - **[`evolution`]** - validation and transactional application of
//!   mutations proposed by `self-reflect` nodes
//! - **[`AgentRunner`] / [`ScriptRunner`]** - host-implemented
//!   capabilities; the engine is an orchestrator, not an agent SDK
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wireflow_core::{
//!     ApprovalRegistry, DAGEngine, EngineConfig, NodeRegistry, Runners,
//! };
//! use wireflow_store::{EvolutionHistory, InMemoryStore};
//!
//! # async fn example(workflow: wireflow_core::Workflow,
//! #                  runners: Runners) -> wireflow_core::Result<()> {
//! let approvals = Arc::clone(ApprovalRegistry::global());
//! let store = Arc::new(InMemoryStore::new());
//! let registry = Arc::new(NodeRegistry::builtin(
//!     runners,
//!     Arc::clone(&approvals),
//!     store,
//!     EvolutionHistory::new("./history"),
//!     &EngineConfig::default(),
//! ));
//!
//! let engine = DAGEngine::new(
//!     workflow,
//!     registry,
//!     approvals,
//!     EngineConfig::default(),
//! );
//!
//! // Observe progress while the run is in flight.
//! let mut events = engine.subscribe();
//! tokio::spawn(async move {
//!     use tokio_stream::StreamExt;
//!     while let Some(event) = events.next().await {
//!         println!("{}", serde_json::to_string(&event).unwrap());
//!     }
//! });
//!
//! let result = engine.execute(serde_json::json!("hello")).await?;
//! println!("final: {result}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────────────────────────┐
//!                │            DAGEngine             │
//!                │  validate → frontier → dispatch  │
//!                │  branch masking · merge · loops  │
//!                └───────┬───────────────┬──────────┘
//!                        │ spawn         │ events
//!                        ▼               ▼
//!            ┌───────────────────┐   ┌─────────────┐
//!            │   NodeExecutors   │──▶│  EventBus   │──▶ subscribers
//!            │ input/output      │   └─────────────┘
//!            │ agent (runner)    │
//!            │ condition/merge   │   ┌──────────────────┐
//!            │ javascript        │──▶│ ApprovalRegistry │◀── submit /
//!            │ approval          │   │ (process-wide)   │    cancel
//!            │ self-reflect ─────┼─┐ └──────────────────┘
//!            └───────────────────┘ │
//!                                  ▼
//!                     ┌─────────────────────────┐
//!                     │  EvolutionValidator /    │
//!                     │  EvolutionApplier        │──▶ Store + JSONL
//!                     └─────────────────────────┘       journal
//! ```
//!
//! ## Ordering Guarantees
//!
//! `execution-start` precedes all node events; `node-start` for a node
//! precedes every event bearing that node; the terminal event
//! (`execution-complete`, `execution-error`, `validation-error`) is
//! always last. There is no total order across nodes; subscribers sort
//! by event timestamp when they need one.

pub mod approval;
pub mod bus;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod event;
pub mod evolution;
pub mod executors;
pub mod registry;
pub mod replay;
pub mod runner;
pub mod schema;
pub mod workflow;

// Re-export main types
pub use approval::{ApprovalOutcome, ApprovalRegistry, ApprovalRequest, ApprovalResponse};
pub use bus::{EventBus, EventEmitter};
pub use config::EngineConfig;
pub use context::{get_nested_value, ExecutionContext};
pub use engine::{compute_feedback_edges, validate_workflow, DAGEngine, EngineOptions};
pub use error::{EngineError, Result, ValidationIssue};
pub use event::{ExecutionEvent, NodeStreamEvent};
pub use evolution::{
    describe_workflow_diff, project_evolution, validate_evolution, EvolutionApplier,
    EvolutionMode, EvolutionRecord, EvolutionScope, EvolutionValidation, Mutation, NodeDraft,
    SanitizedEvolution, ValidateOptions, WorkflowDiff, WorkflowEvolution, WorkflowSnapshot,
};
pub use executors::{NodeExecution, NodeExecutor};
pub use registry::NodeRegistry;
pub use replay::{ReplayPlan, ReplayPlanner};
pub use runner::{AgentOutcome, AgentRequest, AgentRunner, OutputFormat, Runners, ScriptRunner};
pub use schema::{NodeConfigSchema, PropertySchema, ValueKind};
pub use workflow::{Edge, Node, NodeType, Position, Workflow};

// Persistence shapes shared with the store crate
pub use wireflow_store::{ExecutionStatus, ExecutionSummary, NodeRecord, NodeStatus};
