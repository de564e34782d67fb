//! # wireflow-store - Persistence seam for wireflow
//!
//! This crate defines the storage abstractions the wireflow engine builds
//! on, plus reference implementations good enough for development and
//! testing:
//!
//! - [`Store`] - async trait for workflow documents and execution summaries
//! - [`InMemoryStore`] - thread-safe in-memory reference backend
//! - [`ExecutionSummary`] / [`NodeRecord`] - durable shapes for one run
//! - [`EvolutionHistory`] - append-only JSONL journals for self-evolution
//!   audit trails
//!
//! Workflow definitions are stored as opaque JSON documents keyed by
//! workflow id; the engine owns the typed model and serializes at this
//! seam. Execution summaries are typed here because the replay planner
//! reads them back and needs stable field semantics.
//!
//! Production deployments implement [`Store`] against their own backend
//! (SQL, document store, flat files); everything in the engine is written
//! against the trait, never a concrete backend.

pub mod error;
pub mod history;
pub mod memory;
pub mod summary;
pub mod traits;

pub use error::{Result, StoreError};
pub use history::EvolutionHistory;
pub use memory::InMemoryStore;
pub use summary::{ExecutionStatus, ExecutionSummary, NodeRecord, NodeStatus};
pub use traits::Store;
