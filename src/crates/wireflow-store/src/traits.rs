//! Extensible storage trait for workflow definitions and execution records
//!
//! This module defines the **[`Store`]** trait, the persistence seam between
//! the execution engine and whatever backend the host application uses
//! (PostgreSQL, SQLite, flat files, ...). The engine treats workflow
//! definitions as opaque JSON documents keyed by workflow id; execution
//! summaries are typed because the replay planner reads them back.
//!
//! # Contract
//!
//! - `put_workflow` upserts a document; `update_workflow` requires the
//!   document to already exist and fails with
//!   [`StoreError::WorkflowNotFound`] otherwise. Evolution application
//!   relies on this distinction: a mutation batch must never create a
//!   workflow as a side effect.
//! - Writes are serialized by the store. Callers may issue concurrent
//!   writes for different keys; the reference implementation guards its
//!   maps with an `RwLock`.
//! - `list_executions` returns summaries for one workflow, most recent
//!   first by `started_at`.
//!
//! # Example
//!
//! ```rust,ignore
//! use wireflow_store::{Store, InMemoryStore};
//! use serde_json::json;
//!
//! let store = InMemoryStore::new();
//! store.put_workflow("wf-1", json!({"id": "wf-1", "name": "Demo"})).await?;
//! let doc = store.get_workflow("wf-1").await?.expect("present");
//! ```

use crate::error::Result;
use crate::summary::ExecutionSummary;
use async_trait::async_trait;
use serde_json::Value;

/// Persistence backend for workflow documents and execution summaries.
///
/// Implementations must be `Send + Sync`; the engine shares one store
/// across concurrent executions behind an `Arc<dyn Store>`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a workflow document by id. `Ok(None)` when absent.
    async fn get_workflow(&self, workflow_id: &str) -> Result<Option<Value>>;

    /// Insert or replace a workflow document.
    async fn put_workflow(&self, workflow_id: &str, document: Value) -> Result<()>;

    /// Replace an existing workflow document.
    ///
    /// # Errors
    ///
    /// [`StoreError::WorkflowNotFound`](crate::StoreError::WorkflowNotFound)
    /// if no document is stored under `workflow_id`.
    async fn update_workflow(&self, workflow_id: &str, document: Value) -> Result<()>;

    /// Ids of all stored workflows.
    async fn list_workflows(&self) -> Result<Vec<String>>;

    /// Fetch an execution summary by id. `Ok(None)` when absent.
    async fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionSummary>>;

    /// Insert or replace an execution summary.
    async fn put_execution(&self, summary: ExecutionSummary) -> Result<()>;

    /// Summaries for one workflow, most recent first.
    async fn list_executions(&self, workflow_id: &str) -> Result<Vec<ExecutionSummary>>;
}
