//! In-memory store for development and testing
//!
//! [`InMemoryStore`] is the reference implementation of the [`Store`] trait:
//! thread-safe maps behind `Arc<RwLock<..>>`, no external dependencies, data
//! lost on restart. Suitable for tests, demos, and short-lived processes;
//! production deployments should implement [`Store`] against a real backend.

use crate::error::{Result, StoreError};
use crate::summary::ExecutionSummary;
use crate::traits::Store;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Thread-safe in-memory [`Store`] implementation.
///
/// Cloning is cheap and shares the underlying maps.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    workflows: Arc<RwLock<HashMap<String, Value>>>,
    executions: Arc<RwLock<HashMap<String, ExecutionSummary>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove all stored data. Intended for test isolation.
    pub async fn clear(&self) {
        self.workflows.write().await.clear();
        self.executions.write().await.clear();
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_workflow(&self, workflow_id: &str) -> Result<Option<Value>> {
        Ok(self.workflows.read().await.get(workflow_id).cloned())
    }

    async fn put_workflow(&self, workflow_id: &str, document: Value) -> Result<()> {
        self.workflows
            .write()
            .await
            .insert(workflow_id.to_string(), document);
        Ok(())
    }

    async fn update_workflow(&self, workflow_id: &str, document: Value) -> Result<()> {
        let mut workflows = self.workflows.write().await;
        match workflows.get_mut(workflow_id) {
            Some(slot) => {
                *slot = document;
                Ok(())
            }
            None => Err(StoreError::WorkflowNotFound(workflow_id.to_string())),
        }
    }

    async fn list_workflows(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.workflows.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionSummary>> {
        Ok(self.executions.read().await.get(execution_id).cloned())
    }

    async fn put_execution(&self, summary: ExecutionSummary) -> Result<()> {
        self.executions
            .write()
            .await
            .insert(summary.execution_id.clone(), summary);
        Ok(())
    }

    async fn list_executions(&self, workflow_id: &str) -> Result<Vec<ExecutionSummary>> {
        let executions = self.executions.read().await;
        let mut matching: Vec<ExecutionSummary> = executions
            .values()
            .filter(|s| s.workflow_id == workflow_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_then_get_workflow() {
        let store = InMemoryStore::new();
        store
            .put_workflow("wf-1", json!({"id": "wf-1", "name": "Demo"}))
            .await
            .unwrap();

        let doc = store.get_workflow("wf-1").await.unwrap().unwrap();
        assert_eq!(doc["name"], "Demo");
        assert!(store.get_workflow("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_requires_existing_document() {
        let store = InMemoryStore::new();

        let err = store
            .update_workflow("wf-1", json!({"id": "wf-1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::WorkflowNotFound(_)));

        store.put_workflow("wf-1", json!({"v": 1})).await.unwrap();
        store.update_workflow("wf-1", json!({"v": 2})).await.unwrap();
        let doc = store.get_workflow("wf-1").await.unwrap().unwrap();
        assert_eq!(doc["v"], 2);
    }

    #[tokio::test]
    async fn executions_listed_most_recent_first() {
        let store = InMemoryStore::new();

        let mut first = ExecutionSummary::started("exec-1", "wf-1", "Demo", json!(null));
        first.started_at = chrono::Utc::now() - chrono::Duration::seconds(60);
        let second = ExecutionSummary::started("exec-2", "wf-1", "Demo", json!(null));
        let other = ExecutionSummary::started("exec-3", "wf-2", "Other", json!(null));

        store.put_execution(first).await.unwrap();
        store.put_execution(second).await.unwrap();
        store.put_execution(other).await.unwrap();

        let listed = store.list_executions("wf-1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].execution_id, "exec-2");
        assert_eq!(listed[1].execution_id, "exec-1");
    }
}
