//! Process-wide rendezvous table for pending human approvals
//!
//! An approval executor suspends by parking on the [`ApprovalRegistry`]:
//! it registers a single-shot resolver keyed by `"{executionId}:{nodeId}"`
//! and awaits the paired receiver. Whoever resolves the approval
//! ([`submit`](ApprovalRegistry::submit) from the host surface, the
//! per-node timeout, [`cancel`](ApprovalRegistry::cancel), or engine
//! cancellation via [`cancel_all`](ApprovalRegistry::cancel_all)) wakes
//! the executor exactly once.
//!
//! # Invariants
//!
//! - Each entry is resolved at most once; every resolution path removes
//!   the entry, so the registry never leaks a resolver.
//! - Timeout tasks are aborted on any other resolution.
//! - All operations are guarded by a single mutex; the registry is the
//!   only process-global mutable state in the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

/// What a suspended approval executor needs the host to show.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub node_id: String,
    pub node_name: String,

    /// Interpolated prompt shown to the approver
    pub prompt_message: String,

    /// Prompt shown when the approver rejects and is asked for feedback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_prompt: Option<String>,

    /// Selected upstream outputs, keyed for display
    pub display_data: Value,

    /// Absolute deadline, when the node configures `timeoutMinutes`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_at: Option<DateTime<Utc>>,
}

/// The approver's decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResponse {
    pub approved: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,

    pub responded_at: DateTime<Utc>,
}

impl ApprovalResponse {
    pub fn approved() -> Self {
        Self {
            approved: true,
            feedback: None,
            responded_at: Utc::now(),
        }
    }

    pub fn rejected(feedback: impl Into<String>) -> Self {
        Self {
            approved: false,
            feedback: Some(feedback.into()),
            responded_at: Utc::now(),
        }
    }
}

/// How a pending approval was resolved. The waiting executor maps this to
/// its node outcome according to the node's configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalOutcome {
    /// `submit` delivered a response
    Submitted(ApprovalResponse),
    /// The per-node timeout fired before any response
    TimedOut,
    /// `cancel` rejected this specific approval
    Cancelled,
    /// Engine cancellation rejected every approval of the execution
    Interrupted,
}

struct PendingApproval {
    resolver: oneshot::Sender<ApprovalOutcome>,
    timeout: Option<AbortHandle>,
}

impl PendingApproval {
    fn resolve(self, outcome: ApprovalOutcome) {
        if let Some(handle) = self.timeout {
            handle.abort();
        }
        // The receiver may already be gone if the executor was dropped
        // mid-cancellation; nothing left to wake in that case.
        let _ = self.resolver.send(outcome);
    }
}

/// Keyed rendezvous table for pending approvals. See module docs.
#[derive(Default)]
pub struct ApprovalRegistry {
    pending: Mutex<HashMap<String, PendingApproval>>,
}

fn key_of(execution_id: &str, node_id: &str) -> String {
    format!("{execution_id}:{node_id}")
}

impl ApprovalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared process-wide registry.
    ///
    /// Hosts that run multiple engines in one process resolve approvals
    /// through this instance; tests construct their own for isolation.
    pub fn global() -> &'static Arc<ApprovalRegistry> {
        static GLOBAL: OnceLock<Arc<ApprovalRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(ApprovalRegistry::new()))
    }

    /// Park a new approval and receive its single-shot outcome channel.
    ///
    /// When `timeout` is set, a timer task resolves the entry with
    /// [`ApprovalOutcome::TimedOut`] after the duration elapses; the timer
    /// is aborted if anything else resolves the entry first. Registering
    /// over an existing key cancels the previous occupant.
    pub fn register(
        self: &Arc<Self>,
        execution_id: &str,
        node_id: &str,
        timeout: Option<Duration>,
    ) -> oneshot::Receiver<ApprovalOutcome> {
        let key = key_of(execution_id, node_id);
        let (tx, rx) = oneshot::channel();

        let timeout_handle = timeout.map(|after| {
            let registry = Arc::clone(self);
            let timeout_key = key.clone();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                registry.fire_timeout(&timeout_key);
            })
            .abort_handle()
        });

        let previous = self.pending.lock().expect("approval registry poisoned").insert(
            key.clone(),
            PendingApproval {
                resolver: tx,
                timeout: timeout_handle,
            },
        );
        if let Some(stale) = previous {
            tracing::warn!(key, "replacing stale approval registration");
            stale.resolve(ApprovalOutcome::Cancelled);
        }

        rx
    }

    /// Deliver a response. Returns `false` when no approval is pending
    /// under the key.
    pub fn submit(&self, execution_id: &str, node_id: &str, response: ApprovalResponse) -> bool {
        self.take(execution_id, node_id)
            .map(|entry| entry.resolve(ApprovalOutcome::Submitted(response)))
            .is_some()
    }

    /// Reject a pending approval with `Approval cancelled`. Returns
    /// `false` when absent.
    pub fn cancel(&self, execution_id: &str, node_id: &str) -> bool {
        self.take(execution_id, node_id)
            .map(|entry| entry.resolve(ApprovalOutcome::Cancelled))
            .is_some()
    }

    /// Reject every pending approval belonging to `execution_id` with
    /// `Execution interrupted`.
    pub fn cancel_all(&self, execution_id: &str) {
        let prefix = format!("{execution_id}:");
        let drained: Vec<PendingApproval> = {
            let mut pending = self.pending.lock().expect("approval registry poisoned");
            let keys: Vec<String> = pending
                .keys()
                .filter(|k| k.starts_with(&prefix))
                .cloned()
                .collect();
            keys.into_iter().filter_map(|k| pending.remove(&k)).collect()
        };
        for entry in drained {
            entry.resolve(ApprovalOutcome::Interrupted);
        }
    }

    /// Keys of every approval currently parked, for observability.
    pub fn pending_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .pending
            .lock()
            .expect("approval registry poisoned")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    fn take(&self, execution_id: &str, node_id: &str) -> Option<PendingApproval> {
        self.pending
            .lock()
            .expect("approval registry poisoned")
            .remove(&key_of(execution_id, node_id))
    }

    fn fire_timeout(&self, key: &str) {
        let entry = self.pending.lock().expect("approval registry poisoned").remove(key);
        if let Some(entry) = entry {
            tracing::debug!(key, "approval timed out");
            entry.resolve(ApprovalOutcome::TimedOut);
        }
    }
}
