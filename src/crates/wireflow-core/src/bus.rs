//! Per-execution event fan-out
//!
//! The [`EventBus`] carries one execution's ordered event stream to every
//! subscriber. Each subscriber owns a bounded queue; a subscriber that
//! falls behind blocks the producer (backpressure) rather than losing
//! events; the UI relies on event counts for progress display, so loss
//! is never silent. Subscribers whose receivers are dropped are pruned on
//! the next publish.
//!
//! Ordering: a single producer task (the engine) publishes; each
//! subscriber sees events in publish order. Executors do not publish
//! directly; they go through an [`EventEmitter`], which scopes their
//! streaming events to the right node and stamps timestamps at emission.

use crate::approval::ApprovalRequest;
use crate::event::{ExecutionEvent, NodeStreamEvent};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Fan-out hub for one execution's event stream.
pub struct EventBus {
    execution_id: String,
    buffer_size: usize,
    subscribers: Mutex<Vec<mpsc::Sender<ExecutionEvent>>>,
}

impl EventBus {
    pub fn new(execution_id: impl Into<String>, buffer_size: usize) -> Self {
        Self {
            execution_id: execution_id.into(),
            buffer_size: buffer_size.max(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Attach a new subscriber. Events published after this call are
    /// delivered in order; there is no replay of earlier events.
    pub fn subscribe(&self) -> ReceiverStream<ExecutionEvent> {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        self.subscribers.lock().expect("bus lock poisoned").push(tx);
        ReceiverStream::new(rx)
    }

    /// Deliver `event` to every live subscriber, waiting for room in full
    /// queues. Closed subscribers are pruned.
    pub async fn publish(&self, event: ExecutionEvent) {
        let senders: Vec<mpsc::Sender<ExecutionEvent>> = {
            self.subscribers.lock().expect("bus lock poisoned").clone()
        };

        let mut saw_closed = false;
        for sender in &senders {
            if sender.send(event.clone()).await.is_err() {
                saw_closed = true;
            }
        }

        if saw_closed {
            self.subscribers
                .lock()
                .expect("bus lock poisoned")
                .retain(|s| !s.is_closed());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("bus lock poisoned").len()
    }
}

/// Node-scoped handle executors use to stream progress.
///
/// Cheap to clone; every emission stamps the current time, satisfying the
/// monotonic-timestamp contract of the event stream.
#[derive(Clone)]
pub struct EventEmitter {
    bus: Arc<EventBus>,
    node_id: String,
    node_name: String,
}

impl EventEmitter {
    pub fn new(bus: Arc<EventBus>, node_id: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self {
            bus,
            node_id: node_id.into(),
            node_name: node_name.into(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Re-emit an executor streaming event as `node-output`.
    pub async fn node_output(&self, event: NodeStreamEvent) {
        self.bus
            .publish(ExecutionEvent::NodeOutput {
                execution_id: self.bus.execution_id().to_string(),
                node_id: self.node_id.clone(),
                event,
                timestamp: Utc::now(),
            })
            .await;
    }

    /// Announce an approval suspension with its request payload.
    pub async fn node_waiting(&self, approval: ApprovalRequest) {
        self.bus
            .publish(ExecutionEvent::NodeWaiting {
                execution_id: self.bus.execution_id().to_string(),
                node_id: self.node_id.clone(),
                node_name: self.node_name.clone(),
                approval,
                timestamp: Utc::now(),
            })
            .await;
    }
}
