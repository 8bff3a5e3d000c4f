//! Gateway event bus.
//!
//! Observers (UIs, CLIs, log sinks) subscribe to a broadcast channel and
//! receive approval lifecycle events as they happen. Publishing never
//! blocks the request path: with no subscribers the event is dropped, and
//! a slow subscriber lags rather than stalling the sender.

use std::sync::Arc;

use kestrel_approvals::{ApprovalDecision, ToolApprovalRequest};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// An event emitted by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum GatewayEvent {
    /// A tool approval was submitted and is awaiting a decision.
    #[serde(rename = "tool.approval.requested")]
    #[serde(rename_all = "camelCase")]
    ApprovalRequested {
        id: String,
        request: ToolApprovalRequest,
        created_at_ms: i64,
        expires_at_ms: i64,
    },

    /// A pending approval received a decision.
    #[serde(rename = "tool.approval.resolved")]
    #[serde(rename_all = "camelCase")]
    ApprovalResolved {
        id: String,
        decision: ApprovalDecision,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resolved_by: Option<String>,
        ts: i64,
    },
}

/// Broadcast bus for [`GatewayEvent`]s.
///
/// Cheaply cloneable; events are `Arc`-wrapped so fan-out does not clone
/// payloads per subscriber.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<GatewayEvent>>,
}

impl EventBus {
    /// Create a bus whose per-subscriber backlog holds `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<GatewayEvent>> {
        self.sender.subscribe()
    }

    /// Publish an event. Dropped silently when nobody is listening.
    pub fn publish(&self, event: GatewayEvent) {
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
