//! RealtimeHub - WebSocket Distribution
//!
//! ## Responsibilities
//!
//! - WebSocket client registry
//! - Broadcast of feed state, signal decisions and link changes
//!
//! Messages are serialized once and fanned out as text frames.

use crate::camera_state_store::{CameraState, FeedId};
use crate::link_status_tracker::{LinkEvent, LinkStatus};
use crate::performance_monitor::PerformanceSummary;
use crate::signal_arbiter::{DecisionReason, SignalDecision};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Hub message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum HubMessage {
    /// A feed's state after an applied transition
    FeedState(CameraState),
    /// Current arbiter decision
    Signals(SignalsMessage),
    /// Detection link went down or came back
    LinkStatus(LinkStatusMessage),
    /// Rolling performance summary
    Performance(PerformanceSummary),
}

impl HubMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            HubMessage::FeedState(_) => "feed_state",
            HubMessage::Signals(_) => "signals",
            HubMessage::LinkStatus(_) => "link_status",
            HubMessage::Performance(_) => "performance",
        }
    }
}

/// Signal decision message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalsMessage {
    pub signals: SignalDecision,
    pub reason: DecisionReason,
    pub timestamp: String,
}

/// Link status message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkStatusMessage {
    pub feed_id: FeedId,
    pub status: LinkStatus,
    pub event: LinkEvent,
    pub timestamp: String,
}

/// Client connection
struct ClientConnection {
    id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

/// RealtimeHub instance
pub struct RealtimeHub {
    connections: RwLock<HashMap<Uuid, ClientConnection>>,
    connection_count: AtomicU64,
}

impl RealtimeHub {
    /// Create new RealtimeHub
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
        }
    }

    /// Register a new client
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut connections = self.connections.write().await;
            connections.insert(id, ClientConnection { id, tx });
        }

        self.connection_count.fetch_add(1, Ordering::Relaxed);

        tracing::info!(connection_id = %id, "Client connected");

        (id, rx)
    }

    /// Unregister a client
    pub async fn unregister(&self, id: &Uuid) {
        let mut connections = self.connections.write().await;
        if connections.remove(id).is_some() {
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(connection_id = %id, "Client disconnected");
        }
    }

    /// Broadcast message to all clients
    pub async fn broadcast(&self, message: HubMessage) {
        let json = match serde_json::to_string(&message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize message");
                return;
            }
        };

        let connections = self.connections.read().await;
        if connections.is_empty() {
            return;
        }
        tracing::debug!(
            message_type = %message.type_name(),
            client_count = connections.len(),
            "Broadcasting message to clients"
        );

        for conn in connections.values() {
            if let Err(e) = conn.tx.send(json.clone()) {
                tracing::warn!(connection_id = %conn.id, error = %e, "Failed to send message");
            }
        }
    }

    /// Get connection count
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}
