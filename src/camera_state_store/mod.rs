//! CameraStateStore - Per-feed state (SSoT)
//!
//! ## Responsibilities
//!
//! - Own every CameraState value
//! - Apply transitions atomically (whole-map swap under one writer lock)
//! - Publish snapshots to subscribers
//!
//! Detection channels never touch state directly; they submit transitions
//! through the coordinator's intake.

mod types;

pub use types::*;

use crate::error::{Error, Result};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// CameraStateStore instance
pub struct CameraStateStore {
    states: RwLock<Arc<Snapshot>>,
    updates: watch::Sender<Arc<Snapshot>>,
}

impl CameraStateStore {
    /// Create a store holding the given feeds, all inactive
    pub fn new(feeds: impl IntoIterator<Item = (FeedId, String)>) -> Self {
        let snapshot: Snapshot = feeds
            .into_iter()
            .map(|(id, name)| (id, CameraState::new(id, name)))
            .collect();
        let snapshot = Arc::new(snapshot);
        let (updates, _) = watch::channel(snapshot.clone());

        Self {
            states: RwLock::new(snapshot),
            updates,
        }
    }

    /// Create feeds `1..=count` named "Road N"
    pub fn with_feed_count(count: u32) -> Self {
        Self::new((1..=count).map(|i| (FeedId(i), format!("Road {}", i))))
    }

    /// Apply a transition to one feed and return its new state
    pub async fn apply(&self, feed_id: FeedId, transition: StateTransition) -> Result<CameraState> {
        let mut guard = self.states.write().await;

        let current = guard
            .get(&feed_id)
            .ok_or_else(|| Error::NotFound(format!("Feed {} not found", feed_id)))?;
        let next_state = current.apply(&transition);

        if next_state == *current {
            return Ok(next_state);
        }

        let mut next = Snapshot::clone(&guard);
        next.insert(feed_id, next_state.clone());
        let next = Arc::new(next);
        *guard = next.clone();
        self.updates.send_replace(next);

        tracing::debug!(
            feed_id = %feed_id,
            is_active = next_state.is_active,
            traffic_count = next_state.traffic_count,
            has_emergency_vehicle = next_state.has_emergency_vehicle,
            "Feed state updated"
        );

        Ok(next_state)
    }

    /// New detection round for a feed
    pub async fn apply_detection_update(
        &self,
        feed_id: FeedId,
        detections: Vec<Detection>,
    ) -> Result<CameraState> {
        self.apply(feed_id, StateTransition::DetectionUpdate(detections))
            .await
    }

    /// Activate or deactivate a feed (count survives deactivation)
    pub async fn apply_status_change(&self, feed_id: FeedId, is_active: bool) -> Result<CameraState> {
        self.apply(feed_id, StateTransition::StatusChange(is_active))
            .await
    }

    /// Deliberate stop: deactivate and reset the feed
    pub async fn stop(&self, feed_id: FeedId) -> Result<CameraState> {
        self.apply(feed_id, StateTransition::Stop).await
    }

    /// Current snapshot of all feeds
    pub async fn snapshot(&self) -> Arc<Snapshot> {
        self.states.read().await.clone()
    }

    /// Current state of a single feed
    pub async fn get(&self, feed_id: FeedId) -> Option<CameraState> {
        self.states.read().await.get(&feed_id).cloned()
    }

    /// All known feed ids in ascending order
    pub async fn feed_ids(&self) -> Vec<FeedId> {
        self.states.read().await.keys().copied().collect()
    }

    /// Subscribe to snapshot changes
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.updates.subscribe()
    }
}

impl Default for CameraStateStore {
    fn default() -> Self {
        Self::with_feed_count(4)
    }
}
