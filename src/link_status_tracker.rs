//! Link Status Tracker
//!
//! Tracks the detection-link state of each feed and reports lost/recovered
//! transitions. Only transitions are logged.

use crate::camera_state_store::FeedId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Link status of one feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    /// No channel has reported yet
    Unknown,
    Online,
    Offline,
}

/// Link transition event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkEvent {
    /// Online -> Offline, or the first report was Offline
    Lost,
    /// Offline -> Online
    Recovered,
}

/// Tracks per-feed link status
pub struct LinkStatusTracker {
    statuses: RwLock<BTreeMap<FeedId, LinkStatus>>,
}

impl LinkStatusTracker {
    pub fn new() -> Self {
        Self {
            statuses: RwLock::new(BTreeMap::new()),
        }
    }

    /// Record a link report and return the transition, if any
    pub async fn update(&self, feed_id: FeedId, online: bool) -> Option<LinkEvent> {
        let new_status = if online {
            LinkStatus::Online
        } else {
            LinkStatus::Offline
        };

        let prev = self
            .statuses
            .write()
            .await
            .insert(feed_id, new_status)
            .unwrap_or(LinkStatus::Unknown);

        match (prev, new_status) {
            (LinkStatus::Online, LinkStatus::Offline) | (LinkStatus::Unknown, LinkStatus::Offline) => {
                tracing::warn!(feed_id = %feed_id, "Detection link lost");
                Some(LinkEvent::Lost)
            }
            (LinkStatus::Offline, LinkStatus::Online) => {
                tracing::info!(feed_id = %feed_id, "Detection link recovered");
                Some(LinkEvent::Recovered)
            }
            _ => None,
        }
    }

    /// Current status of a feed
    pub async fn get(&self, feed_id: FeedId) -> LinkStatus {
        self.statuses
            .read()
            .await
            .get(&feed_id)
            .copied()
            .unwrap_or(LinkStatus::Unknown)
    }

    /// All reported feeds
    pub async fn all(&self) -> BTreeMap<FeedId, LinkStatus> {
        self.statuses.read().await.clone()
    }

    /// Forget a feed (deliberate stop)
    pub async fn remove(&self, feed_id: FeedId) {
        self.statuses.write().await.remove(&feed_id);
    }
}

impl Default for LinkStatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initial_online_no_event() {
        let tracker = LinkStatusTracker::new();
        assert!(tracker.update(FeedId(1), true).await.is_none());
        assert_eq!(tracker.get(FeedId(1)).await, LinkStatus::Online);
    }

    #[tokio::test]
    async fn test_initial_offline_is_lost() {
        let tracker = LinkStatusTracker::new();
        assert_eq!(tracker.update(FeedId(1), false).await, Some(LinkEvent::Lost));
    }

    #[tokio::test]
    async fn test_lost_then_recovered() {
        let tracker = LinkStatusTracker::new();
        tracker.update(FeedId(2), true).await;
        assert_eq!(tracker.update(FeedId(2), false).await, Some(LinkEvent::Lost));
        assert_eq!(tracker.all().await[&FeedId(2)], LinkStatus::Offline);
        assert_eq!(tracker.update(FeedId(2), true).await, Some(LinkEvent::Recovered));
        assert_eq!(tracker.get(FeedId(2)).await, LinkStatus::Online);
    }

    #[tokio::test]
    async fn test_repeated_status_no_event() {
        let tracker = LinkStatusTracker::new();
        tracker.update(FeedId(3), false).await;
        assert!(tracker.update(FeedId(3), false).await.is_none());
        tracker.update(FeedId(3), true).await;
        assert!(tracker.update(FeedId(3), true).await.is_none());
    }

    #[tokio::test]
    async fn test_remove_resets_to_unknown() {
        let tracker = LinkStatusTracker::new();
        tracker.update(FeedId(4), true).await;
        tracker.remove(FeedId(4)).await;
        assert_eq!(tracker.get(FeedId(4)).await, LinkStatus::Unknown);
        assert!(tracker.all().await.is_empty());
    }
}
