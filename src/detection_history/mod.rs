//! DetectionHistory - Recent detections per feed (ring buffer)
//!
//! ## Responsibilities
//!
//! - Keep the last N detection rounds of each feed
//! - Expire entries by age at read time (nothing is swept in the background)

use crate::camera_state_store::{contains_emergency, Detection, FeedId};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Rounds kept per feed
pub const DEFAULT_CAPACITY: usize = 100;

/// One recorded round
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRecord {
    pub record_id: u64,
    pub feed_id: FeedId,
    pub detections: Vec<Detection>,
    pub has_emergency_vehicle: bool,
    pub processing_time: f64,
    pub recorded_at: DateTime<Utc>,
}

struct FeedRing {
    records: VecDeque<DetectionRecord>,
}

/// DetectionHistory instance
pub struct DetectionHistory {
    rings: RwLock<HashMap<FeedId, FeedRing>>,
    capacity: usize,
    ttl: ChronoDuration,
    next_id: AtomicU64,
}

impl DetectionHistory {
    /// Create history with a per-feed capacity and time-to-live
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            rings: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            ttl: ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::days(365)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Record a round; returns its id
    pub async fn record(
        &self,
        feed_id: FeedId,
        detections: Vec<Detection>,
        processing_time: f64,
    ) -> u64 {
        self.record_at(feed_id, detections, processing_time, Utc::now())
            .await
    }

    async fn record_at(
        &self,
        feed_id: FeedId,
        detections: Vec<Detection>,
        processing_time: f64,
        recorded_at: DateTime<Utc>,
    ) -> u64 {
        let record_id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let record = DetectionRecord {
            record_id,
            feed_id,
            has_emergency_vehicle: contains_emergency(&detections),
            detections,
            processing_time,
            recorded_at,
        };

        let mut rings = self.rings.write().await;
        let ring = rings.entry(feed_id).or_insert_with(|| FeedRing {
            records: VecDeque::with_capacity(self.capacity),
        });
        if ring.records.len() >= self.capacity {
            ring.records.pop_front();
        }
        ring.records.push_back(record);

        record_id
    }

    /// Unexpired rounds of a feed, newest first
    pub async fn recent(&self, feed_id: FeedId, count: usize) -> Vec<DetectionRecord> {
        self.recent_as_of(feed_id, count, Utc::now()).await
    }

    async fn recent_as_of(
        &self,
        feed_id: FeedId,
        count: usize,
        now: DateTime<Utc>,
    ) -> Vec<DetectionRecord> {
        let cutoff = now - self.ttl;
        let rings = self.rings.read().await;
        rings
            .get(&feed_id)
            .map(|ring| {
                ring.records
                    .iter()
                    .rev()
                    .filter(|r| r.recorded_at > cutoff)
                    .take(count)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop everything recorded for a feed
    pub async fn clear_feed(&self, feed_id: FeedId) {
        self.rings.write().await.remove(&feed_id);
    }

    /// Stored rounds for a feed, expired ones included
    pub async fn len(&self, feed_id: FeedId) -> usize {
        self.rings
            .read()
            .await
            .get(&feed_id)
            .map(|r| r.records.len())
            .unwrap_or(0)
    }
}

impl Default for DetectionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, Duration::from_secs(30))
    }
}
