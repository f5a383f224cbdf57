//! BatchQueue - Multi-feed request batching
//!
//! ## Responsibilities
//!
//! - Collect frames from channels during a short window
//! - Drain atomically and send all pending feeds in one request
//! - Fan the per-feed results back out onto the intake
//!
//! The queue is cleared before the network call, so frames that arrive
//! while a batch is in flight start the next batch. A lost connection to the
//! detection service leaves every feed's state untouched; only transient
//! failures produce empty updates.

use crate::ai_client::{BatchFrame, DetectionBackend, Prediction};
use crate::camera_state_store::FeedId;
use crate::detection_channel::{FeedEvent, SessionId};
use crate::error::Result;
use crate::frame_source::EncodedFrame;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Default batch window
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(500);

/// Pending frame
#[derive(Debug, Clone)]
pub struct BatchQueueEntry {
    pub feed_id: FeedId,
    pub session: SessionId,
    pub image_data: String,
    pub width: u32,
    pub height: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// BatchQueue instance
pub struct BatchQueue {
    entries: Mutex<Vec<BatchQueueEntry>>,
}

impl BatchQueue {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Append a frame for the next batch
    pub async fn enqueue(&self, feed_id: FeedId, session: SessionId, frame: EncodedFrame) {
        let mut entries = self.entries.lock().await;
        entries.push(BatchQueueEntry {
            feed_id,
            session,
            image_data: frame.image,
            width: frame.width,
            height: frame.height,
            enqueued_at: Utc::now(),
        });
    }

    /// Take every pending entry, leaving the queue empty
    pub async fn drain(&self) -> Vec<BatchQueueEntry> {
        std::mem::take(&mut *self.entries.lock().await)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl Default for BatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Keep the newest entry per feed, ordered by feed id
fn latest_per_feed(entries: Vec<BatchQueueEntry>) -> Vec<BatchQueueEntry> {
    let mut latest: HashMap<FeedId, BatchQueueEntry> = HashMap::new();
    for entry in entries {
        latest.insert(entry.feed_id, entry);
    }
    let mut entries: Vec<_> = latest.into_values().collect();
    entries.sort_by_key(|e| e.feed_id);
    entries
}

/// Timer-driven drain of a [`BatchQueue`]
pub struct BatchDispatcher {
    queue: Arc<BatchQueue>,
    backend: Arc<dyn DetectionBackend>,
    events: mpsc::Sender<FeedEvent>,
    /// Set after a connection loss until the next successful batch
    link_down: AtomicBool,
}

impl BatchDispatcher {
    pub fn new(
        queue: Arc<BatchQueue>,
        backend: Arc<dyn DetectionBackend>,
        events: mpsc::Sender<FeedEvent>,
    ) -> Self {
        Self {
            queue,
            backend,
            events,
            link_down: AtomicBool::new(false),
        }
    }

    /// Drain the queue and send one multi-feed request.
    ///
    /// Returns the number of feeds dispatched. A transient failure yields an
    /// empty update for every feed in it; a connection loss yields only
    /// failure and link-down events.
    pub async fn drain_and_dispatch(&self) -> Result<usize> {
        let entries = latest_per_feed(self.queue.drain().await);
        if entries.is_empty() {
            return Ok(0);
        }

        let frames: Vec<BatchFrame> = entries
            .iter()
            .map(|e| BatchFrame {
                feed_id: e.feed_id,
                image_data: e.image_data.clone(),
                timestamp: e.enqueued_at,
            })
            .collect();

        let started = Instant::now();
        let result = self.backend.detect_batch(&frames).await;
        let elapsed = started.elapsed().as_secs_f64();

        let mut results: HashMap<FeedId, Vec<Prediction>> = HashMap::new();
        let processing_time = match result {
            Ok(outcome) => {
                if self.link_down.swap(false, Ordering::SeqCst) {
                    tracing::info!(feeds = entries.len(), "Batch detection link restored");
                    for entry in &entries {
                        self.send(FeedEvent::link(entry.feed_id, entry.session, true))
                            .await;
                    }
                }
                let processing_time = outcome.processing_time.unwrap_or(elapsed);
                results.extend(outcome.results);
                processing_time
            }
            Err(e) if e.is_connection_loss() => {
                tracing::warn!(feeds = entries.len(), error = %e, "Batch detection link lost");
                self.link_down.store(true, Ordering::SeqCst);
                // Last known state stays in place
                for entry in &entries {
                    self.send(FeedEvent::failure(entry.feed_id, entry.session, e.to_string()))
                        .await;
                    self.send(FeedEvent::link(entry.feed_id, entry.session, false))
                        .await;
                }
                return Ok(entries.len());
            }
            Err(e) => {
                tracing::warn!(feeds = entries.len(), error = %e, "Batch detection failed");
                for entry in &entries {
                    self.send(FeedEvent::failure(entry.feed_id, entry.session, e.to_string()))
                        .await;
                }
                elapsed
            }
        };

        tracing::debug!(
            feeds = entries.len(),
            processing_time = processing_time,
            "Batch dispatched"
        );

        for entry in &entries {
            let detections = results
                .remove(&entry.feed_id)
                .unwrap_or_default()
                .into_iter()
                .map(|p| p.into_detection(entry.width, entry.height))
                .collect();
            self.send(FeedEvent::detections(
                entry.feed_id,
                entry.session,
                detections,
                processing_time,
            ))
            .await;
        }

        Ok(entries.len())
    }

    async fn send(&self, event: FeedEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!("Intake closed, dropping batch event");
        }
    }

    /// Spawn the drain timer
    pub fn start(self, window: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(window);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(window_ms = window.as_millis() as u64, "Batch dispatcher started");

            loop {
                ticker.tick().await;
                if self.events.is_closed() {
                    tracing::info!("Batch dispatcher stopped");
                    break;
                }
                if let Err(e) = self.drain_and_dispatch().await {
                    tracing::warn!(error = %e, "Batch dispatch error");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_client::{BatchOutcome, DetectOutcome, DetectRequest};
    use crate::detection_channel::FeedEventKind;
    use crate::error::Error;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    fn frame(tag: &str) -> EncodedFrame {
        EncodedFrame {
            image: tag.to_string(),
            width: 640,
            height: 480,
            captured_at: Utc::now(),
        }
    }

    struct FakeBatch {
        fail: bool,
        refused: AtomicBool,
        seen: StdMutex<Vec<Vec<BatchFrame>>>,
    }

    #[async_trait]
    impl DetectionBackend for FakeBatch {
        async fn health_check(&self) -> bool {
            true
        }

        async fn detect(&self, _request: &DetectRequest) -> Result<DetectOutcome> {
            Ok(DetectOutcome::default())
        }

        async fn detect_batch(&self, frames: &[BatchFrame]) -> Result<BatchOutcome> {
            self.seen.lock().unwrap().push(frames.to_vec());
            if self.refused.load(Ordering::SeqCst) {
                return Err(Error::BackendUnavailable("connection refused".to_string()));
            }
            if self.fail {
                return Err(Error::Api("503".to_string()));
            }
            Ok(BatchOutcome {
                results: frames
                    .iter()
                    .map(|f| {
                        let p = Prediction {
                            class_name: "car".to_string(),
                            confidence: 0.9,
                            x: 0.0,
                            y: 0.0,
                            width: 1.0,
                            height: 1.0,
                        };
                        (f.feed_id, vec![p; f.feed_id.0 as usize])
                    })
                    .collect(),
                processing_time: Some(0.25),
            })
        }
    }

    #[tokio::test]
    async fn test_drain_clears_queue() {
        let queue = BatchQueue::new();
        queue.enqueue(FeedId(1), 1, frame("a")).await;
        queue.enqueue(FeedId(2), 1, frame("b")).await;
        assert_eq!(queue.len().await, 2);

        let drained = queue.drain().await;
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty().await);
    }

    #[test]
    fn test_latest_entry_per_feed_wins() {
        let now = Utc::now();
        let entry = |id: u32, data: &str| BatchQueueEntry {
            feed_id: FeedId(id),
            session: 1,
            image_data: data.to_string(),
            width: 1,
            height: 1,
            enqueued_at: now,
        };
        let entries = latest_per_feed(vec![entry(2, "old"), entry(1, "x"), entry(2, "new")]);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].feed_id, FeedId(1));
        assert_eq!(entries[1].image_data, "new");
    }

    #[tokio::test]
    async fn test_dispatch_fans_out_results() {
        let queue = Arc::new(BatchQueue::new());
        let backend = Arc::new(FakeBatch {
            fail: false,
            refused: AtomicBool::new(false),
            seen: StdMutex::new(Vec::new()),
        });
        let (tx, mut rx) = mpsc::channel(16);
        let dispatcher = BatchDispatcher::new(queue.clone(), backend.clone(), tx);

        queue.enqueue(FeedId(1), 7, frame("a")).await;
        queue.enqueue(FeedId(3), 9, frame("c")).await;

        assert_eq!(dispatcher.drain_and_dispatch().await.unwrap(), 2);
        assert!(queue.is_empty().await);
        assert_eq!(backend.seen.lock().unwrap().len(), 1);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.feed_id, FeedId(1));
        assert_eq!(first.session, 7);
        match first.kind {
            FeedEventKind::Detections {
                detections,
                processing_time,
            } => {
                assert_eq!(detections.len(), 1);
                assert_eq!(detections[0].original_width, 640);
                assert_eq!(processing_time, 0.25);
            }
            other => panic!("unexpected event {:?}", other),
        }

        let second = rx.recv().await.unwrap();
        assert_eq!(second.session, 9);
        assert!(matches!(
            second.kind,
            FeedEventKind::Detections { ref detections, .. } if detections.len() == 3
        ));
    }

    #[tokio::test]
    async fn test_failed_batch_gives_empty_updates() {
        let queue = Arc::new(BatchQueue::new());
        let backend = Arc::new(FakeBatch {
            fail: true,
            refused: AtomicBool::new(false),
            seen: StdMutex::new(Vec::new()),
        });
        let (tx, mut rx) = mpsc::channel(16);
        let dispatcher = BatchDispatcher::new(queue.clone(), backend, tx);

        queue.enqueue(FeedId(2), 1, frame("b")).await;
        dispatcher.drain_and_dispatch().await.unwrap();

        assert!(matches!(rx.recv().await.unwrap().kind, FeedEventKind::Failure { .. }));
        assert!(matches!(
            rx.recv().await.unwrap().kind,
            FeedEventKind::Detections { ref detections, .. } if detections.is_empty()
        ));
    }

    #[tokio::test]
    async fn test_connection_loss_keeps_last_state() {
        let queue = Arc::new(BatchQueue::new());
        let backend = Arc::new(FakeBatch {
            fail: false,
            refused: AtomicBool::new(true),
            seen: StdMutex::new(Vec::new()),
        });
        let (tx, mut rx) = mpsc::channel(16);
        let dispatcher = BatchDispatcher::new(queue.clone(), backend.clone(), tx);

        for _ in 0..3 {
            queue.enqueue(FeedId(1), 4, frame("a")).await;
            dispatcher.drain_and_dispatch().await.unwrap();
            assert!(matches!(rx.recv().await.unwrap().kind, FeedEventKind::Failure { .. }));
            assert!(matches!(
                rx.recv().await.unwrap().kind,
                FeedEventKind::Link { online: false }
            ));
            assert!(rx.try_recv().is_err());
        }

        backend.refused.store(false, Ordering::SeqCst);
        queue.enqueue(FeedId(1), 4, frame("a")).await;
        dispatcher.drain_and_dispatch().await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap().kind,
            FeedEventKind::Link { online: true }
        ));
        assert!(matches!(
            rx.recv().await.unwrap().kind,
            FeedEventKind::Detections { ref detections, .. } if detections.len() == 1
        ));
    }

    #[tokio::test]
    async fn test_empty_queue_sends_nothing() {
        let backend = Arc::new(FakeBatch {
            fail: false,
            refused: AtomicBool::new(false),
            seen: StdMutex::new(Vec::new()),
        });
        let (tx, _rx) = mpsc::channel(16);
        let dispatcher = BatchDispatcher::new(Arc::new(BatchQueue::new()), backend.clone(), tx);

        assert_eq!(dispatcher.drain_and_dispatch().await.unwrap(), 0);
        assert!(backend.seen.lock().unwrap().is_empty());
    }
}
