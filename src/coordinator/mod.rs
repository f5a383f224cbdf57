//! Coordinator - Feed lifecycle and event intake
//!
//! ## Responsibilities
//!
//! - Start/stop detection channels (start is gated by the health probe)
//! - Single intake task applying channel events to the store
//! - Fan applied events out to history, performance and the realtime hub
//!
//! Each start assigns a new session number. Events carrying an older session
//! (late results from a stopped channel) are dropped at the intake.

use crate::ai_client::DetectionBackend;
use crate::batch_queue::BatchQueue;
use crate::camera_state_store::{CameraState, CameraStateStore, FeedId};
use crate::detection_channel::{
    ChannelContext, ChannelSettings, DetectionChannel, FeedEvent, FeedEventKind, SessionId,
};
use crate::detection_history::DetectionHistory;
use crate::error::{Error, Result};
use crate::frame_source::FrameSource;
use crate::link_status_tracker::LinkStatusTracker;
use crate::performance_monitor::PerformanceMonitor;
use crate::realtime_hub::{HubMessage, LinkStatusMessage, RealtimeHub, SignalsMessage};
use crate::signal_arbiter::{self, DecisionReason, SignalDecision};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Intake buffer size
const INTAKE_CAPACITY: usize = 256;

/// Collaborators handed to the coordinator
pub struct CoordinatorParts {
    pub store: Arc<CameraStateStore>,
    pub backend: Arc<dyn DetectionBackend>,
    pub frames: Arc<dyn FrameSource>,
    pub batch: Option<Arc<BatchQueue>>,
    pub performance: Arc<PerformanceMonitor>,
    pub history: Arc<DetectionHistory>,
    pub links: Arc<LinkStatusTracker>,
    pub hub: Arc<RealtimeHub>,
    pub settings: ChannelSettings,
}

/// Coordinator instance
pub struct Coordinator {
    store: Arc<CameraStateStore>,
    backend: Arc<dyn DetectionBackend>,
    frames: Arc<dyn FrameSource>,
    batch: Option<Arc<BatchQueue>>,
    performance: Arc<PerformanceMonitor>,
    history: Arc<DetectionHistory>,
    links: Arc<LinkStatusTracker>,
    hub: Arc<RealtimeHub>,
    settings: ChannelSettings,
    channels: Mutex<HashMap<FeedId, DetectionChannel>>,
    next_session: AtomicU64,
    events_tx: mpsc::Sender<FeedEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<FeedEvent>>>,
}

impl Coordinator {
    pub fn new(parts: CoordinatorParts) -> Self {
        let (events_tx, events_rx) = mpsc::channel(INTAKE_CAPACITY);
        Self {
            store: parts.store,
            backend: parts.backend,
            frames: parts.frames,
            batch: parts.batch,
            performance: parts.performance,
            history: parts.history,
            links: parts.links,
            hub: parts.hub,
            settings: parts.settings,
            channels: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Sender side of the intake (batch dispatcher publishes here)
    pub fn event_sender(&self) -> mpsc::Sender<FeedEvent> {
        self.events_tx.clone()
    }

    /// Spawn the intake task. Can only be started once.
    pub async fn start_intake(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let mut rx = self
            .events_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Internal("Intake already started".to_string()))?;

        let this = self.clone();
        Ok(tokio::spawn(async move {
            tracing::info!("Event intake started");
            while let Some(event) = rx.recv().await {
                this.handle_event(event).await;
            }
            tracing::info!("Event intake stopped");
        }))
    }

    /// Open a detection channel for a feed.
    ///
    /// Starting a running feed returns its current state. Refused with
    /// [`Error::BackendUnavailable`] when the health probe fails.
    pub async fn start_feed(&self, feed_id: FeedId) -> Result<CameraState> {
        let current = self
            .store
            .get(feed_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Feed {} not found", feed_id)))?;

        if self.is_running(feed_id).await {
            return Ok(current);
        }

        if !self.backend.health_check().await {
            tracing::warn!(feed_id = %feed_id, "Detection service unreachable, refusing start");
            return Err(Error::BackendUnavailable(
                "detection service health probe failed".to_string(),
            ));
        }

        let mut channels = self.channels.lock().await;
        if let Some(channel) = channels.get(&feed_id) {
            if !channel.is_finished() {
                return Ok(current);
            }
        }

        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        let state = self.store.apply_status_change(feed_id, true).await?;
        let channel = DetectionChannel::start(feed_id, session, self.channel_context());
        channels.insert(feed_id, channel);
        drop(channels);

        tracing::info!(feed_id = %feed_id, session = session, "Feed started");
        self.publish_state(state.clone()).await;

        Ok(state)
    }

    /// Close a feed's channel and reset its state. Stopping a stopped feed is a no-op.
    pub async fn stop_feed(&self, feed_id: FeedId) -> Result<CameraState> {
        let channel = self.channels.lock().await.remove(&feed_id);
        let was_running = channel.is_some();
        if let Some(channel) = channel {
            channel.stop();
        }

        let before = self
            .store
            .get(feed_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Feed {} not found", feed_id)))?;
        let state = self.store.stop(feed_id).await?;
        self.links.remove(feed_id).await;

        if was_running || state != before {
            tracing::info!(feed_id = %feed_id, "Feed stopped");
            self.publish_state(state.clone()).await;
        }

        Ok(state)
    }

    /// Stop every running feed
    pub async fn shutdown(&self) {
        let feeds: Vec<FeedId> = self.channels.lock().await.keys().copied().collect();
        for feed_id in feeds {
            if let Err(e) = self.stop_feed(feed_id).await {
                tracing::warn!(feed_id = %feed_id, error = %e, "Failed to stop feed");
            }
        }
    }

    pub async fn is_running(&self, feed_id: FeedId) -> bool {
        self.channels
            .lock()
            .await
            .get(&feed_id)
            .map(|c| !c.is_finished())
            .unwrap_or(false)
    }

    /// Feeds with an open channel, ascending
    pub async fn running_feeds(&self) -> Vec<FeedId> {
        let mut feeds: Vec<FeedId> = self
            .channels
            .lock()
            .await
            .iter()
            .filter(|(_, c)| !c.is_finished())
            .map(|(id, _)| *id)
            .collect();
        feeds.sort();
        feeds
    }

    /// Arbiter decision over the current snapshot
    pub async fn signals(&self) -> (SignalDecision, DecisionReason) {
        signal_arbiter::decide_with_reason(&*self.store.snapshot().await)
    }

    pub fn store(&self) -> &Arc<CameraStateStore> {
        &self.store
    }

    pub fn backend(&self) -> &Arc<dyn DetectionBackend> {
        &self.backend
    }

    fn channel_context(&self) -> ChannelContext {
        ChannelContext {
            backend: self.backend.clone(),
            frames: self.frames.clone(),
            batch: self.batch.clone(),
            events: self.events_tx.clone(),
            settings: self.settings.clone(),
        }
    }

    async fn handle_event(&self, event: FeedEvent) {
        // Held until the store is updated so a stop/start cannot slip in
        // between the session check and the apply
        let channels = self.channels.lock().await;
        if channels.get(&event.feed_id).map(|c| c.session()) != Some(event.session) {
            tracing::debug!(
                feed_id = %event.feed_id,
                session = event.session,
                "Dropping event from stale session"
            );
            return;
        }

        match event.kind {
            FeedEventKind::Detections {
                detections,
                processing_time,
            } => {
                let count = detections.len();
                let applied = self
                    .store
                    .apply_detection_update(event.feed_id, detections.clone())
                    .await;
                drop(channels);

                match applied {
                    Ok(state) => {
                        self.performance.record_sample(processing_time, count).await;
                        self.history
                            .record(event.feed_id, detections, processing_time)
                            .await;
                        self.publish_state(state).await;
                    }
                    Err(e) => {
                        tracing::error!(feed_id = %event.feed_id, error = %e, "Failed to apply detections");
                    }
                }
            }
            FeedEventKind::Failure { reason } => {
                drop(channels);
                tracing::debug!(feed_id = %event.feed_id, reason = %reason, "Round failure");
            }
            FeedEventKind::Link { online } => {
                let link_event = self.links.update(event.feed_id, online).await;
                drop(channels);
                if let Some(link_event) = link_event {
                    self.hub
                        .broadcast(HubMessage::LinkStatus(LinkStatusMessage {
                            feed_id: event.feed_id,
                            status: self.links.get(event.feed_id).await,
                            event: link_event,
                            timestamp: Utc::now().to_rfc3339(),
                        }))
                        .await;
                }
            }
        }
    }

    async fn publish_state(&self, state: CameraState) {
        self.hub.broadcast(HubMessage::FeedState(state)).await;

        let (signals, reason) = self.signals().await;
        self.hub
            .broadcast(HubMessage::Signals(SignalsMessage {
                signals,
                reason,
                timestamp: Utc::now().to_rfc3339(),
            }))
            .await;
    }
}
