//! DetectionChannel - One detection link per feed
//!
//! ## Responsibilities
//!
//! - Probe the detection service before streaming rounds
//! - Capture and send one frame per round (at most one request in flight)
//! - Publish results and failures as [`FeedEvent`]s
//! - Reconnect with capped exponential backoff after connection loss
//!
//! ## Link phases
//!
//! ```text
//! Connecting --probe ok--> Connected --connection lost--> Reconnecting(n)
//!     ^                                                        |
//!     +-------------------- backoff(n) elapsed ----------------+
//! ```
//!
//! A channel never mutates feed state. Stopping a channel aborts its task,
//! which drops the timer and any in-flight request.

mod events;

pub use events::*;

use crate::ai_client::{DetectOutcome, DetectRequest, DetectionBackend};
use crate::batch_queue::BatchQueue;
use crate::camera_state_store::FeedId;
use crate::error::{Error, Result};
use crate::frame_source::{EncodedFrame, FrameSource};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Channel timing and request parameters
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// Round cadence
    pub round_interval: Duration,
    /// Deadline for one detection request, retries and backoff included
    pub request_timeout: Duration,
    /// First reconnect delay
    pub reconnect_base: Duration,
    /// Reconnect delay cap
    pub reconnect_max: Duration,
    pub confidence: f64,
    pub overlap: f64,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            round_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(15),
            reconnect_base: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
            confidence: 0.5,
            overlap: 0.5,
        }
    }
}

/// Collaborators shared by every channel
#[derive(Clone)]
pub struct ChannelContext {
    pub backend: Arc<dyn DetectionBackend>,
    pub frames: Arc<dyn FrameSource>,
    /// When set, rounds are queued for the batch dispatcher instead of sent
    pub batch: Option<Arc<BatchQueue>>,
    pub events: mpsc::Sender<FeedEvent>,
    pub settings: ChannelSettings,
}

/// Link phase of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

/// Delay before reconnect attempt `attempt` (1-based): `base * 2^(attempt-1)`, capped
pub fn reconnect_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent).min(cap)
}

/// Handle to a running channel task
pub struct DetectionChannel {
    feed_id: FeedId,
    session: SessionId,
    handle: JoinHandle<()>,
}

impl DetectionChannel {
    /// Spawn the channel task for a feed
    pub fn start(feed_id: FeedId, session: SessionId, ctx: ChannelContext) -> Self {
        let task = ChannelTask {
            feed_id,
            session,
            ctx,
        };
        let handle = tokio::spawn(task.run());

        tracing::info!(feed_id = %feed_id, session = session, "Detection channel started");

        Self {
            feed_id,
            session,
            handle,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Tear down the channel. The in-flight request is cancelled with it.
    pub fn stop(self) {
        self.handle.abort();
        tracing::info!(feed_id = %self.feed_id, session = self.session, "Detection channel stopped");
    }
}

impl Drop for DetectionChannel {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Why a connected phase ended
enum Disconnect {
    ConnectionLost(String),
    IntakeClosed,
}

type RoundFuture = BoxFuture<'static, (Result<DetectOutcome>, Duration)>;

struct ChannelTask {
    feed_id: FeedId,
    session: SessionId,
    ctx: ChannelContext,
}

impl ChannelTask {
    async fn run(self) {
        let mut phase = LinkPhase::Connecting;

        loop {
            if let LinkPhase::Reconnecting { attempt } = phase {
                let delay = reconnect_delay(
                    attempt,
                    self.ctx.settings.reconnect_base,
                    self.ctx.settings.reconnect_max,
                );
                tracing::debug!(
                    feed_id = %self.feed_id,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnecting"
                );
                tokio::time::sleep(delay).await;
            }

            if !self.ctx.backend.health_check().await {
                phase = match phase {
                    LinkPhase::Reconnecting { attempt } => LinkPhase::Reconnecting {
                        attempt: attempt.saturating_add(1),
                    },
                    _ => LinkPhase::Reconnecting { attempt: 1 },
                };
                continue;
            }

            phase = LinkPhase::Connected;
            tracing::debug!(feed_id = %self.feed_id, phase = ?phase, "Detection link up");
            if !self.emit(FeedEvent::link(self.feed_id, self.session, true)).await {
                return;
            }

            match self.run_rounds().await {
                Disconnect::IntakeClosed => return,
                Disconnect::ConnectionLost(reason) => {
                    tracing::warn!(
                        feed_id = %self.feed_id,
                        reason = %reason,
                        "Connection to detection service lost"
                    );
                    if !self.emit(FeedEvent::link(self.feed_id, self.session, false)).await {
                        return;
                    }
                    phase = LinkPhase::Reconnecting { attempt: 1 };
                }
            }
        }
    }

    /// Rounds on a fixed cadence until the link drops
    async fn run_rounds(&self) -> Disconnect {
        let mut ticker = tokio::time::interval(self.ctx.settings.round_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut in_flight: Option<RoundFuture> = None;
        let mut frame_size = (0u32, 0u32);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if in_flight.is_some() {
                        tracing::debug!(feed_id = %self.feed_id, "Previous round pending, skipping tick");
                        continue;
                    }

                    let frame = match self.ctx.frames.capture(self.feed_id).await {
                        Ok(Some(frame)) => frame,
                        Ok(None) => continue,
                        Err(e) => {
                            tracing::warn!(feed_id = %self.feed_id, error = %e, "Frame capture failed");
                            if !self.emit(FeedEvent::failure(self.feed_id, self.session, e.to_string())).await {
                                return Disconnect::IntakeClosed;
                            }
                            continue;
                        }
                    };

                    if let Some(batch) = &self.ctx.batch {
                        batch.enqueue(self.feed_id, self.session, frame).await;
                        continue;
                    }

                    frame_size = (frame.width, frame.height);
                    in_flight = Some(self.send_round(frame));
                }
                (result, elapsed) = wait_in_flight(&mut in_flight), if in_flight.is_some() => {
                    in_flight = None;
                    if let Some(disconnect) = self.handle_result(result, elapsed, frame_size).await {
                        return disconnect;
                    }
                }
            }
        }
    }

    fn send_round(&self, frame: EncodedFrame) -> RoundFuture {
        let backend = self.ctx.backend.clone();
        let timeout = self.ctx.settings.request_timeout;
        let request = DetectRequest::new(
            self.feed_id,
            &frame.image,
            self.ctx.settings.confidence,
            self.ctx.settings.overlap,
        );

        async move {
            let started = Instant::now();
            let result = match tokio::time::timeout(timeout, backend.detect(&request)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!(
                    "no response within {}ms",
                    timeout.as_millis()
                ))),
            };
            (result, started.elapsed())
        }
        .boxed()
    }

    /// Publish the round outcome. Returns `Some` when the phase must end.
    async fn handle_result(
        &self,
        result: Result<DetectOutcome>,
        elapsed: Duration,
        (width, height): (u32, u32),
    ) -> Option<Disconnect> {
        let events = match result {
            Ok(outcome) => {
                let processing_time = outcome
                    .processing_time
                    .unwrap_or_else(|| elapsed.as_secs_f64());
                let detections: Vec<_> = outcome
                    .predictions
                    .into_iter()
                    .map(|p| p.into_detection(width, height))
                    .collect();

                tracing::debug!(
                    feed_id = %self.feed_id,
                    detections = detections.len(),
                    processing_time = processing_time,
                    "Round complete"
                );

                vec![FeedEvent::detections(
                    self.feed_id,
                    self.session,
                    detections,
                    processing_time,
                )]
            }
            Err(e) if e.is_connection_loss() => {
                // State stays as last known until reconnect or stop
                if !self
                    .emit(FeedEvent::failure(self.feed_id, self.session, e.to_string()))
                    .await
                {
                    return Some(Disconnect::IntakeClosed);
                }
                return Some(Disconnect::ConnectionLost(e.to_string()));
            }
            Err(e) => {
                tracing::warn!(feed_id = %self.feed_id, error = %e, "Round failed");
                vec![
                    FeedEvent::failure(self.feed_id, self.session, e.to_string()),
                    FeedEvent::detections(
                        self.feed_id,
                        self.session,
                        Vec::new(),
                        elapsed.as_secs_f64(),
                    ),
                ]
            }
        };

        for event in events {
            if !self.emit(event).await {
                return Some(Disconnect::IntakeClosed);
            }
        }
        None
    }

    /// Returns false once the intake is gone
    async fn emit(&self, event: FeedEvent) -> bool {
        self.ctx.events.send(event).await.is_ok()
    }
}

async fn wait_in_flight(slot: &mut Option<RoundFuture>) -> (Result<DetectOutcome>, Duration) {
    match slot.as_mut() {
        Some(round) => round.await,
        None => std::future::pending().await,
    }
}
