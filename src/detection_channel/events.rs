//! Events published by channels and the batch dispatcher

use crate::camera_state_store::{Detection, FeedId};

/// Session number assigned by the coordinator each time a feed starts
pub type SessionId = u64;

/// Event on the shared intake
#[derive(Debug, Clone)]
pub struct FeedEvent {
    pub feed_id: FeedId,
    pub session: SessionId,
    pub kind: FeedEventKind,
}

#[derive(Debug, Clone)]
pub enum FeedEventKind {
    /// Result of one round. Empty after a transient failure.
    Detections {
        detections: Vec<Detection>,
        /// Seconds, as reported by the service or measured locally
        processing_time: f64,
    },
    /// A round failed; logged and counted, never applied to state
    Failure { reason: String },
    /// Link to the detection service went up or down
    Link { online: bool },
}

impl FeedEvent {
    pub fn detections(
        feed_id: FeedId,
        session: SessionId,
        detections: Vec<Detection>,
        processing_time: f64,
    ) -> Self {
        Self {
            feed_id,
            session,
            kind: FeedEventKind::Detections {
                detections,
                processing_time,
            },
        }
    }

    pub fn failure(feed_id: FeedId, session: SessionId, reason: impl Into<String>) -> Self {
        Self {
            feed_id,
            session,
            kind: FeedEventKind::Failure {
                reason: reason.into(),
            },
        }
    }

    pub fn link(feed_id: FeedId, session: SessionId, online: bool) -> Self {
        Self {
            feed_id,
            session,
            kind: FeedEventKind::Link { online },
        }
    }
}
