//! Shared models and types for the HTTP surface
//!
//! Response shapes used by more than one route live here.

use crate::camera_state_store::FeedId;
use crate::link_status_tracker::LinkStatus;
use crate::signal_arbiter::{DecisionReason, SignalDecision};
use serde::{Deserialize, Serialize};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    pub detection_connected: bool,
    pub running_feeds: Vec<FeedId>,
    pub ws_clients: u64,
}

/// Arbiter decision as served to pollers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalsResponse {
    pub signals: SignalDecision,
    pub reason: DecisionReason,
}

/// Link status of one feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedLink {
    pub feed_id: FeedId,
    pub status: LinkStatus,
    pub running: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_response_omits_error() {
        let json = serde_json::to_value(ApiResponse::success(vec![1, 2])).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["data"][1], 2);
        assert!(json.get("error").is_none());
    }
}
