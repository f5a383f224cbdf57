//! AiClient - Detection Service Adapter
//!
//! ## Responsibilities
//!
//! - Health probe (gates channel opening)
//! - Single-frame detection requests with retry
//! - Multi-feed batch requests
//! - Response parsing (incomplete predictions are dropped, not fatal)

use crate::camera_state_store::{Detection, FeedId};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Detection service as seen by channels and the batch dispatcher
#[async_trait]
pub trait DetectionBackend: Send + Sync {
    /// Health probe; never errors, unreachable is `false`
    async fn health_check(&self) -> bool;

    /// One frame for one feed
    async fn detect(&self, request: &DetectRequest) -> Result<DetectOutcome>;

    /// Several feeds in one request
    async fn detect_batch(&self, frames: &[BatchFrame]) -> Result<BatchOutcome>;
}

/// AiClient configuration
#[derive(Debug, Clone)]
pub struct AiClientConfig {
    /// Per-attempt request timeout
    pub request_timeout: Duration,
    /// Health probe timeout
    pub health_timeout: Duration,
    /// Attempts per detection request (at least one)
    pub retry_count: u32,
    /// Backoff unit between attempts, multiplied by the attempt number
    pub retry_backoff: Duration,
}

impl Default for AiClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            health_timeout: Duration::from_secs(5),
            retry_count: 2,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

impl AiClientConfig {
    /// Worst-case time for one request with every retry and backoff sleep
    pub fn request_budget(&self) -> Duration {
        let attempts = self.retry_count.max(1);
        let backoff_units = attempts * (attempts - 1) / 2;
        self.request_timeout * attempts + self.retry_backoff * backoff_units
    }
}

/// Detection request (one feed, one round)
#[derive(Debug, Clone, Serialize)]
pub struct DetectRequest {
    /// Base64 frame, without any data-URL prefix
    pub image: String,
    pub confidence: f64,
    pub overlap: f64,
    pub road_id: FeedId,
}

impl DetectRequest {
    /// Build a request, stripping a `data:...;base64,` prefix if present
    pub fn new(feed_id: FeedId, image: &str, confidence: f64, overlap: f64) -> Self {
        Self {
            image: strip_data_url(image).to_string(),
            confidence,
            overlap,
            road_id: feed_id,
        }
    }
}

/// Raw detection response
#[derive(Debug, Clone, Deserialize)]
pub struct DetectResponse {
    #[serde(default)]
    pub success: bool,

    /// Kept untyped so one bad entry does not poison the rest
    #[serde(default)]
    pub predictions: Vec<serde_json::Value>,

    #[serde(default)]
    pub processing_time: Option<f64>,

    #[serde(default)]
    pub error: Option<String>,
}

/// Prediction as returned by the detection service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f64,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Prediction {
    /// Attach source image dimensions
    pub fn into_detection(self, original_width: u32, original_height: u32) -> Detection {
        Detection {
            class_name: self.class_name,
            confidence: self.confidence,
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            original_width,
            original_height,
        }
    }
}

/// Parsed single-frame result
#[derive(Debug, Clone, Default)]
pub struct DetectOutcome {
    pub predictions: Vec<Prediction>,
    /// Service-reported processing time (seconds)
    pub processing_time: Option<f64>,
}

/// One queued frame in a batch request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFrame {
    pub feed_id: FeedId,
    pub image_data: String,
    pub timestamp: DateTime<Utc>,
}

/// Raw batch response
#[derive(Debug, Clone, Deserialize)]
pub struct BatchResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub results: Vec<BatchResultEntry>,
    #[serde(default)]
    pub processing_time: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Per-feed entry in a batch response
#[derive(Debug, Clone, Deserialize)]
pub struct BatchResultEntry {
    #[serde(alias = "feedId")]
    pub road_id: FeedId,
    #[serde(default)]
    pub success: bool,
    #[serde(default, alias = "predictions")]
    pub detections: Vec<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Parsed batch result
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// One entry per feed in the response, in response order.
    /// Failed entries carry an empty prediction list.
    pub results: Vec<(FeedId, Vec<Prediction>)>,
    pub processing_time: Option<f64>,
}

/// Strip a data-URL prefix (`data:image/jpeg;base64,`) from an encoded image
pub fn strip_data_url(image: &str) -> &str {
    match image.split_once(',') {
        Some((_, payload)) => payload,
        None => image,
    }
}

/// Keep predictions that carry every required field
pub fn parse_predictions(raw: Vec<serde_json::Value>) -> Vec<Prediction> {
    raw.into_iter()
        .filter_map(|value| match serde_json::from_value::<Prediction>(value.clone()) {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::warn!(prediction = %value, error = %e, "Skipping incomplete prediction");
                None
            }
        })
        .collect()
}

/// HTTP detection client
pub struct AiClient {
    client: reqwest::Client,
    base_url: String,
    config: AiClientConfig,
}

impl AiClient {
    /// Create new AI client
    pub fn new(base_url: String, config: AiClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            config,
        })
    }

    /// POST JSON with linear backoff between attempts.
    ///
    /// Connect failures are returned immediately: the caller's reconnect
    /// logic owns those.
    async fn post_with_retry<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        let attempts = self.config.retry_count.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.config.retry_backoff * (attempt - 1)).await;
            }

            match self.client.post(url).json(body).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    tracing::warn!(
                        url = %url,
                        attempt = attempt,
                        status = %status,
                        "Detection request rejected"
                    );
                    last_error = Some(Error::Api(format!("{} - {}", status, text)));
                }
                Err(e) if e.is_connect() => return Err(Error::Http(e)),
                Err(e) => {
                    tracing::warn!(url = %url, attempt = attempt, error = %e, "Detection request failed");
                    last_error = Some(if e.is_timeout() {
                        Error::Timeout(e.to_string())
                    } else {
                        Error::Http(e)
                    });
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Internal("Request failed after retries".to_string())))
    }
}

#[async_trait]
impl DetectionBackend for AiClient {
    async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(self.config.health_timeout)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Health probe failed");
                false
            }
        }
    }

    async fn detect(&self, request: &DetectRequest) -> Result<DetectOutcome> {
        let url = format!("{}/detect_frame", self.base_url);
        let resp = self.post_with_retry(&url, request).await?;

        let body: DetectResponse = resp
            .json()
            .await
            .map_err(|e| Error::MalformedResponse(e.to_string()))?;

        if !body.success {
            return Err(Error::Api(
                body.error
                    .unwrap_or_else(|| "detection reported failure".to_string()),
            ));
        }

        Ok(DetectOutcome {
            predictions: parse_predictions(body.predictions),
            processing_time: body.processing_time,
        })
    }

    async fn detect_batch(&self, frames: &[BatchFrame]) -> Result<BatchOutcome> {
        let url = format!("{}/detect_batch", self.base_url);
        let resp = self.post_with_retry(&url, frames).await?;

        let body: BatchResponse = resp
            .json()
            .await
            .map_err(|e| Error::MalformedResponse(e.to_string()))?;

        if !body.success {
            return Err(Error::Api(
                body.error
                    .unwrap_or_else(|| "batch detection reported failure".to_string()),
            ));
        }

        let results = body
            .results
            .into_iter()
            .map(|entry| {
                if entry.success {
                    (entry.road_id, parse_predictions(entry.detections))
                } else {
                    tracing::warn!(
                        feed_id = %entry.road_id,
                        error = ?entry.error,
                        "Batch entry failed"
                    );
                    (entry.road_id, Vec::new())
                }
            })
            .collect();

        Ok(BatchOutcome {
            results,
            processing_time: body.processing_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_data_url() {
        assert_eq!(strip_data_url("data:image/jpeg;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_url("QUJD"), "QUJD");
    }

    #[test]
    fn test_request_wire_format() {
        let req = DetectRequest::new(FeedId(3), "data:image/jpeg;base64,QUJD", 0.5, 0.4);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["image"], "QUJD");
        assert_eq!(json["confidence"], 0.5);
        assert_eq!(json["overlap"], 0.4);
        assert_eq!(json["road_id"], 3);
    }

    #[test]
    fn test_incomplete_predictions_are_skipped() {
        let raw = vec![
            json!({"class": "car", "confidence": 0.9, "x": 1.0, "y": 2.0, "width": 3.0, "height": 4.0}),
            json!({"class": "bus", "confidence": 0.8, "x": 1.0}),
            json!({"class": "ambulance", "confidence": 0.7, "x": 5, "y": 6, "width": 7, "height": 8}),
        ];
        let parsed = parse_predictions(raw);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].class_name, "car");
        assert_eq!(parsed[1].class_name, "ambulance");
        assert_eq!(parsed[1].width, 7.0);
    }

    #[test]
    fn test_response_tolerates_missing_fields() {
        let resp: DetectResponse = serde_json::from_value(json!({"success": true})).unwrap();
        assert!(resp.success);
        assert!(resp.predictions.is_empty());
        assert!(resp.processing_time.is_none());
    }

    #[test]
    fn test_batch_entry_accepts_both_id_spellings() {
        let a: BatchResultEntry =
            serde_json::from_value(json!({"road_id": 2, "success": true, "detections": []})).unwrap();
        let b: BatchResultEntry =
            serde_json::from_value(json!({"feedId": 4, "success": false, "predictions": []})).unwrap();
        assert_eq!(a.road_id, FeedId(2));
        assert_eq!(b.road_id, FeedId(4));
        assert!(!b.success);
    }

    #[test]
    fn test_batch_frame_is_camel_case() {
        let frame = BatchFrame {
            feed_id: FeedId(1),
            image_data: "QUJD".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["feedId"], 1);
        assert_eq!(json["imageData"], "QUJD");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_prediction_into_detection_keeps_dimensions() {
        let p = Prediction {
            class_name: "truck".to_string(),
            confidence: 0.6,
            x: 10.0,
            y: 10.0,
            width: 5.0,
            height: 5.0,
        };
        let d = p.into_detection(1280, 720);
        assert_eq!(d.original_width, 1280);
        assert_eq!(d.original_height, 720);
        assert_eq!(d.class_name, "truck");
    }

    #[test]
    fn test_default_config() {
        let config = AiClientConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.health_timeout, Duration::from_secs(5));
        assert_eq!(config.retry_count, 2);
    }

    #[test]
    fn test_request_budget_covers_retries() {
        let config = AiClientConfig::default();
        // 2 x 15s attempts + one 500ms backoff
        assert_eq!(config.request_budget(), Duration::from_millis(30_500));

        let config = AiClientConfig {
            request_timeout: Duration::from_millis(100),
            retry_count: 3,
            retry_backoff: Duration::from_millis(10),
            ..AiClientConfig::default()
        };
        // 3 x 100ms + 10ms + 20ms
        assert_eq!(config.request_budget(), Duration::from_millis(330));

        let single = AiClientConfig {
            retry_count: 1,
            ..AiClientConfig::default()
        };
        assert_eq!(single.request_budget(), single.request_timeout);
    }
}
