//! Application state
//!
//! Holds all shared components and the environment-driven configuration

use crate::ai_client::AiClientConfig;
use crate::camera_state_store::CameraStateStore;
use crate::coordinator::Coordinator;
use crate::detection_channel::ChannelSettings;
use crate::detection_history::DetectionHistory;
use crate::frame_source::CaptureSettings;
use crate::link_status_tracker::LinkStatusTracker;
use crate::performance_monitor::PerformanceMonitor;
use crate::realtime_hub::RealtimeHub;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Detection service base URL
    pub detection_url: String,
    /// Signal controller update endpoint
    pub hardware_url: String,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Number of feeds created at start
    pub feed_count: u32,
    pub round_interval: Duration,
    pub hardware_sync_interval: Duration,
    pub request_timeout: Duration,
    pub health_timeout: Duration,
    /// Attempts per detection request
    pub retry_count: u32,
    pub retry_backoff: Duration,
    pub reconnect_backoff_max: Duration,
    pub batch_window: Duration,
    /// Route rounds through the batch queue
    pub batch_mode: bool,
    pub confidence_threshold: f64,
    pub overlap_threshold: f64,
    /// Capture-side hints, reported at startup
    pub image_quality: f64,
    pub capture_width: u32,
    pub capture_height: u32,
    pub capture_fps: u32,
    /// Latest frame per feed is read from here
    pub snapshot_dir: PathBuf,
    /// Recent-detections expiry
    pub history_ttl: Duration,
    /// Start every feed on boot
    pub auto_start: bool,
}

/// Read and parse an env var, warning and falling back on bad values
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key = %key, value = %raw, "Invalid config value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_ms(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_or(key, default_ms))
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                tracing::warn!(key = %key, value = %raw, "Invalid config flag, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_unit(key: &str, default: f64) -> f64 {
    let value = env_or(key, default);
    if (0.0..=1.0).contains(&value) {
        value
    } else {
        tracing::warn!(key = %key, value = value, "Value outside [0, 1], using default");
        default
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            detection_url: std::env::var("DETECTION_URL")
                .unwrap_or_else(|_| "http://localhost:5000".to_string()),
            hardware_url: std::env::var("HARDWARE_URL")
                .unwrap_or_else(|_| "http://localhost:5001/api/arduino/update".to_string()),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("PORT", 8080),
            feed_count: env_or("FEED_COUNT", 4u32).max(1),
            round_interval: env_ms("ROUND_INTERVAL_MS", 1000),
            hardware_sync_interval: env_ms("HARDWARE_SYNC_INTERVAL_MS", 2000),
            request_timeout: env_ms("REQUEST_TIMEOUT_MS", 15_000),
            health_timeout: env_ms("HEALTH_TIMEOUT_MS", 5000),
            retry_count: env_or("RETRY_COUNT", 2u32).max(1),
            retry_backoff: env_ms("RETRY_BACKOFF_MS", 500),
            reconnect_backoff_max: env_ms("RECONNECT_BACKOFF_MAX_MS", 30_000),
            batch_window: env_ms("BATCH_WINDOW_MS", 500),
            batch_mode: env_flag("BATCH_MODE", false),
            confidence_threshold: env_unit("CONFIDENCE_THRESHOLD", 0.5),
            overlap_threshold: env_unit("OVERLAP_THRESHOLD", 0.5),
            image_quality: env_unit("IMAGE_QUALITY", 0.8),
            capture_width: env_or("CAPTURE_WIDTH", 640),
            capture_height: env_or("CAPTURE_HEIGHT", 480),
            capture_fps: env_or("CAPTURE_FPS", 15),
            snapshot_dir: std::env::var("SNAPSHOT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/var/lib/signal-coordinator/frames")),
            history_ttl: env_ms("HISTORY_TTL_MS", 30_000),
            auto_start: env_flag("AUTO_START", false),
        }
    }
}

impl AppConfig {
    pub fn ai_client_config(&self) -> AiClientConfig {
        AiClientConfig {
            request_timeout: self.request_timeout,
            health_timeout: self.health_timeout,
            retry_count: self.retry_count,
            retry_backoff: self.retry_backoff,
        }
    }

    pub fn channel_settings(&self) -> ChannelSettings {
        ChannelSettings {
            round_interval: self.round_interval,
            request_timeout: self.ai_client_config().request_budget(),
            reconnect_base: self.round_interval,
            reconnect_max: self.reconnect_backoff_max,
            confidence: self.confidence_threshold,
            overlap: self.overlap_threshold,
        }
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            width: self.capture_width,
            height: self.capture_height,
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// CameraStateStore (SSoT)
    pub store: Arc<CameraStateStore>,
    /// Coordinator (feed lifecycle)
    pub coordinator: Arc<Coordinator>,
    /// PerformanceMonitor
    pub performance: Arc<PerformanceMonitor>,
    /// DetectionHistory (recent rounds)
    pub history: Arc<DetectionHistory>,
    /// LinkStatusTracker
    pub links: Arc<LinkStatusTracker>,
    /// RealtimeHub (WebSocket)
    pub realtime: Arc<RealtimeHub>,
    /// Process start, for uptime
    pub started_at: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        std::env::set_var("SIGNAL_COORDINATOR_TEST_PORT", "not-a-port");
        assert_eq!(env_or("SIGNAL_COORDINATOR_TEST_PORT", 8080u16), 8080);
        std::env::set_var("SIGNAL_COORDINATOR_TEST_PORT", " 9090 ");
        assert_eq!(env_or("SIGNAL_COORDINATOR_TEST_PORT", 8080u16), 9090);
        std::env::remove_var("SIGNAL_COORDINATOR_TEST_PORT");
    }

    #[test]
    fn test_env_flag_values() {
        std::env::set_var("SIGNAL_COORDINATOR_TEST_FLAG", "yes");
        assert!(env_flag("SIGNAL_COORDINATOR_TEST_FLAG", false));
        std::env::set_var("SIGNAL_COORDINATOR_TEST_FLAG", "maybe");
        assert!(!env_flag("SIGNAL_COORDINATOR_TEST_FLAG", false));
        std::env::remove_var("SIGNAL_COORDINATOR_TEST_FLAG");
    }

    #[test]
    fn test_unit_range_is_enforced() {
        std::env::set_var("SIGNAL_COORDINATOR_TEST_UNIT", "1.7");
        assert_eq!(env_unit("SIGNAL_COORDINATOR_TEST_UNIT", 0.5), 0.5);
        std::env::set_var("SIGNAL_COORDINATOR_TEST_UNIT", "0.25");
        assert_eq!(env_unit("SIGNAL_COORDINATOR_TEST_UNIT", 0.5), 0.25);
        std::env::remove_var("SIGNAL_COORDINATOR_TEST_UNIT");
    }

    #[test]
    fn test_derived_settings() {
        let config = AppConfig::default();
        let channel = config.channel_settings();
        assert_eq!(channel.round_interval, config.round_interval);
        assert!(channel.request_timeout >= config.request_timeout);
        assert_eq!(
            channel.request_timeout,
            config.ai_client_config().request_budget()
        );
        assert_eq!(config.ai_client_config().retry_count, config.retry_count);
        assert_eq!(config.capture_settings().width, config.capture_width);
    }
}
