//! PerformanceMonitor - Rolling latency / detection statistics
//!
//! ## Responsibilities
//!
//! - Keep bounded rolling windows of round latency and detection counts
//! - Classify health from average latency (fixed thresholds, no hysteresis)
//! - Provide a rate / latency summary for the API and logs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Samples kept in each window
pub const WINDOW_CAPACITY: usize = 50;

/// Counts used for the detection rate
pub const RATE_WINDOW: usize = 10;

/// Average latency below this is excellent (seconds)
pub const EXCELLENT_THRESHOLD_SEC: f64 = 0.5;

/// Average latency below this is good (seconds)
pub const GOOD_THRESHOLD_SEC: f64 = 1.0;

/// Health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceStatus {
    Excellent,
    Good,
    Poor,
}

impl PerformanceStatus {
    /// Classify an average latency in seconds
    pub fn classify(avg_processing_time: f64) -> Self {
        if avg_processing_time < EXCELLENT_THRESHOLD_SEC {
            Self::Excellent
        } else if avg_processing_time < GOOD_THRESHOLD_SEC {
            Self::Good
        } else {
            Self::Poor
        }
    }
}

/// One observed detection round
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSample {
    pub processing_time_seconds: f64,
    pub detection_count: usize,
    pub recorded_at: DateTime<Utc>,
}

/// Summary exposed to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub avg_processing_time: f64,
    pub detection_rate: f64,
    pub status: PerformanceStatus,
    pub sample_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sample_at: Option<DateTime<Utc>>,
}

/// Fixed-capacity FIFO window
#[derive(Debug)]
struct RollingWindow<T> {
    values: VecDeque<T>,
    capacity: usize,
}

impl<T> RollingWindow<T> {
    fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, value: T) {
        if self.values.len() >= self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    fn len(&self) -> usize {
        self.values.len()
    }
}

#[derive(Debug)]
struct Windows {
    latencies: RollingWindow<f64>,
    counts: RollingWindow<usize>,
    last_sample_at: Option<DateTime<Utc>>,
}

/// PerformanceMonitor instance
pub struct PerformanceMonitor {
    windows: RwLock<Windows>,
}

impl PerformanceMonitor {
    /// Create monitor with the default window size
    pub fn new() -> Self {
        Self::with_capacity(WINDOW_CAPACITY)
    }

    /// Create monitor with a custom window size
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            windows: RwLock::new(Windows {
                latencies: RollingWindow::new(capacity),
                counts: RollingWindow::new(capacity),
                last_sample_at: None,
            }),
        }
    }

    /// Record one round
    pub async fn record_sample(&self, processing_time_seconds: f64, detection_count: usize) {
        let sample = PerformanceSample {
            processing_time_seconds: processing_time_seconds.max(0.0),
            detection_count,
            recorded_at: Utc::now(),
        };

        let mut windows = self.windows.write().await;
        windows.latencies.push(sample.processing_time_seconds);
        windows.counts.push(sample.detection_count);
        windows.last_sample_at = Some(sample.recorded_at);
    }

    /// Current summary
    pub async fn summary(&self) -> PerformanceSummary {
        let windows = self.windows.read().await;

        let latencies = &windows.latencies.values;
        let avg_processing_time = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };

        let recent: Vec<usize> = windows
            .counts
            .values
            .iter()
            .rev()
            .take(RATE_WINDOW)
            .copied()
            .collect();
        let detection_rate = if recent.is_empty() {
            0.0
        } else {
            recent.iter().sum::<usize>() as f64 / recent.len() as f64
        };

        PerformanceSummary {
            avg_processing_time,
            detection_rate,
            status: PerformanceStatus::classify(avg_processing_time),
            sample_count: windows.latencies.len(),
            last_sample_at: windows.last_sample_at,
        }
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}
