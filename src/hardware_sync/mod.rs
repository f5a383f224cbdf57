//! HardwareSync - Periodic push of aggregate state to the signal controller
//!
//! Each tick takes a store snapshot, runs the arbiter and POSTs
//! `{road_data: [...]}`. Failures are logged and the next tick retries.

use crate::camera_state_store::{CameraStateStore, Detection, FeedId, Snapshot};
use crate::error::{Error, Result};
use crate::signal_arbiter::{self, SignalState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Default sync cadence
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(2);

/// One road entry in the hardware payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoadData {
    pub id: FeedId,
    pub detections: Vec<Detection>,
    pub has_emergency_vehicle: bool,
    pub is_active: bool,
    pub traffic_count: u64,
    pub signal: SignalState,
}

/// Hardware update payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareUpdate {
    pub road_data: Vec<RoadData>,
}

impl HardwareUpdate {
    /// Serialize a snapshot together with the arbiter's decision
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let decision = signal_arbiter::decide(snapshot);
        let road_data = snapshot
            .values()
            .map(|state| RoadData {
                id: state.id,
                detections: state.detections.clone(),
                has_emergency_vehicle: state.has_emergency_vehicle,
                is_active: state.is_active,
                traffic_count: state.traffic_count,
                signal: decision.get(&state.id).copied().unwrap_or(SignalState::Red),
            })
            .collect();

        Self { road_data }
    }
}

/// Outbound link to the signal controller
#[async_trait]
pub trait HardwareLink: Send + Sync {
    async fn push(&self, update: &HardwareUpdate) -> Result<()>;
}

/// HTTP POST to the controller endpoint
pub struct HttpHardwareLink {
    client: reqwest::Client,
    url: String,
}

impl HttpHardwareLink {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl HardwareLink for HttpHardwareLink {
    async fn push(&self, update: &HardwareUpdate) -> Result<()> {
        let resp = self.client.post(&self.url).json(update).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Hardware(format!("{} - {}", status, text)));
        }

        Ok(())
    }
}

/// HardwareSyncLoop instance
pub struct HardwareSyncLoop {
    store: Arc<CameraStateStore>,
    link: Arc<dyn HardwareLink>,
    interval: Duration,
}

impl HardwareSyncLoop {
    pub fn new(store: Arc<CameraStateStore>, link: Arc<dyn HardwareLink>, interval: Duration) -> Self {
        Self {
            store,
            link,
            interval,
        }
    }

    /// Snapshot, serialize, push once
    pub async fn tick_once(&self) -> Result<HardwareUpdate> {
        let snapshot = self.store.snapshot().await;
        let update = HardwareUpdate::from_snapshot(&*snapshot);
        self.link.push(&update).await?;
        Ok(update)
    }

    /// Spawn the sync timer. The loop runs until the handle is aborted.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                interval_ms = self.interval.as_millis() as u64,
                "Hardware sync loop started"
            );

            loop {
                ticker.tick().await;
                match self.tick_once().await {
                    Ok(update) => {
                        let green: Vec<u32> = update
                            .road_data
                            .iter()
                            .filter(|r| r.signal == SignalState::Green)
                            .map(|r| r.id.0)
                            .collect();
                        tracing::debug!(feeds = update.road_data.len(), green = ?green, "Hardware synced");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Hardware sync failed, retrying next tick");
                    }
                }
            }
        })
    }
}
