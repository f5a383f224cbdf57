//! FrameSource - Current frame lookup per feed
//!
//! ## Responsibilities
//!
//! - Resolve a feed id to its capture device (`feedId -> deviceHandle`)
//! - Read the latest encoded frame and hand it out as base64
//!
//! Frames are never decoded here. Dimensions come from the configured
//! capture resolution.

use crate::camera_state_store::FeedId;
use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;

/// Capture parameters shared by every feed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

/// One captured frame ready to send
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Base64 payload (no data-URL prefix)
    pub image: String,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

/// Source of frames for detection channels
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Latest frame for the feed, `None` while no frame is available yet
    async fn capture(&self, feed_id: FeedId) -> Result<Option<EncodedFrame>>;
}

/// Reads `<snapshot_dir>/<device>` for each feed
pub struct SnapshotDirSource {
    snapshot_dir: PathBuf,
    devices: HashMap<FeedId, PathBuf>,
    settings: CaptureSettings,
}

impl SnapshotDirSource {
    /// Create a source with an explicit device map
    pub fn new(
        snapshot_dir: PathBuf,
        devices: HashMap<FeedId, PathBuf>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            snapshot_dir,
            devices,
            settings,
        }
    }

    /// Map feeds `1..=count` to `feed-N.jpg`
    pub fn with_default_devices(snapshot_dir: PathBuf, count: u32, settings: CaptureSettings) -> Self {
        let devices = (1..=count)
            .map(|i| (FeedId(i), PathBuf::from(format!("feed-{}.jpg", i))))
            .collect();
        Self::new(snapshot_dir, devices, settings)
    }

    /// Device path for a feed, if mapped
    pub fn device_path(&self, feed_id: FeedId) -> Option<PathBuf> {
        self.devices.get(&feed_id).map(|p| self.snapshot_dir.join(p))
    }
}

#[async_trait]
impl FrameSource for SnapshotDirSource {
    async fn capture(&self, feed_id: FeedId) -> Result<Option<EncodedFrame>> {
        let path = self
            .device_path(feed_id)
            .ok_or_else(|| Error::Capture(format!("No device mapped for feed {}", feed_id)))?;

        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(feed_id = %feed_id, path = %path.display(), "No frame yet");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if data.is_empty() {
            return Ok(None);
        }

        Ok(Some(EncodedFrame {
            image: STANDARD.encode(&data),
            width: self.settings.width,
            height: self.settings.height,
            captured_at: Utc::now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("frame-source-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_capture_encodes_file() {
        let dir = temp_dir();
        std::fs::write(dir.join("feed-1.jpg"), b"ABC").unwrap();

        let source = SnapshotDirSource::with_default_devices(dir.clone(), 2, CaptureSettings::default());
        let frame = source.capture(FeedId(1)).await.unwrap().unwrap();
        assert_eq!(frame.image, "QUJD");
        assert_eq!(frame.width, 640);
        assert_eq!(frame.height, 480);

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = temp_dir();
        let source = SnapshotDirSource::with_default_devices(dir.clone(), 2, CaptureSettings::default());
        assert!(source.capture(FeedId(2)).await.unwrap().is_none());
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_unmapped_feed_is_error() {
        let source = SnapshotDirSource::with_default_devices(
            std::env::temp_dir(),
            2,
            CaptureSettings::default(),
        );
        let result = source.capture(FeedId(7)).await;
        assert!(matches!(result, Err(Error::Capture(_))));
    }

    #[test]
    fn test_custom_device_map() {
        let mut devices = HashMap::new();
        devices.insert(FeedId(1), PathBuf::from("north/cam.jpg"));
        let source = SnapshotDirSource::new(PathBuf::from("/srv/frames"), devices, CaptureSettings::default());
        assert_eq!(
            source.device_path(FeedId(1)),
            Some(PathBuf::from("/srv/frames/north/cam.jpg"))
        );
        assert_eq!(source.device_path(FeedId(2)), None);
    }
}
