//! Signal Coordinator Library
//!
//! Multi-feed detection coordinator and traffic-signal arbiter
//!
//! ## Architecture
//!
//! 1. CameraStateStore - SSoT for per-feed state
//! 2. AiClient - Detection service adapter
//! 3. FrameSource - Latest frame per feed
//! 4. DetectionChannel - One detection link per feed
//! 5. BatchQueue - Multi-feed request batching
//! 6. Coordinator - Feed lifecycle and event intake
//! 7. SignalArbiter - Right-of-way decision (pure)
//! 8. HardwareSync - Periodic push to the signal controller
//! 9. PerformanceMonitor - Rolling latency statistics
//! 10. DetectionHistory - Recent detections ring buffer
//! 11. LinkStatusTracker - Lost/recovered link tracking
//! 12. RealtimeHub - WebSocket distribution
//! 13. WebAPI - REST API endpoints
//!
//! ## Design Principles
//!
//! - SSoT: CameraStateStore is the single source of truth
//! - Channels never mutate state; they publish events to one intake
//! - The arbiter is a pure function of a snapshot

pub mod ai_client;
pub mod batch_queue;
pub mod camera_state_store;
pub mod coordinator;
pub mod detection_channel;
pub mod detection_history;
pub mod frame_source;
pub mod hardware_sync;
pub mod link_status_tracker;
pub mod performance_monitor;
pub mod realtime_hub;
pub mod signal_arbiter;
pub mod web_api;
pub mod models;
pub mod error;
pub mod state;

pub use error::{Error, Result};
pub use state::AppState;
