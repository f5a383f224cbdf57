//! Signal Coordinator
//!
//! Main entry point: wires the detection feeds, the arbiter loops and the HTTP API.

use signal_coordinator::{
    ai_client::{AiClient, DetectionBackend},
    batch_queue::{BatchDispatcher, BatchQueue},
    camera_state_store::{CameraStateStore, FeedId},
    coordinator::{Coordinator, CoordinatorParts},
    detection_history::{DetectionHistory, DEFAULT_CAPACITY},
    frame_source::SnapshotDirSource,
    hardware_sync::{HardwareSyncLoop, HttpHardwareLink},
    link_status_tracker::LinkStatusTracker,
    performance_monitor::PerformanceMonitor,
    realtime_hub::{HubMessage, RealtimeHub},
    state::{AppConfig, AppState},
    web_api,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signal_coordinator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Signal Coordinator v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        detection_url = %config.detection_url,
        hardware_url = %config.hardware_url,
        feed_count = config.feed_count,
        batch_mode = config.batch_mode,
        snapshot_dir = %config.snapshot_dir.display(),
        "Configuration loaded"
    );
    tracing::info!(
        width = config.capture_width,
        height = config.capture_height,
        fps = config.capture_fps,
        image_quality = config.image_quality,
        "Capture settings"
    );

    tokio::fs::create_dir_all(&config.snapshot_dir).await?;

    // Initialize components
    let store = Arc::new(CameraStateStore::with_feed_count(config.feed_count));
    let backend: Arc<dyn DetectionBackend> = Arc::new(AiClient::new(
        config.detection_url.clone(),
        config.ai_client_config(),
    )?);
    let frames = Arc::new(SnapshotDirSource::with_default_devices(
        config.snapshot_dir.clone(),
        config.feed_count,
        config.capture_settings(),
    ));
    let batch = config.batch_mode.then(|| Arc::new(BatchQueue::new()));
    let performance = Arc::new(PerformanceMonitor::new());
    let history = Arc::new(DetectionHistory::new(DEFAULT_CAPACITY, config.history_ttl));
    let links = Arc::new(LinkStatusTracker::new());
    let realtime = Arc::new(RealtimeHub::new());

    let coordinator = Arc::new(Coordinator::new(CoordinatorParts {
        store: store.clone(),
        backend: backend.clone(),
        frames,
        batch: batch.clone(),
        performance: performance.clone(),
        history: history.clone(),
        links: links.clone(),
        hub: realtime.clone(),
        settings: config.channel_settings(),
    }));
    coordinator.start_intake().await?;
    tracing::info!("Coordinator initialized");

    // Batch dispatcher (batch mode only)
    if let Some(queue) = batch {
        BatchDispatcher::new(queue, backend.clone(), coordinator.event_sender())
            .start(config.batch_window);
    }

    // Hardware sync loop
    let hardware_link = Arc::new(HttpHardwareLink::new(
        config.hardware_url.clone(),
        config.request_timeout,
    )?);
    HardwareSyncLoop::new(store.clone(), hardware_link, config.hardware_sync_interval).start();

    // Periodic performance broadcast
    let perf_monitor = performance.clone();
    let perf_hub = realtime.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            let summary = perf_monitor.summary().await;
            if summary.sample_count > 0 {
                tracing::debug!(
                    avg_processing_time = summary.avg_processing_time,
                    detection_rate = summary.detection_rate,
                    status = ?summary.status,
                    "Performance summary"
                );
            }
            perf_hub.broadcast(HubMessage::Performance(summary)).await;
        }
    });

    if config.auto_start {
        for id in 1..=config.feed_count {
            if let Err(e) = coordinator.start_feed(FeedId(id)).await {
                tracing::warn!(feed_id = id, error = %e, "Auto-start failed");
            }
        }
    }

    let state = AppState {
        config: config.clone(),
        store,
        coordinator: coordinator.clone(),
        performance,
        history,
        links,
        realtime,
        started_at: Instant::now(),
    };

    let app = web_api::create_router(state.clone())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    coordinator.shutdown().await;
    tracing::info!("Signal Coordinator stopped");

    Ok(())
}
