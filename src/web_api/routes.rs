//! API Routes

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::camera_state_store::FeedId;
use crate::link_status_tracker::LinkStatus;
use crate::models::{ApiResponse, FeedLink, SignalsResponse};
use crate::realtime_hub::{HubMessage, SignalsMessage};
use crate::state::AppState;

/// Default and maximum page size for recent detections
const RECENT_DEFAULT: usize = 20;
const RECENT_MAX: usize = 100;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Feeds
        .route("/api/feeds", get(list_feeds))
        .route("/api/feeds/:id", get(get_feed))
        .route("/api/feeds/:id/start", post(start_feed))
        .route("/api/feeds/:id/stop", post(stop_feed))
        .route("/api/feeds/:id/recent", get(recent_detections))
        // Arbitration & monitoring
        .route("/api/signals", get(get_signals))
        .route("/api/performance", get(get_performance))
        .route("/api/links", get(list_links))
        // WebSocket
        .route("/api/ws", get(websocket_handler))
        .with_state(state)
}

// ========================================
// Feeds
// ========================================

async fn list_feeds(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.store.snapshot().await;
    let feeds: Vec<_> = snapshot.values().cloned().collect();
    Json(ApiResponse::success(feeds))
}

async fn get_feed(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<impl IntoResponse, crate::Error> {
    let feed = state
        .store
        .get(FeedId(id))
        .await
        .ok_or_else(|| crate::Error::NotFound(format!("Feed {} not found", id)))?;
    Ok(Json(ApiResponse::success(feed)))
}

async fn start_feed(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<impl IntoResponse, crate::Error> {
    let feed = state.coordinator.start_feed(FeedId(id)).await?;
    Ok(Json(ApiResponse::success(feed)))
}

async fn stop_feed(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<impl IntoResponse, crate::Error> {
    let feed = state.coordinator.stop_feed(FeedId(id)).await?;
    Ok(Json(ApiResponse::success(feed)))
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

async fn recent_detections(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Query(query): Query<RecentQuery>,
) -> Result<impl IntoResponse, crate::Error> {
    let feed_id = FeedId(id);
    if state.store.get(feed_id).await.is_none() {
        return Err(crate::Error::NotFound(format!("Feed {} not found", id)));
    }

    let limit = match query.limit {
        Some(0) => {
            return Err(crate::Error::Validation(
                "limit must be at least 1".to_string(),
            ))
        }
        Some(limit) => limit.min(RECENT_MAX),
        None => RECENT_DEFAULT,
    };
    let records = state.history.recent(feed_id, limit).await;
    Ok(Json(ApiResponse::success(records)))
}

// ========================================
// Arbitration & monitoring
// ========================================

async fn get_signals(State(state): State<AppState>) -> impl IntoResponse {
    let (signals, reason) = state.coordinator.signals().await;
    Json(ApiResponse::success(SignalsResponse { signals, reason }))
}

async fn get_performance(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.performance.summary().await))
}

async fn list_links(State(state): State<AppState>) -> impl IntoResponse {
    let running = state.coordinator.running_feeds().await;
    let statuses = state.links.all().await;
    let links: Vec<FeedLink> = state
        .store
        .feed_ids()
        .await
        .into_iter()
        .map(|feed_id| FeedLink {
            feed_id,
            status: statuses.get(&feed_id).copied().unwrap_or(LinkStatus::Unknown),
            running: running.contains(&feed_id),
        })
        .collect();
    Json(ApiResponse::success(links))
}

// ========================================
// WebSocket
// ========================================

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let (conn_id, mut rx) = state.realtime.register().await;

    // Initial picture so clients do not wait for the next transition
    let snapshot = state.store.snapshot().await;
    let (signals, reason) = state.coordinator.signals().await;
    let mut initial: Vec<HubMessage> = snapshot
        .values()
        .cloned()
        .map(HubMessage::FeedState)
        .collect();
    initial.push(HubMessage::Signals(SignalsMessage {
        signals,
        reason,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }));

    let send_task = tokio::spawn(async move {
        for message in initial {
            let Ok(json) = serde_json::to_string(&message) else {
                continue;
            };
            if sender.send(Message::Text(json)).await.is_err() {
                return;
            }
        }
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::warn!(connection_id = %conn_id, error = %e, "WebSocket error");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    state.realtime.unregister(&conn_id).await;
}
