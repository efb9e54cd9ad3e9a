use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};

use hangar_core::bridge::install_router::InstallRouter;
use hangar_core::bus::message_bus::MessageBus;
use hangar_core::bus::observer::SessionObserver;
use hangar_core::fragmenter::package_fragmenter::Fragmenter;
use hangar_core::types::types::{InstallError, InstallId, InstallRequest};

use crate::event_relay::EventRelay;

/// SSE event name carrying one forwarded fragmenter event.
pub const FRAGMENTER_EVENT: &str = "fragmenter-event";

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub router: Arc<InstallRouter>,
    pub relay: Arc<EventRelay>,
}

impl AppState {
    /// Wire a router and its relay around a fresh message bus.
    /// Must be called inside a tokio runtime.
    pub fn new(fragmenter: Arc<dyn Fragmenter>) -> Arc<Self> {
        let relay = EventRelay::new();
        let (bus, bus_rx) =
            MessageBus::with_observers(vec![Arc::clone(&relay) as Arc<dyn SessionObserver>]);
        relay.start(bus_rx);
        Arc::new(Self {
            router: Arc::new(InstallRouter::new(fragmenter, bus)),
            relay,
        })
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(state: Arc<AppState>) -> Router {
    // The UI is served from a webview origin; allow it (and localhost for dev).
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(Any);

    Router::new()
        // ── Boundary channel ────────────────────────────────────────────────
        .route("/install",     post(install_handler))
        .route("/cancel/{id}", post(cancel_handler))
        .route("/events",      get(events_handler))
        // ── Status / inspection ─────────────────────────────────────────────
        .route("/status/{id}", get(status_handler))
        .route("/installs",    get(installs_handler))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Boundary channel handlers
// ---------------------------------------------------------------------------

/// POST /install
/// `install-from-url`: answers once the install settled.
///
/// The install runs on its own task, so a client that disconnects or times
/// out does not abandon it; it can still be cancelled and its status is
/// settled on the board either way.
async fn install_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InstallRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let install_id = req.install_id;
    log::info!(
        "[install] install_id={}  url=\"{}\"  dest={:?}",
        install_id,
        req.source_url,
        req.dest_dir,
    );

    let router = Arc::clone(&state.router);
    let task = tokio::spawn(async move { router.handle_install_request(req).await });

    match task.await {
        Ok(Ok(outcome)) => (
            StatusCode::OK,
            Json(serde_json::json!({ "installId": install_id, "status": outcome })),
        ),
        Ok(Err(e)) => (
            error_status(&e),
            Json(serde_json::json!({
                "installId": install_id,
                "status":    "error",
                "detail":    e.to_string(),
            })),
        ),
        Err(e) => {
            log::error!("[install] install_id={}  install task failed: {}", install_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "installId": install_id,
                    "status":    "error",
                    "detail":    "install task failed",
                })),
            )
        }
    }
}

/// POST /cancel/:id
/// `cancel-install`: fire-and-forget, always accepted.
async fn cancel_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<serde_json::Value>) {
    let install_id = InstallId(id);
    log::info!("[cancel] install_id={}", install_id);
    state.router.handle_cancel_request(install_id);
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "installId": install_id, "status": "cancelRequested" })),
    )
}

/// GET /events
/// Server-sent stream of every forwarded fragmenter event.
async fn events_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.relay.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(ev) => match Event::default().event(FRAGMENTER_EVENT).json_data(&ev) {
                    Ok(sse) => yield Ok::<_, Infallible>(sse),
                    Err(e) => log::warn!("[events] could not encode event: {}", e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("[events] client lagged, {} event(s) skipped", skipped);
                    yield Ok::<_, Infallible>(Event::default().event("lagged").data(skipped.to_string()));
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ---------------------------------------------------------------------------
// Status handlers
// ---------------------------------------------------------------------------

/// GET /status/:id
async fn status_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<serde_json::Value>) {
    let install_id = InstallId(id);
    match state.relay.status(install_id) {
        Some(status) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "installId": install_id,
                "active":    state.router.is_active(install_id),
                "summary":   status.describe(),
                "detail":    status,
            })),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "installId": install_id, "status": "not_found" })),
        ),
    }
}

/// GET /installs
async fn installs_handler(State(state): State<Arc<AppState>>) -> Json<Vec<InstallId>> {
    Json(state.router.active_installs())
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn error_status(error: &InstallError) -> StatusCode {
    match error {
        InstallError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        InstallError::DuplicateInstall(_) => StatusCode::CONFLICT,
        InstallError::Fragmenter(_) => StatusCode::BAD_GATEWAY,
    }
}
