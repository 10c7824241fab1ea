use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use porthole_core::{Config, Error, KeyModifiers};
use porthole_engine::CdpLauncher;
use porthole_session::{HistoryMove, SessionStore};
use serde::Deserialize;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::stream;

#[derive(Clone)]
pub struct GatewayState {
    store: Arc<SessionStore>,
}

// ---------------------------------------------------------------------------
// Error mapping: not-found errors become 404, everything else 500, with a
// JSON `detail` body either way.
// ---------------------------------------------------------------------------

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_not_found() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(serde_json::json!({ "detail": self.0.to_string() }))).into_response()
    }
}

type ApiResult = Result<Json<serde_json::Value>, ApiError>;

fn not_found(what: &str) -> ApiError {
    ApiError(Error::SessionNotFound(what.to_string()))
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct TabQuery {
    tab_id: Option<String>,
}

#[derive(Deserialize)]
struct NavigateRequest {
    url: String,
    tab_id: Option<String>,
}

#[derive(Deserialize)]
struct ClickRequest {
    x: f64,
    y: f64,
    #[serde(default = "default_button")]
    button: String,
    #[serde(default = "default_click_count")]
    click_count: i64,
    tab_id: Option<String>,
}

fn default_button() -> String {
    "left".to_string()
}

fn default_click_count() -> i64 {
    1
}

#[derive(Deserialize)]
struct TypeRequest {
    text: String,
    tab_id: Option<String>,
}

#[derive(Deserialize)]
struct KeypressRequest {
    key: String,
    #[serde(default)]
    modifiers: KeyModifiers,
    tab_id: Option<String>,
}

#[derive(Deserialize)]
struct ScrollRequest {
    #[serde(default)]
    delta_x: f64,
    #[serde(default)]
    delta_y: f64,
    tab_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Session and tab lifecycle
// ---------------------------------------------------------------------------

async fn handle_create_session(State(state): State<GatewayState>) -> ApiResult {
    let created = state.store.create_session().await?;
    Ok(Json(serde_json::json!({
        "session_id": created.session_id,
        "created_at": created.created_at.to_rfc3339(),
        "initial_tab_id": created.initial_tab_id,
    })))
}

async fn handle_close_session(
    State(state): State<GatewayState>,
    AxumPath(session_id): AxumPath<String>,
) -> ApiResult {
    if !state.store.close_session(&session_id).await {
        return Err(not_found(&session_id));
    }
    Ok(Json(serde_json::json!({ "status": "closed" })))
}

async fn handle_create_tab(
    State(state): State<GatewayState>,
    AxumPath(session_id): AxumPath<String>,
) -> ApiResult {
    let tab_id = state.store.create_tab(&session_id).await?;
    Ok(Json(serde_json::json!({ "tab_id": tab_id })))
}

async fn handle_close_tab(
    State(state): State<GatewayState>,
    AxumPath((session_id, tab_id)): AxumPath<(String, String)>,
) -> ApiResult {
    state.store.close_tab(&session_id, &tab_id).await?;
    Ok(Json(serde_json::json!({ "status": "closed", "tab_id": tab_id })))
}

async fn handle_activate_tab(
    State(state): State<GatewayState>,
    AxumPath((session_id, tab_id)): AxumPath<(String, String)>,
) -> ApiResult {
    state.store.activate_tab(&session_id, &tab_id).await?;
    Ok(Json(serde_json::json!({ "status": "active", "tab_id": tab_id })))
}

async fn handle_status(
    State(state): State<GatewayState>,
    AxumPath(session_id): AxumPath<String>,
    Query(query): Query<TabQuery>,
) -> ApiResult {
    let status = state
        .store
        .status(&session_id, query.tab_id.as_deref())
        .await?;
    Ok(Json(serde_json::json!({
        "session_id": status.session_id,
        "active_tab_id": status.active_tab_id,
        "current_url": status.current_url,
        "title": status.title,
        "can_go_back": status.can_go_back,
        "can_go_forward": status.can_go_forward,
    })))
}

// ---------------------------------------------------------------------------
// Navigation and history
// ---------------------------------------------------------------------------

async fn handle_navigate(
    State(state): State<GatewayState>,
    AxumPath(session_id): AxumPath<String>,
    Json(req): Json<NavigateRequest>,
) -> ApiResult {
    let out = state
        .store
        .navigate(&session_id, req.tab_id.as_deref(), &req.url)
        .await?;
    Ok(Json(serde_json::json!({
        "status": "navigated",
        "url": out.url,
        "title": out.title,
        "tab_id": out.tab_id,
    })))
}

async fn handle_back(
    State(state): State<GatewayState>,
    AxumPath(session_id): AxumPath<String>,
    Query(query): Query<TabQuery>,
) -> ApiResult {
    let (tab_id, moved) = state
        .store
        .back(&session_id, query.tab_id.as_deref())
        .await?;
    match moved {
        HistoryMove::Moved { url } => Ok(Json(serde_json::json!({
            "status": "success",
            "url": url,
            "tab_id": tab_id,
        }))),
        HistoryMove::AtBoundary => Ok(Json(serde_json::json!({
            "status": "no_history",
            "tab_id": tab_id,
        }))),
    }
}

async fn handle_forward(
    State(state): State<GatewayState>,
    AxumPath(session_id): AxumPath<String>,
    Query(query): Query<TabQuery>,
) -> ApiResult {
    let (tab_id, moved) = state
        .store
        .forward(&session_id, query.tab_id.as_deref())
        .await?;
    match moved {
        HistoryMove::Moved { url } => Ok(Json(serde_json::json!({
            "status": "success",
            "url": url,
            "tab_id": tab_id,
        }))),
        HistoryMove::AtBoundary => Ok(Json(serde_json::json!({
            "status": "no_forward_history",
            "tab_id": tab_id,
        }))),
    }
}

async fn handle_refresh(
    State(state): State<GatewayState>,
    AxumPath(session_id): AxumPath<String>,
    Query(query): Query<TabQuery>,
) -> ApiResult {
    let out = state
        .store
        .refresh(&session_id, query.tab_id.as_deref())
        .await?;
    Ok(Json(serde_json::json!({
        "status": "refreshed",
        "url": out.url,
        "tab_id": out.tab_id,
    })))
}

// ---------------------------------------------------------------------------
// Page interaction
// ---------------------------------------------------------------------------

async fn handle_screenshot(
    State(state): State<GatewayState>,
    AxumPath(session_id): AxumPath<String>,
    Query(query): Query<TabQuery>,
) -> ApiResult {
    let (tab_id, page) = state
        .store
        .resolve_page(&session_id, query.tab_id.as_deref())
        .await?;
    let data = page
        .screenshot_jpeg(state.store.config().stream_jpeg_quality)
        .await?;
    Ok(Json(serde_json::json!({
        "screenshot": format!("data:image/jpeg;base64,{}", data),
        "url": page.current_url().await,
        "title": page.title().await,
        "tab_id": tab_id,
    })))
}

async fn handle_click(
    State(state): State<GatewayState>,
    AxumPath(session_id): AxumPath<String>,
    Json(req): Json<ClickRequest>,
) -> ApiResult {
    let (tab_id, page) = state
        .store
        .resolve_page(&session_id, req.tab_id.as_deref())
        .await?;
    page.click(req.x, req.y, &req.button, req.click_count).await?;
    Ok(Json(serde_json::json!({ "status": "clicked", "tab_id": tab_id })))
}

async fn handle_type(
    State(state): State<GatewayState>,
    AxumPath(session_id): AxumPath<String>,
    Json(req): Json<TypeRequest>,
) -> ApiResult {
    let (tab_id, page) = state
        .store
        .resolve_page(&session_id, req.tab_id.as_deref())
        .await?;
    page.type_text(&req.text).await?;
    Ok(Json(serde_json::json!({ "status": "typed", "tab_id": tab_id })))
}

async fn handle_keypress(
    State(state): State<GatewayState>,
    AxumPath(session_id): AxumPath<String>,
    Json(req): Json<KeypressRequest>,
) -> ApiResult {
    let (tab_id, page) = state
        .store
        .resolve_page(&session_id, req.tab_id.as_deref())
        .await?;
    page.press_key(&req.key, req.modifiers.bitmask()).await?;
    Ok(Json(serde_json::json!({ "status": "pressed", "tab_id": tab_id })))
}

async fn handle_scroll(
    State(state): State<GatewayState>,
    AxumPath(session_id): AxumPath<String>,
    Json(req): Json<ScrollRequest>,
) -> ApiResult {
    let (tab_id, page) = state
        .store
        .resolve_page(&session_id, req.tab_id.as_deref())
        .await?;
    page.scroll(req.delta_x, req.delta_y).await?;
    Ok(Json(serde_json::json!({ "status": "scrolled", "tab_id": tab_id })))
}

// ---------------------------------------------------------------------------
// Health and streaming
// ---------------------------------------------------------------------------

async fn handle_health(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.store.session_count(),
        "uptime_secs": state.store.uptime_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    AxumPath(session_id): AxumPath<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream::run(socket, state.store, session_id))
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run(cli_host: Option<String>, cli_port: Option<u16>) -> anyhow::Result<()> {
    let cfg = Config::from_env();
    let host = cli_host.unwrap_or_else(|| cfg.host.clone());
    let port = cli_port.unwrap_or(cfg.port);

    let launcher = Arc::new(CdpLauncher::new(cfg.chrome_bin.clone()));
    let store = SessionStore::new(cfg, launcher);
    let state = GatewayState { store: store.clone() };

    let app = Router::new()
        .route("/browser/session", post(handle_create_session))
        .route("/browser/session/:id", delete(handle_close_session))
        .route("/browser/session/:id/tabs", post(handle_create_tab))
        .route("/browser/session/:id/tabs/:tab_id", delete(handle_close_tab))
        .route(
            "/browser/session/:id/tabs/:tab_id/activate",
            post(handle_activate_tab),
        )
        .route("/browser/session/:id/status", get(handle_status))
        .route("/browser/:id/navigate", post(handle_navigate))
        .route("/browser/:id/back", post(handle_back))
        .route("/browser/:id/forward", post(handle_forward))
        .route("/browser/:id/refresh", post(handle_refresh))
        .route("/browser/:id/screenshot", get(handle_screenshot))
        .route("/browser/:id/click", post(handle_click))
        .route("/browser/:id/type", post(handle_type))
        .route("/browser/:id/keypress", post(handle_keypress))
        .route("/browser/:id/scroll", post(handle_scroll))
        .route("/browser/health", get(handle_health))
        .route("/browser/ws/:id", get(handle_ws_upgrade))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let bind_addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "Gateway listening");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut http_shutdown_rx = shutdown_tx.subscribe();
    let http_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown_rx.recv().await;
            })
            .await
            .ok();
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, draining tasks...");

    let _ = shutdown_tx.send(());
    store.shutdown().await;
    let _ = http_handle.await;

    Ok(())
}
