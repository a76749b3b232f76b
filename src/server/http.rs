//! HTTP surface: webhook ingestion plus health endpoint.
//!
//! The webhook always acknowledges with HTTP 200 so the platform never
//! retries a delivery; failures are reported in-band in the response body.

use axum::{
    body::Bytes,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::channels::telegram_inbound::{classify, TelegramUpdate};
use crate::poller::UpdateHandler;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_WEBHOOK_PATH: &str = "/telegram/webhook";

/// HTTP settings decoded from the `server` config section.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub webhook_path: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            webhook_path: DEFAULT_WEBHOOK_PATH.to_string(),
        }
    }
}

/// Build an `HttpConfig` from the loaded JSON configuration.
pub fn build_http_config(cfg: &Value) -> HttpConfig {
    let server = cfg.get("server").and_then(|v| v.as_object());

    let host = server
        .and_then(|s| s.get("host"))
        .and_then(|v| v.as_str())
        .unwrap_or(DEFAULT_HOST)
        .to_string();

    let port = server
        .and_then(|s| s.get("port"))
        .and_then(|v| v.as_u64())
        .map(|v| v as u16)
        .unwrap_or(DEFAULT_PORT);

    let webhook_path = server
        .and_then(|s| s.get("webhookPath"))
        .and_then(|v| v.as_str())
        .unwrap_or(DEFAULT_WEBHOOK_PATH)
        .to_string();

    HttpConfig {
        host,
        port,
        webhook_path,
    }
}

#[derive(Clone)]
struct AppState {
    handler: Arc<dyn UpdateHandler>,
}

/// Build the router: `POST <webhook path>` and `GET /healthz`.
pub fn create_router(config: &HttpConfig, handler: Arc<dyn UpdateHandler>) -> Router {
    Router::new()
        .route(&config.webhook_path, post(webhook_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(AppState { handler })
}

/// Receive one update. Always HTTP 200; decode failures are reported
/// in-band so the platform does not redeliver a payload that will never
/// parse.
async fn webhook_handler(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let update = match serde_json::from_slice::<TelegramUpdate>(&body) {
        Ok(raw) => classify(raw),
        Err(e) => {
            warn!(target: "server", error = %e, "webhook payload did not decode");
            return Json(json!({ "ok": true, "error": format!("invalid update: {e}") }));
        }
    };

    debug!(target: "server", update_id = update.update_id, "webhook update received");
    let outcome = state.handler.handle(&update).await;
    Json(json!({ "ok": true, "outcome": outcome }))
}

async fn healthz_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
