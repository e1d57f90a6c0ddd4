use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use botyard_core::{BotError, BotRecord, BotStatus, BotSummary, InstallPipeline, Supervisor};

use crate::services::Services;

/// Largest accepted request body (the upload route's zip archive).
pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub installer: Arc<InstallPipeline>,
    /// The one account this server acts for.
    pub account_id: Arc<str>,
}

impl AppState {
    pub fn new(services: Services, account_id: &str) -> Self {
        Self {
            supervisor: services.supervisor,
            installer: services.installer,
            account_id: Arc::from(account_id),
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    kind: &'static str,
    retry_safe: bool,
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
            kind: "bad_request",
            retry_safe: false,
        }
    }
}

/// HTTP status for each error kind.
pub fn status_for(err: &BotError) -> StatusCode {
    match err {
        BotError::QuotaExceeded { .. } | BotError::InvalidName { .. } => StatusCode::BAD_REQUEST,
        BotError::NotFound { .. } => StatusCode::NOT_FOUND,
        BotError::DuplicateName { .. } => StatusCode::CONFLICT,
        BotError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        BotError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        BotError::InvalidBotBundle { .. }
        | BotError::InstallFailed { .. }
        | BotError::AlreadyRunning { .. }
        | BotError::StartFailed { .. }
        | BotError::StopFailed { .. }
        | BotError::DeleteFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<BotError> for AppError {
    fn from(err: BotError) -> Self {
        Self {
            status: status_for(&err),
            message: err.to_string(),
            kind: err.kind(),
            retry_safe: err.retry_safe(),
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        Self {
            status: err.status(),
            message: err.body_text(),
            kind: "bad_request",
            retry_safe: false,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({
            "error": self.message,
            "kind": self.kind,
            "retry_safe": self.retry_safe,
        });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub name: String,
    pub status: BotStatus,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/bots", get(list_bots))
        .route("/bots/upload", post(upload_bot))
        .route("/bots/start/{bot_name}", get(start_bot))
        .route("/bots/stop/{bot_name}", get(stop_bot))
        .route("/bots/delete/{bot_name}", delete(delete_bot))
        .route("/bots/status/{bot_name}", get(bot_status))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(state: AppState, bind: &str, port: u16) -> Result<()> {
    // Bots launched by an earlier server may still be running.
    match state.supervisor.reconcile().await {
        Ok(running) => tracing::info!(running, "runtime state reconciled"),
        Err(e) => tracing::warn!(error = %e, "startup reconciliation failed, starting with an empty cache"),
    }

    let app = build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("botyard serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("botyard serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn index(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    let bots = state.supervisor.list(&state.account_id).await?;

    let rows = if bots.is_empty() {
        "<tr><td colspan=\"3\">No bots installed.</td></tr>".to_string()
    } else {
        bots.iter()
            .map(|b| {
                format!(
                    "<tr><td>{name}</td><td>{status}</td><td>{created}</td></tr>",
                    name = b.name,
                    status = b.status,
                    created = b.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    Ok(Html(format!(
        "<!DOCTYPE html>\
<html><head><title>botyard</title></head><body>\
<h1>botyard</h1>\
<p>Account: {account} | <a href=\"/bots\">/bots</a></p>\
<table><tr><th>Bot</th><th>Status</th><th>Installed</th></tr>{rows}</table>\
</body></html>",
        account = state.account_id,
    )))
}

async fn list_bots(State(state): State<AppState>) -> Result<Json<Vec<BotSummary>>, AppError> {
    Ok(Json(state.supervisor.list(&state.account_id).await?))
}

async fn upload_bot(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<BotRecord>, AppError> {
    let mut archive = None;
    let mut bot_name = None;
    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().map(str::to_owned);
        match field_name.as_deref() {
            Some("botZip") => archive = Some(field.bytes().await?.to_vec()),
            Some("botName") => bot_name = Some(field.text().await?),
            _ => {}
        }
    }

    let archive = archive.ok_or_else(|| AppError::bad_request("missing botZip field"))?;
    let bot_name = bot_name.ok_or_else(|| AppError::bad_request("missing botName field"))?;
    let record = state
        .installer
        .install(&state.account_id, bot_name.trim(), archive)
        .await?;
    Ok(Json(record))
}

async fn start_bot(
    State(state): State<AppState>,
    Path(bot_name): Path<String>,
) -> Result<StatusCode, AppError> {
    state.supervisor.start(&state.account_id, &bot_name).await?;
    Ok(StatusCode::OK)
}

async fn stop_bot(
    State(state): State<AppState>,
    Path(bot_name): Path<String>,
) -> Result<StatusCode, AppError> {
    state.supervisor.stop(&state.account_id, &bot_name).await?;
    Ok(StatusCode::OK)
}

async fn delete_bot(
    State(state): State<AppState>,
    Path(bot_name): Path<String>,
) -> Result<StatusCode, AppError> {
    state.supervisor.delete(&state.account_id, &bot_name).await?;
    Ok(StatusCode::OK)
}

async fn bot_status(
    State(state): State<AppState>,
    Path(bot_name): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let status = state.supervisor.status(&state.account_id, &bot_name).await?;
    Ok(Json(StatusResponse {
        name: bot_name,
        status,
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
