// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP status surface.
//!
//! Read-only view of the acquisition state plus the on-demand export
//! trigger and an administrative per-client stats reset.

use crate::export::{ExportEngine, SaveReport};
use crate::logbook::{LogEntry, Logbook};
use crate::server::AbuseTracker;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state behind the HTTP handlers.
pub struct AppState {
    pub engine: ExportEngine,
    pub abuse: Arc<AbuseTracker>,
    pub logbook: Logbook,
    pub tcp_port: u16,
}

/// API error response.
#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    protocol: &'static str,
    port: u16,
    last_message_received_at: DateTime<Utc>,
    last_write_status: String,
    last_write_time: Option<DateTime<Utc>>,
}

/// GET /api/v1/status
async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let export = state.engine.state().snapshot();
    Json(StatusResponse {
        status: "Active",
        protocol: "STX/ETX",
        port: state.tcp_port,
        last_message_received_at: export.last_received,
        last_write_status: export.last_write_status,
        last_write_time: export.last_write_time,
    })
}

/// POST /api/v1/save
async fn save(State(state): State<Arc<AppState>>) -> Json<SaveReport> {
    Json(state.engine.save_now(true).await)
}

/// GET /api/v1/logs
async fn logs(State(state): State<Arc<AppState>>) -> Json<Vec<LogEntry>> {
    Json(state.logbook.recent())
}

/// POST /api/v1/clients/:addr/reset
async fn reset_client(
    State(state): State<Arc<AppState>>,
    Path(addr): Path<String>,
) -> Result<StatusCode, ApiError> {
    let ip: IpAddr = addr.parse().map_err(|_| ApiError {
        error: format!("not an IP address: {}", addr),
        code: 400,
    })?;

    if state.abuse.reset(ip) {
        state
            .logbook
            .info("Client stats reset", format!("client {}", ip));
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError {
            error: format!("unknown client: {}", ip),
            code: 404,
        })
    }
}

/// Build the gateway router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

    Router::new()
        .route("/api/v1/status", get(status))
        .route("/api/v1/save", post(save))
        .route("/api/v1/logs", get(logs))
        .route("/api/v1/clients/:addr/reset", post(reset_client))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
