//! HTTP API Module
//!
//! - `/health`, `/api/auth/validate`: 인증 없이 접근
//! - `/api/respaldo/*`: Bearer 토큰 필요

pub mod auth;
pub mod backup;

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::backup::{BackupRunner, BackupScheduler};
use crate::secrets::JwtSecrets;

/// 핸들러 공유 상태
pub struct AppState {
    pub runner: Arc<BackupRunner>,
    pub scheduler: Arc<BackupScheduler>,
    pub jwt: JwtSecrets,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(runner: Arc<BackupRunner>, scheduler: Arc<BackupScheduler>, jwt: JwtSecrets) -> Self {
        Self {
            runner,
            scheduler,
            jwt,
            started_at: Instant::now(),
        }
    }
}

/// 전체 라우터 구성
pub fn router(state: Arc<AppState>) -> Router {
    let respaldo = Router::new()
        .route("/backup", get(backup::download_backup))
        .route("/restore", post(backup::restore_backup))
        .route("/schedule-backup", post(backup::schedule_backup))
        .route("/scheduled-backups", get(backup::list_scheduled))
        .route("/scheduled-backups/cancel", post(backup::cancel_scheduled))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/api/auth/validate", get(auth::validate))
        .nest("/api/respaldo", respaldo)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    /// 초 단위
    uptime: f64,
    timestamp: String,
}

async fn health(axum::extract::State(state): axum::extract::State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime: state.started_at.elapsed().as_secs_f64(),
        timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    })
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Route not found" })),
    )
}
