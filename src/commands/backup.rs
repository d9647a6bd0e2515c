//! Backup Commands
//!
//! `/api/respaldo` 하위 HTTP 엔드포인트

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::backup::{BackupMode, RestoreOutcome, ScheduledJobInfo};
use crate::commands::AppState;
use crate::error::{AppError, CommandResult};
use crate::utils::{download_file_name, validate_existing_file};

#[derive(Debug, Deserialize)]
pub struct BackupQuery {
    pub filename: Option<String>,
    pub password: Option<String>,
    pub mode: Option<String>,
}

/// GET /backup - 즉시 백업 다운로드 (스트리밍)
pub async fn download_backup(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BackupQuery>,
) -> CommandResult<Response<Body>> {
    let mode = BackupMode::parse(query.mode.as_deref())?;
    let password = query.password.filter(|p| !p.is_empty());
    let filename = download_file_name(query.filename.as_deref(), password.is_some());

    tracing::info!(mode = %mode, filename = %filename, encrypted = password.is_some(), "on-demand backup requested");
    let stream = state.runner.open_stream(mode, password.as_deref()).await?;

    Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(e.to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreRequest {
    pub file_path: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub verify_only: bool,
}

#[derive(Debug, Serialize)]
pub struct RestoreResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,
    pub message: String,
}

/// POST /restore - 복원 또는 비밀번호/파일 검증
pub async fn restore_backup(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RestoreRequest>,
) -> CommandResult<Json<RestoreResponse>> {
    let path = validate_existing_file(request.file_path.as_deref().unwrap_or_default())?;

    let outcome = state
        .runner
        .restore(&path, request.password.as_deref(), request.verify_only)
        .await?;

    Ok(Json(match outcome {
        RestoreOutcome::Verified => RestoreResponse {
            valid: Some(true),
            message: "Backup file is valid and the password is correct".into(),
        },
        RestoreOutcome::Restored => RestoreResponse {
            valid: None,
            message: "Restore completed successfully".into(),
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub schedule: Option<String>,
    pub password: Option<String>,
    /// 백업 범위 (full / data-only / schema-only)
    pub options: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleResponse {
    pub message: String,
    pub job_id: String,
    pub schedule: String,
    pub mode: BackupMode,
}

/// POST /schedule-backup
pub async fn schedule_backup(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ScheduleRequest>,
) -> CommandResult<Json<ScheduleResponse>> {
    let expression = request
        .schedule
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::InvalidSchedule("cron expression is required".into()))?;

    let job = state
        .scheduler
        .schedule(&expression, request.options.as_deref(), request.password)
        .await?;

    Ok(Json(ScheduleResponse {
        message: "Backup scheduled successfully".into(),
        job_id: job.job_id,
        schedule: job.schedule,
        mode: job.mode,
    }))
}

/// GET /scheduled-backups
pub async fn list_scheduled(State(state): State<Arc<AppState>>) -> Json<Vec<ScheduledJobInfo>> {
    Json(state.scheduler.list().await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub job_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub message: String,
    pub job_id: String,
}

/// POST /scheduled-backups/cancel
pub async fn cancel_scheduled(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CancelRequest>,
) -> CommandResult<Json<CancelResponse>> {
    let job_id = request.job_id.unwrap_or_default();
    state.scheduler.cancel(&job_id).await?;

    Ok(Json(CancelResponse {
        message: "Job cancelled successfully".into(),
        job_id,
    }))
}
