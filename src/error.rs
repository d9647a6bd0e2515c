//! O2 Error Types
//!
//! 애플리케이션 전역 에러 타입 정의

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::secrets::vault::VaultError;

/// O2 백엔드 에러
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid cron expression: {0}")]
    InvalidSchedule(String),

    #[error("Invalid backup mode: {0}")]
    InvalidMode(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Scheduled job not found: {0}")]
    JobNotFound(String),

    #[error("{program} could not be started: {source}")]
    SubprocessSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with status {code:?}")]
    SubprocessExit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Backup contains only structure or only data; restore the schema first")]
    RestoreStructureMismatch(String),

    #[error("Wrong password or corrupt backup file")]
    PasswordMismatch,

    #[error("Corrupt backup file: {0}")]
    CorruptArtifact(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Vault(VaultError::Decryption(_)) => "DECRYPTION_ERROR",
            AppError::Vault(_) => "VAULT_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            AppError::InvalidMode(_) => "INVALID_MODE",
            AppError::InvalidRequest(_) => "INVALID_REQUEST",
            AppError::JobNotFound(_) => "JOB_NOT_FOUND",
            AppError::SubprocessSpawn { .. } => "SUBPROCESS_SPAWN_ERROR",
            AppError::SubprocessExit { .. } => "SUBPROCESS_EXIT_ERROR",
            AppError::RestoreStructureMismatch(_) => "RESTORE_STRUCTURE_MISMATCH",
            AppError::PasswordMismatch => "PASSWORD_MISMATCH",
            AppError::CorruptArtifact(_) => "CORRUPT_ARTIFACT",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidSchedule(_)
            | AppError::InvalidMode(_)
            | AppError::InvalidRequest(_)
            | AppError::PasswordMismatch
            | AppError::CorruptArtifact(_) => StatusCode::BAD_REQUEST,
            AppError::JobNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// HTTP 응답용 직렬화 가능한 에러
#[derive(Debug, Serialize)]
pub struct CommandError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

impl From<AppError> for CommandError {
    fn from(error: AppError) -> Self {
        // 서버 내부 에러는 호출자에게 정제된 메시지만 전달
        let message = match &error {
            AppError::Io(_) | AppError::Serialization(_) | AppError::Internal(_) => {
                "Internal server error".to_string()
            }
            AppError::Vault(VaultError::Decryption(e)) => e.to_string(),
            AppError::Vault(_) => "Secret store error".to_string(),
            AppError::SubprocessSpawn { program, .. } => {
                format!("{} was not found on this system", program)
            }
            other => other.to_string(),
        };

        let details = match &error {
            AppError::SubprocessExit { stderr, .. } if !stderr.is_empty() => Some(stderr.clone()),
            _ => None,
        };

        CommandError {
            code: error.code().to_string(),
            message,
            details,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, debug = ?self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        (status, Json(CommandError::from(self))).into_response()
    }
}

/// 명령 결과 타입
pub type CommandResult<T> = Result<T, AppError>;
