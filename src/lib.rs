//! O2 Backend Library
//!
//! 암호화된 환경 설정 부트스트랩, JWT 시크릿 회전, PostgreSQL 백업/복원 서비스를 담당합니다.

pub mod backup;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod secrets;
pub mod utils;

use std::sync::Arc;

use tokio::signal;

use backup::{BackupRunner, BackupScheduler, JobStore};
use commands::AppState;
use config::{AppConfig, DbConfig};
use error::AppError;
use secrets::{EnvStore, JwtSecrets};

/// 암호화 env store를 준비하고 프로세스 환경에 적용
pub fn bootstrap(config: &AppConfig) -> Result<EnvStore, AppError> {
    let store = EnvStore::open(config.env_file_path())?;

    if store.install()? {
        tracing::info!(path = %store.encrypted_path().display(), "encrypted env store created");
    }

    let applied = store.load_into_env()?;
    tracing::info!(applied, "env store loaded");
    Ok(store)
}

/// HTTP 서버 실행
///
/// JWT 시크릿이 없으면 기동을 거부합니다.
pub async fn run(config: AppConfig) -> Result<(), AppError> {
    let store = bootstrap(&config)?;
    let jwt = JwtSecrets::from_env()?;
    store.ensure_database_url()?;

    let db = DbConfig::from_env()?;
    tracing::info!(db = ?db, "database configured");

    let runner = Arc::new(BackupRunner::new(&config, db));
    let scheduler = Arc::new(BackupScheduler::new(
        runner.clone(),
        JobStore::new(config.jobs_file_path()),
    ));

    let restored = scheduler.restore_persisted().await?;
    tracing::info!(restored, "scheduled backups restored");

    let state = Arc::new(AppState::new(runner, scheduler.clone(), jwt));
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, jwt_version = state.jwt.version, "o2-backend listening");

    axum::serve(listener, commands::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await;
    tracing::info!("o2-backend stopped");
    Ok(())
}

/// JWT 서명 시크릿 회전 (CLI)
///
/// 실행 중인 서버는 재시작 후 새 세대를 사용합니다.
pub fn rotate_jwt(config: &AppConfig) -> Result<JwtSecrets, AppError> {
    bootstrap(config)?.rotate_jwt_secret()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
