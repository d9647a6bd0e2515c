//! tracing 구독자 초기화
//!
//! `RUST_LOG`가 없으면 기본 필터를 사용합니다. `O2_PATH_LOGS`가 지정되면
//! 콘솔 출력과 함께 `<dir>/o2-backend.log`에도 append 합니다.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const DEFAULT_FILTER: &str = "o2_lib=info,o2_backend=info,tower_http=info";
pub const LOG_FILE_NAME: &str = "o2-backend.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// 로그 파일 경로
pub fn log_file_path(dir: &Path) -> PathBuf {
    dir.join(LOG_FILE_NAME)
}

/// 전역 구독자 설치 (프로세스당 한 번)
///
/// 로그 파일을 열 수 없으면 콘솔만 사용하고 경고를 남깁니다.
pub fn init(log_dir: Option<&Path>) {
    let mut file_error = None;
    let file_layer = log_dir.and_then(|dir| {
        let opened = std::fs::create_dir_all(dir).and_then(|_| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file_path(dir))
        });
        match opened {
            Ok(file) => Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            ),
            Err(e) => {
                file_error = Some(e);
                None
            }
        }
    });

    let installed = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init();

    if installed.is_err() {
        return;
    }

    if let Some(e) = file_error {
        tracing::warn!(error = %e, "log file unavailable, logging to console only");
    }
}
