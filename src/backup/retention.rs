use std::path::Path;
use std::time::{Duration, SystemTime};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// 보관 기간이 지난 백업 파일 삭제
///
/// 수정 시각 기준 `retention_days`보다 오래된 파일을 지웁니다.
/// 개별 파일 오류는 로그만 남기고 계속 진행하며, 삭제한 파일 수를 반환합니다.
pub fn clean_old_backups(dir: &Path, retention_days: u64) -> usize {
    clean_older_than(
        dir,
        Duration::from_secs(retention_days.saturating_mul(SECS_PER_DAY)),
        SystemTime::now(),
    )
}

fn clean_older_than(dir: &Path, max_age: Duration, now: SystemTime) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            tracing::error!(dir = %dir.display(), error = %e, "cannot read backup directory");
            return 0;
        }
    };

    let mut removed = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        let modified = match entry.metadata().and_then(|m| {
            if m.is_file() {
                m.modified().map(Some)
            } else {
                Ok(None)
            }
        }) {
            Ok(Some(modified)) => modified,
            Ok(None) => continue,
            Err(e) => {
                tracing::error!(file = %path.display(), error = %e, "cannot inspect backup");
                continue;
            }
        };

        let age = now.duration_since(modified).unwrap_or_default();
        if age <= max_age {
            continue;
        }

        match std::fs::remove_file(&path) {
            Ok(()) => {
                removed += 1;
                tracing::info!(file = %path.display(), age_days = age.as_secs() / SECS_PER_DAY, "expired backup removed");
            }
            Err(e) => tracing::error!(file = %path.display(), error = %e, "cannot remove expired backup"),
        }
    }
    removed
}
