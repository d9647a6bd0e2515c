//! 예약 백업 작업 영속화 (`scheduled_jobs.json`)
//!
//! 비밀번호는 평문으로 저장됩니다. 파일 권한은 유닉스에서 0600으로 제한합니다.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backup::mode::BackupMode;
use crate::error::AppError;

/// 예약 작업 정의
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    pub job_id: String,
    pub schedule: String,
    #[serde(default, deserialize_with = "lenient_mode")]
    pub mode: BackupMode,
    #[serde(default)]
    pub password: Option<String>,
}

impl std::fmt::Debug for JobDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDescriptor")
            .field("job_id", &self.job_id)
            .field("schedule", &self.schedule)
            .field("mode", &self.mode)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// 이전 버전이 저장한 별칭(`data`, `schema`)도 허용, 알 수 없는 값은 full
fn lenient_mode<'de, D>(deserializer: D) -> Result<BackupMode, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(BackupMode::parse(raw.as_deref()).unwrap_or_else(|_| {
        tracing::warn!(mode = ?raw, "unknown persisted backup mode, using full");
        BackupMode::Full
    }))
}

/// 작업 파일의 항목 하나
///
/// 해석할 수 없는 항목은 원본 JSON 그대로 보존되어 다시 기록됩니다.
#[derive(Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StoredJob {
    Job(JobDescriptor),
    Unreadable(serde_json::Value),
}

impl StoredJob {
    fn from_value(raw: serde_json::Value) -> Self {
        match serde_json::from_value::<JobDescriptor>(raw.clone()) {
            Ok(job) => StoredJob::Job(job),
            Err(e) => {
                tracing::warn!(
                    job_id = ?raw.get("jobId").and_then(|v| v.as_str()),
                    error = %e,
                    "unreadable scheduled job entry kept as is"
                );
                StoredJob::Unreadable(raw)
            }
        }
    }

    pub fn job(&self) -> Option<&JobDescriptor> {
        match self {
            StoredJob::Job(job) => Some(job),
            StoredJob::Unreadable(_) => None,
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        match self {
            StoredJob::Job(job) => Some(&job.job_id),
            StoredJob::Unreadable(raw) => raw.get("jobId").and_then(|v| v.as_str()),
        }
    }
}

impl std::fmt::Debug for StoredJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoredJob::Job(job) => f.debug_tuple("Job").field(job).finish(),
            StoredJob::Unreadable(_) => f.debug_tuple("Unreadable").field(&self.job_id()).finish(),
        }
    }
}

/// JSON 파일 기반 작업 저장소
#[derive(Debug, Clone)]
pub struct JobStore {
    path: PathBuf,
}

impl JobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 저장된 작업 목록 로드
    ///
    /// - 파일이 없으면 `[]`로 생성
    /// - 최상위가 JSON 배열이 아니면 로그를 남기고 `[]`로 초기화
    /// - 배열 안의 잘못된 항목은 `StoredJob::Unreadable`로 보존
    pub fn load(&self) -> Result<Vec<StoredJob>, AppError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.save(&[])?;
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(serde_json::Value::Array(entries)) => {
                Ok(entries.into_iter().map(StoredJob::from_value).collect())
            }
            Ok(_) => {
                tracing::error!(path = %self.path.display(), "scheduled jobs file is not a JSON array, resetting");
                self.save(&[])?;
                Ok(Vec::new())
            }
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "scheduled jobs file is corrupt, resetting");
                self.save(&[])?;
                Ok(Vec::new())
            }
        }
    }

    /// 전체 목록 기록 (임시 파일 → rename)
    pub fn save(&self, jobs: &[StoredJob]) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(jobs)?;
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        std::fs::write(&tmp_path, json)?;
        restrict_permissions(&tmp_path)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
