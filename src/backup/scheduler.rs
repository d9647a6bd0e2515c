//! 예약 백업 레지스트리
//!
//! job id → 실행 중인 tokio 태스크. 각 작업은 다음 실행 시각까지 대기한 뒤
//! 실행을 별도 태스크로 띄우므로 같은 작업의 실행이 겹칠 수 있습니다.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Local;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::backup::jobs::{JobDescriptor, JobStore, StoredJob};
use crate::backup::mode::BackupMode;
use crate::backup::runner::BackupRunner;
use crate::backup::schedule::CronSchedule;
use crate::error::AppError;

/// 목록 조회 응답 항목
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJobInfo {
    pub job_id: String,
    pub schedule: String,
    pub mode: BackupMode,
    pub active: bool,
    /// RFC 3339
    pub next_run: Option<String>,
    /// 다음 실행까지 남은 밀리초
    pub countdown: Option<i64>,
}

struct LiveJob {
    descriptor: JobDescriptor,
    schedule: CronSchedule,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    live: HashMap<String, LiveJob>,
    /// 파일에 기록되는 목록 (등록에 실패한 항목도 유지)
    persisted: Vec<StoredJob>,
}

/// 예약 백업 스케줄러
pub struct BackupScheduler {
    runner: Arc<BackupRunner>,
    store: JobStore,
    registry: RwLock<Registry>,
}

impl BackupScheduler {
    pub fn new(runner: Arc<BackupRunner>, store: JobStore) -> Self {
        Self {
            runner,
            store,
            registry: RwLock::new(Registry::default()),
        }
    }

    /// 새 예약 작업 생성 및 영속화
    pub async fn schedule(
        &self,
        expression: &str,
        mode: Option<&str>,
        password: Option<String>,
    ) -> Result<JobDescriptor, AppError> {
        let schedule = CronSchedule::parse(expression)?;
        let mode = BackupMode::parse(mode)?;

        let descriptor = JobDescriptor {
            job_id: uuid::Uuid::new_v4().to_string(),
            schedule: schedule.expression().to_string(),
            mode,
            password: password.filter(|p| !p.is_empty()),
        };

        // 파일 기록이 성공한 뒤에만 레지스트리에 반영
        {
            let mut registry = self.registry.write().await;
            let mut persisted = registry.persisted.clone();
            persisted.push(StoredJob::Job(descriptor.clone()));
            self.store.save(&persisted)?;

            registry.persisted = persisted;
            self.insert_live(&mut registry, descriptor.clone(), schedule);
        }

        tracing::info!(
            job_id = %descriptor.job_id,
            schedule = %descriptor.schedule,
            mode = %descriptor.mode,
            encrypted = descriptor.password.is_some(),
            "backup job scheduled"
        );

        let removed = self.runner.clean_old_backups();
        if removed > 0 {
            tracing::info!(removed, "retention cleanup finished");
        }

        Ok(descriptor)
    }

    fn insert_live(&self, registry: &mut Registry, descriptor: JobDescriptor, schedule: CronSchedule) {
        let handle = spawn_job(self.runner.clone(), descriptor.clone(), schedule.clone());
        let job_id = descriptor.job_id.clone();
        if let Some(previous) = registry.live.insert(
            job_id.clone(),
            LiveJob {
                descriptor,
                schedule,
                handle,
            },
        ) {
            previous.handle.abort();
            tracing::debug!(job_id = %job_id, "replaced existing job task");
        }
    }

    /// 저장된 정의로 작업 등록 (같은 id가 있으면 교체)
    pub async fn register(&self, descriptor: JobDescriptor) -> Result<(), AppError> {
        let schedule = CronSchedule::parse(&descriptor.schedule)?;
        let mut registry = self.registry.write().await;
        self.insert_live(&mut registry, descriptor, schedule);
        Ok(())
    }

    /// 재시작 시 저장된 작업 복구
    ///
    /// 개별 실패는 로그만 남기고 건너뜁니다. 등록된 작업 수를 반환합니다.
    pub async fn restore_persisted(&self) -> Result<usize, AppError> {
        let entries = self.store.load()?;
        self.registry.write().await.persisted = entries.clone();

        let mut restored = 0usize;
        for descriptor in entries.into_iter().filter_map(|entry| match entry {
            StoredJob::Job(job) => Some(job),
            StoredJob::Unreadable(_) => None,
        }) {
            let job_id = descriptor.job_id.clone();
            match self.register(descriptor).await {
                Ok(()) => restored += 1,
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "cannot restore scheduled job");
                }
            }
        }

        tracing::info!(restored, "scheduled jobs restored");
        Ok(restored)
    }

    /// 작업 취소 (실행 중인 tick은 계속 진행)
    pub async fn cancel(&self, job_id: &str) -> Result<(), AppError> {
        let mut registry = self.registry.write().await;
        if !registry.live.contains_key(job_id) {
            return Err(AppError::JobNotFound(job_id.to_string()));
        }

        let persisted: Vec<StoredJob> = registry
            .persisted
            .iter()
            .filter(|entry| entry.job_id() != Some(job_id))
            .cloned()
            .collect();
        self.store.save(&persisted)?;
        registry.persisted = persisted;

        if let Some(job) = registry.live.remove(job_id) {
            job.handle.abort();
        }

        tracing::info!(job_id, "backup job cancelled");
        Ok(())
    }

    pub async fn list(&self) -> Vec<ScheduledJobInfo> {
        let registry = self.registry.read().await;
        let now = Local::now();

        let mut jobs: Vec<ScheduledJobInfo> = registry
            .live
            .values()
            .map(|job| {
                let next = job.schedule.next_after(&now);
                ScheduledJobInfo {
                    job_id: job.descriptor.job_id.clone(),
                    schedule: job.descriptor.schedule.clone(),
                    mode: job.descriptor.mode,
                    active: !job.handle.is_finished(),
                    next_run: next.map(|t| t.to_rfc3339()),
                    countdown: next.map(|t| (t - now).num_milliseconds()),
                }
            })
            .collect();
        jobs.sort_by(|a, b| a.next_run.cmp(&b.next_run).then_with(|| a.job_id.cmp(&b.job_id)));
        jobs
    }

    /// 모든 작업 태스크 중단 (서버 종료 시)
    pub async fn shutdown(&self) {
        let mut registry = self.registry.write().await;
        let count = registry.live.len();
        for (_, job) in registry.live.drain() {
            job.handle.abort();
        }
        tracing::info!(count, "backup scheduler stopped");
    }
}

/// 작업 하나의 반복 실행 루프
fn spawn_job(runner: Arc<BackupRunner>, descriptor: JobDescriptor, schedule: CronSchedule) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut cursor = Local::now();
        loop {
            let Some(next) = schedule.next_after(&cursor) else {
                tracing::warn!(job_id = %descriptor.job_id, "schedule has no upcoming run");
                return;
            };

            let wait = (next - Local::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            let runner = runner.clone();
            let job = descriptor.clone();
            tokio::spawn(async move { runner.run_scheduled(&job).await });

            // 일시 중지 등으로 밀린 실행은 몰아서 하지 않음
            cursor = next.max(Local::now());
        }
    })
}
