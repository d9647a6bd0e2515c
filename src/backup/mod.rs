//! 백업/복원 오케스트레이션
//!
//! - `mode`: 백업 범위 (full / data-only / schema-only)
//! - `cipher`: `.backup.enc` 스트림 암호화
//! - `process`: pg_dump / pg_restore 자식 프로세스
//! - `runner`: 덤프/복원 실행
//! - `schedule`, `scheduler`, `jobs`: cron 예약과 영속화
//! - `retention`: 보관 기간 정리

pub mod cipher;
pub mod jobs;
pub mod mode;
pub mod process;
pub mod retention;
pub mod runner;
pub mod schedule;
pub mod scheduler;

pub use jobs::{JobDescriptor, JobStore, StoredJob};
pub use mode::BackupMode;
pub use runner::{BackupRunner, RestoreOutcome};
pub use scheduler::{BackupScheduler, ScheduledJobInfo};
