//! 백업/복원 실행
//!
//! - 예약 실행: pg_dump stdout → (암호화) → `backup_<mode>_<timestamp>.backup[.enc]`
//! - 즉시 다운로드: pg_dump stdout → (암호화) → HTTP 응답 바디 스트림
//! - 복원: 파일 → (복호화) → pg_restore stdin

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::ChildStdout;

use crate::backup::cipher::{BackupDecryptor, BackupEncryptor, DUMP_SIGNATURE};
use crate::backup::jobs::JobDescriptor;
use crate::backup::mode::BackupMode;
use crate::backup::process::{dump_command, restore_command, ManagedChild};
use crate::backup::retention;
use crate::config::{AppConfig, DbConfig};
use crate::error::AppError;

const CHUNK_SIZE: usize = 64 * 1024;

/// stderr에 이 문구가 있으면 구조/데이터 불일치로 분류
const STRUCTURE_MARKERS: &[&str] = &["does not exist", "relation", "schema"];

/// 복원 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// 비밀번호와 파일 구조 확인만 수행
    Verified,
    Restored,
}

/// 백업 실행기
#[derive(Debug, Clone)]
pub struct BackupRunner {
    pg_dump: PathBuf,
    pg_restore: PathBuf,
    backup_dir: PathBuf,
    retention_days: u64,
    db: DbConfig,
}

impl BackupRunner {
    pub fn new(config: &AppConfig, db: DbConfig) -> Self {
        Self {
            pg_dump: config.pg_dump_path.clone(),
            pg_restore: config.pg_restore_path.clone(),
            backup_dir: config.backup_dir.clone(),
            retention_days: config.retention_days,
            db,
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// `backup_<mode>_<YYYY-MM-DDTHH-MM-SS-mmm>_<suffix>.backup[.enc]` (UTC)
    ///
    /// 같은 초에 겹쳐 실행되는 tick끼리 이름이 겹치지 않도록 밀리초와 임의 접미사를 붙입니다.
    pub fn artifact_name(
        mode: BackupMode,
        encrypted: bool,
        at: chrono::DateTime<chrono::Utc>,
        suffix: &str,
    ) -> String {
        format!(
            "backup_{}_{}_{}.backup{}",
            mode,
            at.format("%Y-%m-%dT%H-%M-%S-%3f"),
            suffix,
            if encrypted { ".enc" } else { "" }
        )
    }

    /// 보관 기간 경과 파일 정리
    pub fn clean_old_backups(&self) -> usize {
        retention::clean_old_backups(&self.backup_dir, self.retention_days)
    }

    /// 예약 tick: 실패는 로그만 남기고 다음 실행에 영향 없음
    pub async fn run_scheduled(&self, job: &JobDescriptor) {
        tracing::info!(job_id = %job.job_id, mode = %job.mode, "scheduled backup started");

        match self.run_to_file(job.mode, job.password.as_deref()).await {
            Ok(path) => {
                tracing::info!(job_id = %job.job_id, file = %path.display(), "scheduled backup written");
                let removed = self.clean_old_backups();
                if removed > 0 {
                    tracing::info!(job_id = %job.job_id, removed, "retention cleanup finished");
                }
            }
            Err(e) => {
                tracing::error!(job_id = %job.job_id, error = %e, "scheduled backup failed");
            }
        }
    }

    /// 덤프를 백업 디렉토리에 파일로 기록
    ///
    /// 실패 시 불완전한 파일은 삭제합니다.
    pub async fn run_to_file(&self, mode: BackupMode, password: Option<&str>) -> Result<PathBuf, AppError> {
        let password = password.filter(|p| !p.is_empty());
        tokio::fs::create_dir_all(&self.backup_dir).await?;

        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let path = self.backup_dir.join(Self::artifact_name(
            mode,
            password.is_some(),
            chrono::Utc::now(),
            &suffix[..8],
        ));

        // 이미 있는 파일은 건드리지 않음 (실패 시 삭제도 이 실행이 만든 파일만)
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        let result = self.dump_into(file, mode, password).await;
        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(file = %path.display(), error = %e, "cannot remove partial backup");
                }
            }
        }
        result.map(|_| path)
    }

    async fn dump_into(&self, mut file: File, mode: BackupMode, password: Option<&str>) -> Result<(), AppError> {
        let mut child = ManagedChild::spawn("pg_dump", dump_command(&self.pg_dump, &self.db, mode))?;
        let mut stdout = child
            .take_stdout()
            .ok_or_else(|| AppError::Internal("pg_dump stdout was not captured".into()))?;

        let mut encryptor = password.map(BackupEncryptor::new);
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            let n = stdout.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            match encryptor.as_mut() {
                Some(enc) => file.write_all(&enc.update(&buf[..n])).await?,
                None => file.write_all(&buf[..n]).await?,
            }
        }

        let outcome = child.wait().await?;
        outcome.into_result()?;

        if let Some(enc) = encryptor {
            file.write_all(&enc.finish()).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    /// 즉시 백업 스트림
    ///
    /// 첫 출력 전에 pg_dump가 실패하면 stderr를 담은 `SubprocessExit`을 반환합니다.
    /// 스트리밍 도중 실패하면 스트림이 에러로 끝나 응답 바디가 중단됩니다.
    /// 스트림이 drop되면(클라이언트 연결 종료) pg_dump에 SIGTERM이 전달됩니다.
    pub async fn open_stream(
        &self,
        mode: BackupMode,
        password: Option<&str>,
    ) -> Result<BoxStream<'static, io::Result<Bytes>>, AppError> {
        let password = password.filter(|p| !p.is_empty());
        let mut child = ManagedChild::spawn("pg_dump", dump_command(&self.pg_dump, &self.db, mode))?;
        let mut stdout = child
            .take_stdout()
            .ok_or_else(|| AppError::Internal("pg_dump stdout was not captured".into()))?;

        let mut first = vec![0u8; CHUNK_SIZE];
        let n = stdout.read(&mut first).await?;
        if n == 0 {
            child.wait().await?.into_result()?;
        }
        first.truncate(n);

        let state = DumpStream {
            child,
            stdout,
            encryptor: password.map(BackupEncryptor::new),
            pending: Some(first),
            finished: false,
        };
        Ok(stream::try_unfold(state, DumpStream::next_chunk).boxed())
    }

    /// 복원 또는 검증
    pub async fn restore(
        &self,
        path: &Path,
        password: Option<&str>,
        verify_only: bool,
    ) -> Result<RestoreOutcome, AppError> {
        let password = password.filter(|p| !p.is_empty());

        if verify_only {
            decode_artifact(path, password, &mut tokio::io::sink()).await?;
            tracing::info!(file = %path.display(), "backup verified");
            return Ok(RestoreOutcome::Verified);
        }

        // 잘못된 비밀번호로 DB를 건드리지 않도록 먼저 검증
        if password.is_some() {
            decode_artifact(path, password, &mut tokio::io::sink()).await?;
        }

        let mut child = ManagedChild::spawn("pg_restore", restore_command(&self.pg_restore, &self.db))?;
        let mut stdin = child
            .take_stdin()
            .ok_or_else(|| AppError::Internal("pg_restore stdin was not captured".into()))?;

        let piped = decode_artifact(path, password, &mut stdin).await;
        let closed = stdin.shutdown().await;
        drop(stdin);

        let outcome = child.wait().await?;
        if let Err(e @ (AppError::CorruptArtifact(_) | AppError::PasswordMismatch)) = piped {
            return Err(e);
        }
        if !outcome.success() {
            return Err(classify_restore_failure(outcome.program, outcome.code, outcome.stderr));
        }
        piped?;
        closed?;

        tracing::info!(file = %path.display(), "restore completed");
        Ok(RestoreOutcome::Restored)
    }
}

fn classify_restore_failure(program: String, code: Option<i32>, stderr: String) -> AppError {
    if STRUCTURE_MARKERS.iter().any(|marker| stderr.contains(marker)) {
        AppError::RestoreStructureMismatch(stderr)
    } else {
        AppError::SubprocessExit { program, code, stderr }
    }
}

/// 아티팩트를 읽어(필요 시 복호화) sink에 기록
///
/// 덤프 시그니처(`PGDMP`)를 확인한 뒤에만 sink로 내보냅니다.
/// 비밀번호가 있을 때 시그니처가 맞지 않으면 `PasswordMismatch`입니다.
async fn decode_artifact<W>(path: &Path, password: Option<&str>, sink: &mut W) -> Result<u64, AppError>
where
    W: AsyncWrite + Unpin,
{
    let file = File::open(path).await?;
    let mut gate = SignatureGate::new(password.is_some());
    let mut decryptor = password.map(BackupDecryptor::new);

    let written = pump(file, &mut decryptor, &mut gate, sink).await?;
    let tail = match decryptor {
        Some(dec) => dec.finish()?,
        None => Vec::new(),
    };
    let tail = gate.accept(tail)?;
    gate.finish()?;
    sink.write_all(&tail).await?;
    sink.flush().await?;

    Ok(written + tail.len() as u64)
}

async fn pump<R, W>(
    mut reader: R,
    decryptor: &mut Option<BackupDecryptor>,
    gate: &mut SignatureGate,
    sink: &mut W,
) -> Result<u64, AppError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(written);
        }
        let plain = match decryptor.as_mut() {
            Some(dec) => dec.update(&buf[..n]),
            None => buf[..n].to_vec(),
        };
        let out = gate.accept(plain)?;
        if !out.is_empty() {
            sink.write_all(&out).await?;
            written += out.len() as u64;
        }
    }
}

/// 선두 바이트가 덤프 시그니처인지 확인될 때까지 출력을 보류
struct SignatureGate {
    encrypted: bool,
    head: Vec<u8>,
    confirmed: bool,
}

impl SignatureGate {
    fn new(encrypted: bool) -> Self {
        Self {
            encrypted,
            head: Vec::with_capacity(DUMP_SIGNATURE.len()),
            confirmed: false,
        }
    }

    fn mismatch(&self) -> AppError {
        if self.encrypted {
            AppError::PasswordMismatch
        } else {
            AppError::CorruptArtifact("not a pg_dump custom-format archive".into())
        }
    }

    fn accept(&mut self, data: Vec<u8>) -> Result<Vec<u8>, AppError> {
        if self.confirmed {
            return Ok(data);
        }
        self.head.extend_from_slice(&data);
        if self.head.len() < DUMP_SIGNATURE.len() {
            return Ok(Vec::new());
        }
        if !self.head.starts_with(DUMP_SIGNATURE) {
            return Err(self.mismatch());
        }
        self.confirmed = true;
        Ok(std::mem::take(&mut self.head))
    }

    fn finish(&self) -> Result<(), AppError> {
        if self.confirmed {
            Ok(())
        } else {
            Err(self.mismatch())
        }
    }
}

/// HTTP 응답용 덤프 스트림 상태
struct DumpStream {
    child: ManagedChild,
    stdout: ChildStdout,
    encryptor: Option<BackupEncryptor>,
    pending: Option<Vec<u8>>,
    finished: bool,
}

impl DumpStream {
    fn encode(&mut self, data: Vec<u8>) -> Bytes {
        match self.encryptor.as_mut() {
            Some(enc) => Bytes::from(enc.update(&data)),
            None => Bytes::from(data),
        }
    }

    async fn next_chunk(mut self) -> io::Result<Option<(Bytes, Self)>> {
        loop {
            if self.finished {
                return Ok(None);
            }

            let data = match self.pending.take() {
                Some(first) => first,
                None => {
                    let mut buf = vec![0u8; CHUNK_SIZE];
                    let n = self.stdout.read(&mut buf).await?;
                    buf.truncate(n);
                    buf
                }
            };

            if data.is_empty() {
                let outcome = self.child.wait().await.map_err(io::Error::other)?;
                if !outcome.success() {
                    tracing::error!(code = ?outcome.code, stderr = %outcome.stderr, "pg_dump failed while streaming");
                    return Err(io::Error::other(format!(
                        "pg_dump exited with status {:?}",
                        outcome.code
                    )));
                }

                self.finished = true;
                tracing::info!("on-demand backup stream completed");
                let tail = self.encryptor.take().map(BackupEncryptor::finish).unwrap_or_default();
                if tail.is_empty() {
                    return Ok(None);
                }
                return Ok(Some((Bytes::from(tail), self)));
            }

            let out = self.encode(data);
            if !out.is_empty() {
                return Ok(Some((out, self)));
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::backup::process::test_support::write_script;
    use tempfile::{tempdir, TempDir};

    const FAKE_DUMP: &str = "PGDMP fake custom-format archive body";

    struct Fixture {
        dir: TempDir,
        runner: BackupRunner,
    }

    fn fixture(dump_body: &str, restore_body: &str) -> Fixture {
        let dir = tempdir().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();

        let mut config = AppConfig::with_data_dir(dir.path());
        config.pg_dump_path = write_script(&bin, "pg_dump", dump_body);
        config.pg_restore_path = write_script(&bin, "pg_restore", restore_body);

        let runner = BackupRunner::new(
            &config,
            DbConfig::from_url("postgresql://o2user:pw@localhost:5432/o2db").unwrap(),
        );
        Fixture { dir, runner }
    }

    fn ok_dump() -> String {
        format!("printf '{}'", FAKE_DUMP)
    }

    fn capture_restore(dir: &Path) -> String {
        format!("cat > {}/restored.bin", dir.display())
    }

    async fn collect(stream: BoxStream<'static, io::Result<Bytes>>) -> io::Result<Vec<u8>> {
        let chunks: Vec<io::Result<Bytes>> = stream.collect().await;
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    #[test]
    fn artifact_names_carry_mode_and_encryption() {
        let at = chrono::DateTime::parse_from_rfc3339("2026-02-03T04:05:06Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        assert_eq!(
            BackupRunner::artifact_name(BackupMode::DataOnly, true, at, "0a1b2c3d"),
            "backup_data-only_2026-02-03T04-05-06-000_0a1b2c3d.backup.enc"
        );
        assert_eq!(
            BackupRunner::artifact_name(BackupMode::Full, false, at, "ffffffff"),
            "backup_full_2026-02-03T04-05-06-000_ffffffff.backup"
        );
    }

    #[tokio::test]
    async fn overlapping_runs_keep_each_others_artifacts() {
        let fx = fixture(&ok_dump(), "true");

        let bin = fx.dir.path().join("bin-failing");
        std::fs::create_dir_all(&bin).unwrap();
        let mut config = AppConfig::with_data_dir(fx.dir.path());
        config.pg_dump_path = write_script(&bin, "pg_dump", "printf 'PGDMP partial'; exit 1");
        let failing = BackupRunner::new(
            &config,
            DbConfig::from_url("postgresql://o2user:pw@localhost:5432/o2db").unwrap(),
        );
        assert_eq!(failing.backup_dir(), fx.runner.backup_dir());

        let (ok, again, bad) = tokio::join!(
            fx.runner.run_to_file(BackupMode::Full, None),
            fx.runner.run_to_file(BackupMode::Full, None),
            failing.run_to_file(BackupMode::Full, None),
        );
        let ok = ok.unwrap();
        let again = again.unwrap();
        assert!(bad.is_err());

        assert_ne!(ok, again);
        assert_eq!(std::fs::read(&ok).unwrap(), FAKE_DUMP.as_bytes());
        assert_eq!(std::fs::read(&again).unwrap(), FAKE_DUMP.as_bytes());
        assert_eq!(std::fs::read_dir(fx.runner.backup_dir()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn password_protected_file_has_iv_prefix_and_round_trips() {
        let fx = fixture(&ok_dump(), "cat > /dev/null");
        let path = fx.runner.run_to_file(BackupMode::Full, Some("s3cr3t")).await.unwrap();

        assert!(path.to_string_lossy().ends_with(".backup.enc"));
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!((bytes.len() - 16) % 16, 0);
        assert!(!bytes.windows(5).any(|w| w == DUMP_SIGNATURE));

        let mut plain = Vec::new();
        decode_artifact(&path, Some("s3cr3t"), &mut plain).await.unwrap();
        assert_eq!(plain, FAKE_DUMP.as_bytes());
    }

    #[tokio::test]
    async fn failed_dump_leaves_no_artifact() {
        let fx = fixture("echo 'connection refused' >&2; exit 1", "true");
        let err = fx.runner.run_to_file(BackupMode::Full, None).await.unwrap_err();

        assert!(matches!(err, AppError::SubprocessExit { .. }));
        let left: Vec<_> = std::fs::read_dir(fx.runner.backup_dir()).unwrap().collect();
        assert!(left.is_empty());
    }

    #[tokio::test]
    async fn verify_only_rejects_wrong_password() {
        let fx = fixture(&ok_dump(), "true");
        let path = fx.runner.run_to_file(BackupMode::Full, Some("right")).await.unwrap();

        let err = fx.runner.restore(&path, Some("wrong"), true).await.unwrap_err();
        assert!(matches!(err, AppError::PasswordMismatch | AppError::CorruptArtifact(_)));

        let ok = fx.runner.restore(&path, Some("right"), true).await.unwrap();
        assert_eq!(ok, RestoreOutcome::Verified);
    }

    #[tokio::test]
    async fn restore_pipes_decrypted_dump_into_pg_restore() {
        let dir = tempdir().unwrap();
        let fx = fixture(&ok_dump(), &capture_restore(dir.path()));
        let path = fx.runner.run_to_file(BackupMode::Full, Some("pw")).await.unwrap();

        let outcome = fx.runner.restore(&path, Some("pw"), false).await.unwrap();
        assert_eq!(outcome, RestoreOutcome::Restored);
        assert_eq!(
            std::fs::read(dir.path().join("restored.bin")).unwrap(),
            FAKE_DUMP.as_bytes()
        );
    }

    #[tokio::test]
    async fn wrong_password_never_reaches_pg_restore() {
        let dir = tempdir().unwrap();
        let fx = fixture(&ok_dump(), &capture_restore(dir.path()));
        let path = fx.runner.run_to_file(BackupMode::Full, Some("pw")).await.unwrap();

        assert!(fx.runner.restore(&path, Some("nope"), false).await.is_err());
        assert!(!dir.path().join("restored.bin").exists());
    }

    #[tokio::test]
    async fn missing_relation_is_structure_mismatch() {
        let fx = fixture(
            &ok_dump(),
            "cat > /dev/null; echo 'pg_restore: error: relation \"public.ventas\" does not exist' >&2; exit 1",
        );
        let path = fx.runner.run_to_file(BackupMode::DataOnly, None).await.unwrap();

        let err = fx.runner.restore(&path, None, false).await.unwrap_err();
        assert!(matches!(err, AppError::RestoreStructureMismatch(_)));
    }

    #[tokio::test]
    async fn non_utf8_stderr_still_classified_as_structure_mismatch() {
        let fx = fixture(
            &ok_dump(),
            "cat > /dev/null; printf 'pg_restore: sesi\\363n\\n' >&2; \
             echo 'pg_restore: error: relation \"public.ventas\" does not exist' >&2; exit 1",
        );
        let path = fx.runner.run_to_file(BackupMode::DataOnly, None).await.unwrap();

        match fx.runner.restore(&path, None, false).await {
            Err(AppError::RestoreStructureMismatch(stderr)) => {
                assert!(stderr.contains("public.ventas"))
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn other_restore_failures_keep_stderr() {
        let fx = fixture(&ok_dump(), "cat > /dev/null; echo 'could not connect' >&2; exit 1");
        let path = fx.runner.run_to_file(BackupMode::Full, None).await.unwrap();

        match fx.runner.restore(&path, None, false).await {
            Err(AppError::SubprocessExit { stderr, .. }) => assert!(stderr.contains("could not connect")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn plain_file_without_signature_is_corrupt() {
        let fx = fixture(&ok_dump(), "true");
        let path = fx.dir.path().join("notes.backup");
        std::fs::write(&path, "SELECT 1;").unwrap();

        let err = fx.runner.restore(&path, None, true).await.unwrap_err();
        assert!(matches!(err, AppError::CorruptArtifact(_)));
    }

    #[tokio::test]
    async fn stream_encrypts_on_the_fly() {
        let fx = fixture(&ok_dump(), "true");
        let stream = fx.runner.open_stream(BackupMode::Full, Some("pw")).await.unwrap();
        let artifact = collect(stream).await.unwrap();

        let path = fx.dir.path().join("download.backup.enc");
        std::fs::write(&path, &artifact).unwrap();
        let mut plain = Vec::new();
        decode_artifact(&path, Some("pw"), &mut plain).await.unwrap();
        assert_eq!(plain, FAKE_DUMP.as_bytes());
    }

    #[tokio::test]
    async fn stream_reports_early_failure_with_stderr() {
        let fx = fixture("echo 'FATAL: password authentication failed' >&2; exit 1", "true");
        match fx.runner.open_stream(BackupMode::Full, None).await {
            Err(AppError::SubprocessExit { stderr, .. }) => {
                assert!(stderr.contains("password authentication failed"))
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("stream should not start"),
        }
    }

    #[tokio::test]
    async fn late_failure_aborts_the_stream() {
        let fx = fixture(&format!("{}; exit 2", ok_dump()), "true");
        let stream = fx.runner.open_stream(BackupMode::Full, None).await.unwrap();
        assert!(collect(stream).await.is_err());
    }
}
