//! pg_dump / pg_restore 자식 프로세스 관리
//!
//! - 접속 정보는 argv가 아닌 libpq 환경 변수(PGHOST, PGPASSWORD 등)로 전달
//! - stderr는 줄 단위로 로그에 남기고, 실패 시 응답에 포함할 수 있도록 보관
//! - 완료되지 않은 채 drop되면 SIGTERM 전송

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::backup::mode::BackupMode;
use crate::config::DbConfig;
use crate::error::AppError;

/// 보관할 stderr 최대 크기
const STDERR_CAPTURE_LIMIT: usize = 64 * 1024;

/// `pg_dump -F c [--data-only|--schema-only]`
pub fn dump_command(pg_dump: &Path, db: &DbConfig, mode: BackupMode) -> Command {
    let mut cmd = Command::new(pg_dump);
    cmd.arg("-F").arg("c");
    if let Some(flag) = mode.dump_flag() {
        cmd.arg(flag);
    }
    cmd.envs(db.pg_env())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

/// `pg_restore --dbname <db> --clean --if-exists --no-owner --no-privileges` (stdin 입력)
pub fn restore_command(pg_restore: &Path, db: &DbConfig) -> Command {
    let mut cmd = Command::new(pg_restore);
    cmd.arg("--dbname")
        .arg(&db.database)
        .args(["--clean", "--if-exists", "--no-owner", "--no-privileges"]);
    cmd.envs(db.pg_env())
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    cmd
}

/// 종료된 프로세스 결과
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub program: String,
    pub code: Option<i32>,
    pub stderr: String,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn into_result(self) -> Result<Self, AppError> {
        if self.success() {
            Ok(self)
        } else {
            Err(AppError::SubprocessExit {
                program: self.program,
                code: self.code,
                stderr: self.stderr,
            })
        }
    }
}

/// 소유권이 명확한 자식 프로세스 핸들
pub struct ManagedChild {
    program: String,
    child: Child,
    stderr_task: Option<JoinHandle<String>>,
    finished: bool,
}

impl ManagedChild {
    pub fn spawn(program: impl Into<String>, mut cmd: Command) -> Result<Self, AppError> {
        let program = program.into();
        let mut child = cmd.spawn().map_err(|source| AppError::SubprocessSpawn {
            program: program.clone(),
            source,
        })?;

        let stderr_task = child.stderr.take().map(|stderr| {
            let label = program.clone();
            tokio::spawn(async move { drain_stderr(&label, stderr).await })
        });

        tracing::debug!(program = %program, pid = ?child.id(), "subprocess started");
        Ok(Self {
            program,
            child,
            stderr_task,
            finished: false,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// 종료 대기 후 결과 반환 (stderr 수집 완료까지 대기)
    pub async fn wait(&mut self) -> Result<ProcessOutcome, AppError> {
        let status = self.child.wait().await?;
        self.finished = true;

        let stderr = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        tracing::debug!(program = %self.program, status = %status, "subprocess exited");
        Ok(ProcessOutcome {
            program: self.program.clone(),
            code: status.code(),
            stderr,
        })
    }

    /// SIGTERM 전송 (best-effort)
    pub fn terminate(&mut self) {
        if self.finished {
            return;
        }
        if let Ok(Some(_)) = self.child.try_wait() {
            self.finished = true;
            return;
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.child.id() {
                match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    Ok(()) => tracing::info!(program = %self.program, pid, "sent SIGTERM"),
                    Err(e) => tracing::warn!(program = %self.program, pid, error = %e, "SIGTERM failed"),
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = self.child.start_kill() {
                tracing::warn!(program = %self.program, error = %e, "kill failed");
            }
        }
    }
}

/// stderr를 끝까지 읽어 로그로 남기고 앞부분을 보관
///
/// UTF-8이 아닌 출력(Latin-1 libpq 메시지 등)은 손실 변환합니다. 보관 한도를 넘어도
/// 파이프는 계속 비워서 자식이 SIGPIPE로 죽지 않게 합니다.
async fn drain_stderr<R>(program: &str, stderr: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stderr);
    let mut captured = String::new();
    let mut raw = Vec::new();

    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {
                let decoded = String::from_utf8_lossy(&raw);
                let line = decoded.trim_end_matches(['\r', '\n']);
                tracing::warn!(program, "{}", line);
                if captured.len() + line.len() < STDERR_CAPTURE_LIMIT {
                    captured.push_str(line);
                    captured.push('\n');
                }
            }
            Err(e) => {
                tracing::warn!(program, error = %e, "stderr read failed");
                break;
            }
        }
    }
    captured
}

impl Drop for ManagedChild {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(all(test, unix))]
pub(crate) mod test_support {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// 실행 가능한 가짜 스크립트 생성
    pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::test_support::write_script;
    use super::*;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;

    fn db() -> DbConfig {
        DbConfig {
            host: "db.local".into(),
            port: 5433,
            user: "o2user".into(),
            password: "hunter2".into(),
            database: "o2db".into(),
        }
    }

    #[tokio::test]
    async fn dump_gets_credentials_from_env_not_argv() {
        let dir = tempdir().unwrap();
        let fake = write_script(
            dir.path(),
            "pg_dump",
            r#"echo "args=$*"; echo "env=$PGHOST:$PGPORT:$PGUSER:$PGPASSWORD:$PGDATABASE""#,
        );

        let mut child =
            ManagedChild::spawn("pg_dump", dump_command(&fake, &db(), BackupMode::SchemaOnly))
                .unwrap();
        let mut out = String::new();
        child
            .take_stdout()
            .unwrap()
            .read_to_string(&mut out)
            .await
            .unwrap();
        let outcome = child.wait().await.unwrap();

        assert!(outcome.success());
        let args = out.lines().find(|l| l.starts_with("args=")).unwrap();
        assert_eq!(args, "args=-F c --schema-only");
        assert!(!args.contains("hunter2"));
        assert!(out.contains("env=db.local:5433:o2user:hunter2:o2db"));
    }

    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let dir = tempdir().unwrap();
        let fake = write_script(
            dir.path(),
            "pg_restore",
            "cat > /dev/null; echo 'relation \"ventas\" does not exist' >&2; exit 1",
        );

        let mut child = ManagedChild::spawn("pg_restore", restore_command(&fake, &db())).unwrap();
        drop(child.take_stdin());
        let outcome = child.wait().await.unwrap();

        assert_eq!(outcome.code, Some(1));
        match outcome.into_result() {
            Err(AppError::SubprocessExit { stderr, .. }) => {
                assert!(stderr.contains("does not exist"))
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn latin1_stderr_is_decoded_lossily_and_fully_drained() {
        let dir = tempdir().unwrap();
        let fake = write_script(
            dir.path(),
            "pg_restore",
            "cat > /dev/null; printf 'sesi\\363n finalizada\\n' >&2; \
             echo 'relation \"public.ventas\" does not exist' >&2; exit 1",
        );

        let mut child = ManagedChild::spawn("pg_restore", restore_command(&fake, &db())).unwrap();
        drop(child.take_stdin());
        let outcome = child.wait().await.unwrap();

        assert_eq!(outcome.code, Some(1));
        assert!(outcome.stderr.contains("sesi\u{FFFD}n finalizada"));
        assert!(outcome.stderr.contains("relation \"public.ventas\" does not exist"));
    }

    #[tokio::test]
    async fn stderr_past_capture_limit_does_not_kill_child() {
        let dir = tempdir().unwrap();
        let fake = write_script(
            dir.path(),
            "pg_dump",
            "i=0; while [ $i -lt 3000 ]; do \
             echo 'pg_dump: warning: 0123456789012345678901234567890123456789' >&2; \
             i=$((i+1)); done; exit 3",
        );

        let mut child =
            ManagedChild::spawn("pg_dump", dump_command(&fake, &db(), BackupMode::Full)).unwrap();
        let outcome = child.wait().await.unwrap();

        assert_eq!(outcome.code, Some(3));
        assert!(outcome.stderr.len() <= STDERR_CAPTURE_LIMIT);
        assert!(outcome.stderr.starts_with("pg_dump: warning:"));
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let err = ManagedChild::spawn(
            "pg_dump",
            dump_command(Path::new("/nonexistent/pg_dump"), &db(), BackupMode::Full),
        )
        .err()
        .unwrap();
        assert!(matches!(err, AppError::SubprocessSpawn { .. }));
    }

    #[tokio::test]
    async fn dropping_a_running_child_sends_sigterm() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("terminated");
        let fake = write_script(
            dir.path(),
            "pg_dump",
            &format!(
                "trap 'touch {}; exit 143' TERM; while true; do sleep 0.05; done",
                marker.display()
            ),
        );

        let child =
            ManagedChild::spawn("pg_dump", dump_command(&fake, &db(), BackupMode::Full)).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        drop(child);

        for _ in 0..40 {
            if marker.exists() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        panic!("child did not receive SIGTERM");
    }
}
