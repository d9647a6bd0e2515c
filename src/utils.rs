use std::path::{Path, PathBuf};

use crate::error::{AppError, CommandResult};

/// 시스템 중요 디렉토리 접근을 차단하는 Blocklist 검증 함수
/// - canonicalize()로 경로 정규화 후, 차단 목록과 비교합니다.
/// - 복원 대상 파일은 반드시 존재해야 하므로 부모 디렉토리 대체 검사는 하지 않습니다.
pub fn validate_existing_file(path_str: &str) -> CommandResult<PathBuf> {
    if path_str.trim().is_empty() {
        return Err(AppError::InvalidRequest("file path is required".into()));
    }

    let path = Path::new(path_str);
    if !path.is_file() {
        return Err(AppError::InvalidRequest(format!(
            "backup file does not exist: {}",
            path_str
        )));
    }

    let canonical_path = path
        .canonicalize()
        .map_err(|e| AppError::InvalidRequest(format!("Invalid path: {}", e)))?;

    if is_blocked_path(&canonical_path) {
        return Err(AppError::InvalidRequest(
            "Access to system directory is blocked.".into(),
        ));
    }

    Ok(canonical_path)
}

/// 다운로드 파일명 정규화
///
/// 경로 구성요소는 버리고 basename만 사용, 확장자를 `.backup` / `.backup.enc`로 맞춤
pub fn download_file_name(requested: Option<&str>, encrypted: bool) -> String {
    let base = requested
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| Path::new(s).file_name())
        .and_then(|s| s.to_str())
        .unwrap_or("respaldo");

    // Content-Disposition 헤더에 들어가므로 따옴표/비 ASCII 문자 치환
    let base: String = base
        .chars()
        .map(|c| if (c.is_ascii_graphic() && c != '"') || c == ' ' { c } else { '_' })
        .collect();
    let base = base.as_str();

    let ext = if encrypted { ".backup.enc" } else { ".backup" };
    if base.ends_with(ext) {
        return base.to_string();
    }

    let stem = base
        .strip_suffix(".backup.enc")
        .or_else(|| base.strip_suffix(".backup"))
        .unwrap_or_else(|| match base.rfind('.') {
            Some(idx) if idx > 0 => &base[..idx],
            _ => base,
        });
    format!("{}{}", stem, ext)
}

fn is_blocked_path(path: &Path) -> bool {
    // Windows Blocklist
    #[cfg(target_os = "windows")]
    {
        let lower = path.to_string_lossy().to_lowercase();
        if lower.contains(r"c:\windows")
            || lower.contains(r"c:\program files")
            || lower.contains(r"c:\program files (x86)")
        {
            return true;
        }
    }

    // Unix/Linux/macOS Blocklist
    // /tmp, /home, /Users 는 허용
    #[cfg(not(target_os = "windows"))]
    {
        const BLOCKED: &[&str] = &[
            "/etc", "/proc", "/sys", "/dev", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot",
        ];
        if BLOCKED.iter().any(|prefix| path.starts_with(prefix)) {
            return true;
        }
    }

    false
}
