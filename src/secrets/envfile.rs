//! `KEY=VALUE` 라인 포맷 파싱/직렬화 및 프로세스 환경 적용

use std::collections::BTreeMap;

use crate::error::AppError;

/// 시크릿 레코드 (키 정렬 유지 → 직렬화 결과가 결정적)
pub type EnvMap = BTreeMap<String, String>;

pub fn is_valid_env_key(key: &str) -> bool {
    if key.is_empty() {
        return false;
    }
    // 관례적으로 ENV 키는 A-Z0-9_ 로 제한
    key.chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// 평문 텍스트를 키/값 맵으로 파싱
///
/// - 빈 줄, `#` 주석 줄은 건너뜀
/// - 첫 번째 `=` 기준으로 분리, 키/값 모두 trim
/// - `=` 가 없는 줄은 무시
pub fn parse(text: &str) -> EnvMap {
    let mut map = EnvMap::new();

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        map.insert(key.to_string(), v.trim().to_string());
    }

    map
}

/// 키/값 맵을 `KEY=VALUE` 라인으로 직렬화
pub fn serialize(map: &EnvMap) -> Result<String, AppError> {
    let mut out = String::new();
    for (key, value) in map {
        if !is_valid_env_key(key) {
            return Err(AppError::Config(format!("invalid env key: {:?}", key)));
        }
        if value.contains('\n') || value.contains('\r') {
            return Err(AppError::Config(format!(
                "value for {} must be a single line",
                key
            )));
        }
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    Ok(out)
}

/// 프로세스 환경에 적용 (이미 설정된 변수는 덮어쓰지 않음)
///
/// 반환값: 새로 설정된 변수 수
pub fn apply_to_env(map: &EnvMap) -> usize {
    let mut applied = 0usize;
    for (key, value) in map {
        if std::env::var_os(key).is_some() {
            continue;
        }
        std::env::set_var(key, value);
        applied += 1;
    }
    applied
}
