use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// 백업 범위
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupMode {
    #[default]
    Full,
    DataOnly,
    SchemaOnly,
}

impl BackupMode {
    /// 요청 값 해석 (없으면 full, `data`/`schema` 별칭 허용)
    pub fn parse(raw: Option<&str>) -> Result<Self, AppError> {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(Self::Full);
        };

        match raw.to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "data" | "data-only" => Ok(Self::DataOnly),
            "schema" | "schema-only" => Ok(Self::SchemaOnly),
            _ => Err(AppError::InvalidMode(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::DataOnly => "data-only",
            Self::SchemaOnly => "schema-only",
        }
    }

    /// pg_dump 범위 플래그
    pub fn dump_flag(&self) -> Option<&'static str> {
        match self {
            Self::Full => None,
            Self::DataOnly => Some("--data-only"),
            Self::SchemaOnly => Some("--schema-only"),
        }
    }
}

impl std::fmt::Display for BackupMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
