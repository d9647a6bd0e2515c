//! JWT 서명 시크릿 2세대 관리 (current / previous)
//!
//! 회전 직후에도 직전 세대로 서명된 토큰을 받아들여 진행 중인 세션이
//! 끊기지 않도록 합니다.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::secrets::envfile::EnvMap;

pub const JWT_SECRET_CURRENT: &str = "JWT_SECRET_CURRENT";
pub const JWT_SECRET_PREVIOUS: &str = "JWT_SECRET_PREVIOUS";
pub const JWT_SECRET_VERSION: &str = "JWT_SECRET_VERSION";

/// 새 시크릿의 원시 바이트 길이 (base64 인코딩 전)
const SECRET_BYTES: usize = 64;

/// 토큰 클레임
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: i64,
    pub username: String,
    #[serde(default)]
    pub role_id: Option<i64>,
    #[serde(default)]
    pub role_name: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub exp: u64,
}

/// 서명 시크릿 세트
#[derive(Clone)]
pub struct JwtSecrets {
    pub current: String,
    pub previous: Option<String>,
    pub version: u64,
}

impl std::fmt::Debug for JwtSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSecrets")
            .field("current", &"<redacted>")
            .field("previous", &self.previous.as_ref().map(|_| "<redacted>"))
            .field("version", &self.version)
            .finish()
    }
}

/// CSPRNG 기반 새 시크릿 (64 bytes → base64)
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill(&mut bytes[..]);
    BASE64.encode(bytes)
}

impl JwtSecrets {
    fn build(
        current: Option<String>,
        previous: Option<String>,
        version: Option<String>,
    ) -> Result<Self, AppError> {
        let current = current
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Config(format!("{} is not defined", JWT_SECRET_CURRENT)))?;
        let previous = previous.filter(|v| !v.is_empty());
        let version = version
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(1);

        Ok(Self {
            current,
            previous,
            version,
        })
    }

    /// 복호화된 시크릿 레코드에서 읽기
    pub fn from_map(map: &EnvMap) -> Result<Self, AppError> {
        Self::build(
            map.get(JWT_SECRET_CURRENT).cloned(),
            map.get(JWT_SECRET_PREVIOUS).cloned(),
            map.get(JWT_SECRET_VERSION).cloned(),
        )
    }

    /// 프로세스 환경에서 읽기
    pub fn from_env() -> Result<Self, AppError> {
        Self::build(
            std::env::var(JWT_SECRET_CURRENT).ok(),
            std::env::var(JWT_SECRET_PREVIOUS).ok(),
            std::env::var(JWT_SECRET_VERSION).ok(),
        )
    }

    /// 세대 교체: previous ← current, 새 current 생성, version + 1
    pub fn rotated(&self) -> Self {
        Self {
            current: generate_secret(),
            previous: Some(self.current.clone()),
            version: self.version + 1,
        }
    }

    /// 레코드에 반영
    pub fn write_to(&self, map: &mut EnvMap) {
        map.insert(JWT_SECRET_CURRENT.to_string(), self.current.clone());
        map.insert(
            JWT_SECRET_PREVIOUS.to_string(),
            self.previous.clone().unwrap_or_default(),
        );
        map.insert(JWT_SECRET_VERSION.to_string(), self.version.to_string());
    }

    /// current로 서명
    pub fn issue(&self, claims: &Claims) -> Result<String, AppError> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(self.current.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("token signing failed: {}", e)))
    }

    /// current → previous 순서로 검증
    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        let validation = Validation::new(Algorithm::HS256);

        let current = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.current.as_bytes()),
            &validation,
        );
        let err = match current {
            Ok(data) => return Ok(data.claims),
            Err(e) => e,
        };

        if let Some(previous) = &self.previous {
            if let Ok(data) = decode::<Claims>(
                token,
                &DecodingKey::from_secret(previous.as_bytes()),
                &validation,
            ) {
                tracing::debug!(version = self.version, "token accepted with previous secret");
                return Ok(data.claims);
            }
        }

        Err(AppError::Unauthorized(err.to_string()))
    }
}
