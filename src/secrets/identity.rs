//! 머신/사용자 식별자 기반 키 유도
//!
//! 패스프레이즈: `login|machine|O2_SYSTEM|app_id`
//! - 고엔트로피 비밀은 섞지 않음 → 보안 경계는 파일 ACL + 머신 바인딩
//! - Argon2id (memory-hard) + 고정 salt

use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::Zeroize;

use crate::secrets::vault::{VaultError, KEY_LEN};

/// 애플리케이션 태그 (패스프레이즈 고정 요소)
pub const APP_TAG: &str = "O2_SYSTEM";

/// 고정 salt (Argon2는 8바이트 이상 필요)
const KDF_SALT: &[u8] = b"o2_salt_env_store";

/// Argon2id 파라미터
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// 테스트용 경량 파라미터
    #[cfg(test)]
    pub(crate) fn light() -> Self {
        Self {
            memory_kib: 256,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// 머신/사용자 식별자
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineIdentity {
    pub login: String,
    pub machine: String,
    pub app_id: String,
}

impl MachineIdentity {
    pub fn new(
        login: impl Into<String>,
        machine: impl Into<String>,
        app_id: impl Into<String>,
    ) -> Self {
        Self {
            login: login.into(),
            machine: machine.into(),
            app_id: app_id.into(),
        }
    }

    /// 현재 프로세스 환경에서 식별자 수집
    ///
    /// Windows는 USERNAME/COMPUTERNAME, 그 외는 USER/HOSTNAME을 사용합니다.
    pub fn current() -> Self {
        let login = first_env(&["USERNAME", "USER", "LOGNAME"]).unwrap_or_default();
        let machine = first_env(&["COMPUTERNAME", "HOSTNAME"])
            .or_else(read_hostname_file)
            .unwrap_or_default();
        let app_id = first_env(&["APP_ID"]).unwrap_or_else(|| "default".to_string());

        Self {
            login,
            machine,
            app_id,
        }
    }

    fn passphrase(&self) -> String {
        [
            self.login.as_str(),
            self.machine.as_str(),
            APP_TAG,
            self.app_id.as_str(),
        ]
        .join("|")
    }

    /// 32바이트 대칭키 유도
    pub fn derive_key(&self, params: KdfParams) -> Result<[u8; KEY_LEN], VaultError> {
        let argon_params = Params::new(
            params.memory_kib,
            params.iterations,
            params.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

        let mut passphrase = self.passphrase();
        let mut key = [0u8; KEY_LEN];
        let result = argon2.hash_password_into(passphrase.as_bytes(), KDF_SALT, &mut key);
        passphrase.zeroize();

        result.map_err(|e| VaultError::KeyDerivation(e.to_string()))?;
        Ok(key)
    }
}

fn first_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

#[cfg(unix)]
fn read_hostname_file() -> Option<String> {
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(not(unix))]
fn read_hostname_file() -> Option<String> {
    None
}
