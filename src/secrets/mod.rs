//! Secret-at-rest 모듈
//!
//! 머신/사용자에 바인딩된 키로 `.env.production.enc`를 암호화하고,
//! JWT 서명 시크릿의 2세대 회전을 관리합니다.

pub mod envfile;
pub mod identity;
pub mod manager;
pub mod rotation;
pub mod vault;

pub use envfile::EnvMap;
pub use identity::{KdfParams, MachineIdentity};
pub use manager::EnvStore;
pub use rotation::{Claims, JwtSecrets};
pub use vault::{DecryptionError, VaultError};
