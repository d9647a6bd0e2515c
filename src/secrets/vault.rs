//! 암호화된 env 파일 I/O 및 암호화/복호화
//!
//! 파일 포맷:
//! - nonce: 12 bytes (ChaCha20-Poly1305)
//! - tag: 16 bytes (Poly1305 인증 태그)
//! - ciphertext: 나머지 전부
//!
//! 태그 검증에 실패하면 평문을 절대 반환하지 않습니다 (fail closed).

use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::rngs::OsRng;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// 대칭키 길이 (256-bit)
pub const KEY_LEN: usize = 32;

/// Nonce 길이
pub const NONCE_LEN: usize = 12;

/// 인증 태그 길이
pub const TAG_LEN: usize = 16;

/// 헤더 길이 (nonce + tag)
pub const HEADER_LEN: usize = NONCE_LEN + TAG_LEN;

/// 복호화 실패 분류
#[derive(Debug, thiserror::Error)]
pub enum DecryptionError {
    #[error("Encrypted env file is corrupt: {0}")]
    Corrupt(String),

    #[error(
        "Encrypted env file could not be authenticated: it belongs to a different machine or user, \
         or it was modified. Reinstall the configuration on this machine."
    )]
    IdentityMismatch,
}

/// Vault 오류
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Decryption(#[from] DecryptionError),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
}

/// `<path>.enc` 경로 생성
pub fn encrypted_path(plain_path: &Path) -> PathBuf {
    let mut name = plain_path.as_os_str().to_owned();
    name.push(".enc");
    PathBuf::from(name)
}

/// 평문을 `nonce || tag || ciphertext` 형태로 암호화
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
    let cipher = ChaCha20Poly1305::new(key.into());
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);

    // aead 결과 = ciphertext || tag
    let mut ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;
    let tag = ciphertext.split_off(ciphertext.len() - TAG_LEN);

    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&tag);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// `nonce || tag || ciphertext` 버퍼를 복호화
pub fn open(key: &[u8; KEY_LEN], bytes: &[u8]) -> Result<Vec<u8>, DecryptionError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecryptionError::Corrupt(format!(
            "expected at least {} bytes, found {}",
            HEADER_LEN,
            bytes.len()
        )));
    }

    let (nonce, rest) = bytes.split_at(NONCE_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);

    let mut combined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);

    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(Nonce::from_slice(nonce), combined.as_ref())
        .map_err(|_| DecryptionError::IdentityMismatch)
}

/// 암호화 결과를 원자적으로 기록 (임시 파일 → rename)
pub fn write_sealed(
    enc_path: &Path,
    key: &[u8; KEY_LEN],
    plaintext: &[u8],
) -> Result<(), VaultError> {
    let sealed = seal(key, plaintext)?;

    if let Some(parent) = enc_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut tmp_name = enc_path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut file = create_private(&tmp_path)?;
    file.write_all(&sealed)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, enc_path)?;
    Ok(())
}

/// 암호화 파일을 읽고 복호화
pub fn read_sealed(enc_path: &Path, key: &[u8; KEY_LEN]) -> Result<Vec<u8>, VaultError> {
    let bytes = fs::read(enc_path)?;
    Ok(open(key, &bytes)?)
}

/// 평문 파일을 `<path>.enc`로 암호화하고 평문 원본을 삭제
pub fn encrypt_file(plain_path: &Path, key: &[u8; KEY_LEN]) -> Result<PathBuf, VaultError> {
    let plaintext = fs::read(plain_path)?;
    let enc_path = encrypted_path(plain_path);
    write_sealed(&enc_path, key, &plaintext)?;
    fs::remove_file(plain_path)?;
    Ok(enc_path)
}

#[cfg(unix)]
fn create_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> std::io::Result<fs::File> {
    fs::File::create(path)
}
