//! 백업 아티팩트 스트림 암호화
//!
//! 포맷: `[16-byte IV][AES-256-CBC ciphertext, PKCS7]`
//! - 키: `sha256(password)`
//! - 인증 태그가 없으므로 잘못된 비밀번호는 패딩 검사와 덤프 시그니처로 판별합니다.
//!
//! 기존에 생성된 `.backup.enc` 파일과의 호환을 위해 이 포맷을 유지합니다.

use aes::cipher::{generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::AppError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// IV 길이 (파일 선두)
pub const NONCE_LEN: usize = 16;

const BLOCK_LEN: usize = 16;

/// pg_dump custom format 시그니처
pub const DUMP_SIGNATURE: &[u8] = b"PGDMP";

fn derive_key(password: &str) -> GenericArray<u8, aes::cipher::consts::U32> {
    Sha256::digest(password.as_bytes())
}

/// 스트리밍 암호화기
///
/// 첫 출력에 IV가 붙습니다. 마지막에 반드시 `finish`를 호출해야 합니다.
pub struct BackupEncryptor {
    cipher: Aes256CbcEnc,
    iv: [u8; NONCE_LEN],
    header_written: bool,
    pending: Vec<u8>,
}

impl BackupEncryptor {
    pub fn new(password: &str) -> Self {
        let mut iv = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut iv);
        Self::with_iv(password, iv)
    }

    pub fn with_iv(password: &str, iv: [u8; NONCE_LEN]) -> Self {
        let key = derive_key(password);
        Self {
            cipher: Aes256CbcEnc::new(&key, GenericArray::from_slice(&iv)),
            iv,
            header_written: false,
            pending: Vec::with_capacity(BLOCK_LEN),
        }
    }

    fn take_header(&mut self, out: &mut Vec<u8>) {
        if !self.header_written {
            out.extend_from_slice(&self.iv);
            self.header_written = true;
        }
    }

    /// 완성된 블록만 암호화하여 반환 (나머지는 다음 호출까지 보류)
    pub fn update(&mut self, input: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LEN + self.pending.len() + input.len());
        self.take_header(&mut out);

        self.pending.extend_from_slice(input);
        let full = self.pending.len() - self.pending.len() % BLOCK_LEN;
        let start = out.len();
        out.extend(self.pending.drain(..full));

        for block in out[start..].chunks_exact_mut(BLOCK_LEN) {
            self.cipher
                .encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        out
    }

    /// PKCS7 패딩 블록 추가
    pub fn finish(mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LEN + BLOCK_LEN);
        self.take_header(&mut out);

        let pad = BLOCK_LEN - self.pending.len();
        let mut last = std::mem::take(&mut self.pending);
        last.resize(BLOCK_LEN, pad as u8);
        self.cipher
            .encrypt_block_mut(GenericArray::from_mut_slice(&mut last));

        out.extend_from_slice(&last);
        out
    }
}

/// 스트리밍 복호화기
///
/// 패딩을 포함한 마지막 블록은 `finish`까지 보류합니다.
pub struct BackupDecryptor {
    key: GenericArray<u8, aes::cipher::consts::U32>,
    cipher: Option<Aes256CbcDec>,
    iv: Vec<u8>,
    pending: Vec<u8>,
}

impl BackupDecryptor {
    pub fn new(password: &str) -> Self {
        Self {
            key: derive_key(password),
            cipher: None,
            iv: Vec::with_capacity(NONCE_LEN),
            pending: Vec::new(),
        }
    }

    pub fn update(&mut self, mut input: &[u8]) -> Vec<u8> {
        if self.cipher.is_none() {
            let take = (NONCE_LEN - self.iv.len()).min(input.len());
            self.iv.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.iv.len() < NONCE_LEN {
                return Vec::new();
            }
            self.cipher = Some(Aes256CbcDec::new(
                &self.key,
                GenericArray::from_slice(&self.iv),
            ));
        }
        let Some(cipher) = self.cipher.as_mut() else {
            return Vec::new();
        };

        self.pending.extend_from_slice(input);
        let len = self.pending.len();
        let keep = match len % BLOCK_LEN {
            0 => len.min(BLOCK_LEN),
            partial => partial,
        };

        let mut out: Vec<u8> = self.pending.drain(..len - keep).collect();
        for block in out.chunks_exact_mut(BLOCK_LEN) {
            cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        out
    }

    /// 마지막 블록 복호화 및 패딩 검증
    ///
    /// - 구조적으로 잘린 파일: `CorruptArtifact`
    /// - 패딩 불일치: `PasswordMismatch`
    pub fn finish(self) -> Result<Vec<u8>, AppError> {
        let Some(mut cipher) = self.cipher else {
            return Err(AppError::CorruptArtifact(format!(
                "file is shorter than the {}-byte header",
                NONCE_LEN
            )));
        };

        let mut last = self.pending;
        if last.len() != BLOCK_LEN {
            return Err(AppError::CorruptArtifact(
                "ciphertext length is not a multiple of the block size".into(),
            ));
        }
        cipher.decrypt_block_mut(GenericArray::from_mut_slice(&mut last));

        let pad = last[BLOCK_LEN - 1] as usize;
        if pad == 0 || pad > BLOCK_LEN || !last[BLOCK_LEN - pad..].iter().all(|&b| b as usize == pad) {
            return Err(AppError::PasswordMismatch);
        }
        last.truncate(BLOCK_LEN - pad);
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encrypt_in_chunks(password: &str, data: &[u8], chunk: usize) -> Vec<u8> {
        let mut enc = BackupEncryptor::new(password);
        let mut out = Vec::new();
        for piece in data.chunks(chunk.max(1)) {
            out.extend(enc.update(piece));
        }
        out.extend(enc.finish());
        out
    }

    fn decrypt_in_chunks(password: &str, data: &[u8], chunk: usize) -> Result<Vec<u8>, AppError> {
        let mut dec = BackupDecryptor::new(password);
        let mut out = Vec::new();
        for piece in data.chunks(chunk.max(1)) {
            out.extend(dec.update(piece));
        }
        out.extend(dec.finish()?);
        Ok(out)
    }

    #[test]
    fn artifact_layout_is_iv_then_padded_blocks() {
        let dump = b"PGDMP\x01\x0e\x00 custom format payload".to_vec();
        let artifact = encrypt_in_chunks("s3cr3t", &dump, 7);

        assert_eq!((artifact.len() - NONCE_LEN) % BLOCK_LEN, 0);
        assert!(artifact.len() > NONCE_LEN + dump.len());
        assert_eq!(decrypt_in_chunks("s3cr3t", &artifact, 5).unwrap(), dump);
    }

    #[test]
    fn short_dump_fits_in_one_block_after_fixed_iv() {
        let iv: [u8; NONCE_LEN] = core::array::from_fn(|i| i as u8);
        let mut enc = BackupEncryptor::with_iv("pw", iv);
        let mut artifact = enc.update(b"PGDMP");
        artifact.extend(enc.finish());

        assert_eq!(&artifact[..NONCE_LEN], &iv);
        assert_eq!(artifact.len(), NONCE_LEN + BLOCK_LEN);

        let mut dec = BackupDecryptor::new("pw");
        let mut plain = dec.update(&artifact);
        plain.extend(dec.finish().unwrap());
        assert_eq!(plain, b"PGDMP");
    }

    #[test]
    fn block_aligned_input_gets_full_padding_block() {
        let data = [0x42u8; 32];
        let artifact = encrypt_in_chunks("pw", &data, 32);
        assert_eq!(artifact.len(), NONCE_LEN + 48);
        assert_eq!(decrypt_in_chunks("pw", &artifact, 1).unwrap(), data);
    }

    #[test]
    fn empty_dump_still_produces_header_and_padding() {
        let artifact = encrypt_in_chunks("pw", &[], 16);
        assert_eq!(artifact.len(), NONCE_LEN + BLOCK_LEN);
        assert!(decrypt_in_chunks("pw", &artifact, 64).unwrap().is_empty());
    }

    #[test]
    fn truncated_artifacts_are_corrupt() {
        let artifact = encrypt_in_chunks("pw", b"PGDMP and more bytes", 4);

        assert!(matches!(
            decrypt_in_chunks("pw", &artifact[..10], 4),
            Err(AppError::CorruptArtifact(_))
        ));
        assert!(matches!(
            decrypt_in_chunks("pw", &artifact[..artifact.len() - 3], 4),
            Err(AppError::CorruptArtifact(_))
        ));
    }

    #[test]
    fn wrong_password_usually_fails_padding() {
        let dump: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let artifact = encrypt_in_chunks("correct horse", &dump, 1000);

        match decrypt_in_chunks("battery staple", &artifact, 1000) {
            Err(AppError::PasswordMismatch) => {}
            // 1/256 확률로 패딩이 우연히 맞을 수 있음 → 평문이 달라야 함
            Ok(plain) => assert_ne!(plain, dump),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
}
