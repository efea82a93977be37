//! Secret Store Error Types
//!
//! 크레이트 전역 에러 타입 정의
//!
//! 에러 메시지에는 시크릿 값이 절대 포함되지 않습니다 (카테고리/슬롯/별칭 이름만 사용).

use serde::Serialize;
use thiserror::Error;

use crate::secrets::envelope::EnvelopeError;
use crate::secrets::keystore::KeyStoreError;

/// Secret Store 에러
#[derive(Error, Debug)]
pub enum SecretStoreError {
    #[error("Key store capability unavailable: {0}")]
    KeyCapabilityUnavailable(String),

    #[error("Key store error: {0}")]
    KeyStore(String),

    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Decryption failed: {0}")]
    Decrypt(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Persisted storage error: {0}")]
    PersistedStorage(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SecretStoreError {
    /// 애플리케이션 셸에 전달할 안정적인 에러 코드
    pub fn code(&self) -> &'static str {
        match self {
            SecretStoreError::KeyCapabilityUnavailable(_) => "KEY_CAPABILITY_UNAVAILABLE",
            SecretStoreError::KeyStore(_) => "KEY_STORE_ERROR",
            SecretStoreError::Encrypt(_) => "ENCRYPT_FAILURE",
            SecretStoreError::Decrypt(_) => "DECRYPT_FAILURE",
            SecretStoreError::MalformedEnvelope(_) => "MALFORMED_ENVELOPE",
            SecretStoreError::PersistedStorage(_) => "PERSISTED_STORAGE_FAILURE",
            SecretStoreError::LockPoisoned(_) => "LOCK_ERROR",
            SecretStoreError::InvalidValue(_) => "INVALID_VALUE",
            SecretStoreError::Config(_) => "CONFIG_ERROR",
            SecretStoreError::Io(_) => "IO_ERROR",
        }
    }

    /// 마이그레이션 패스를 완료로 기록할 수 없는 에러인지 여부
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            SecretStoreError::PersistedStorage(_)
                | SecretStoreError::LockPoisoned(_)
                | SecretStoreError::Io(_)
        )
    }
}

impl From<rusqlite::Error> for SecretStoreError {
    fn from(err: rusqlite::Error) -> Self {
        SecretStoreError::PersistedStorage(err.to_string())
    }
}

impl From<KeyStoreError> for SecretStoreError {
    fn from(err: KeyStoreError) -> Self {
        match err {
            KeyStoreError::Unavailable(msg) => SecretStoreError::KeyCapabilityUnavailable(msg),
            other => SecretStoreError::KeyStore(other.to_string()),
        }
    }
}

impl From<EnvelopeError> for SecretStoreError {
    fn from(err: EnvelopeError) -> Self {
        match err {
            EnvelopeError::Malformed(msg) => SecretStoreError::MalformedEnvelope(msg),
            EnvelopeError::DecryptFailure => SecretStoreError::Decrypt(err.to_string()),
            EnvelopeError::EncryptFailure(msg) => SecretStoreError::Encrypt(msg),
        }
    }
}

/// 셸 응답용 직렬화 가능한 에러
#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

impl From<&SecretStoreError> for ErrorReport {
    fn from(error: &SecretStoreError) -> Self {
        ErrorReport {
            code: error.code().to_string(),
            message: error.to_string(),
            details: None,
        }
    }
}

/// Secret Store 결과 타입
pub type StoreResult<T> = Result<T, SecretStoreError>;
