//! 시크릿 카테고리 및 값 모델
//!
//! 카테고리마다 고정된 슬롯 이름 쌍(레거시 평문 / 암호화)과 키 별칭이 있습니다.
//!
//! | 카테고리 | 레거시 슬롯 | 암호화 슬롯 | 키 별칭 |
//! |---|---|---|---|
//! | `Credentials` | `credentials` | `credentials_encrypted` | `CredentialsKey` |
//! | `SessionToken` | `session_token` | `session_token_encrypted` | `TokensKey` |
//! | `TwoFactorToken` | `two_factor_token` | `two_factor_token_encrypted` | `TokensKey` |
//! | `IntegrationToken` | `integration_token` | `integration_token_encrypted` | `TokensKey` |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::SecretStoreError;

/// 암호화 슬롯 이름 접미사
pub const ENCRYPTED_SLOT_SUFFIX: &str = "_encrypted";

/// 레거시 자격 증명 구분자 (`identity:secret`)
const LEGACY_DELIMITER: char = ':';

/// 길이 접두사 크기 (u32 big-endian)
const LEN_PREFIX: usize = 4;

/// 시크릿 카테고리 (닫힌 집합)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretCategory {
    Credentials,
    SessionToken,
    TwoFactorToken,
    IntegrationToken,
}

impl SecretCategory {
    /// 마이그레이션 순서 (고정)
    pub const ALL: [SecretCategory; 4] = [
        SecretCategory::Credentials,
        SecretCategory::SessionToken,
        SecretCategory::TwoFactorToken,
        SecretCategory::IntegrationToken,
    ];

    pub fn name(self) -> &'static str {
        self.legacy_slot()
    }

    /// 카테고리별 락 배열 인덱스
    pub(crate) fn index(self) -> usize {
        match self {
            SecretCategory::Credentials => 0,
            SecretCategory::SessionToken => 1,
            SecretCategory::TwoFactorToken => 2,
            SecretCategory::IntegrationToken => 3,
        }
    }

    /// 레거시 평문 슬롯 이름
    pub fn legacy_slot(self) -> &'static str {
        match self {
            SecretCategory::Credentials => "credentials",
            SecretCategory::SessionToken => "session_token",
            SecretCategory::TwoFactorToken => "two_factor_token",
            SecretCategory::IntegrationToken => "integration_token",
        }
    }

    /// 암호화 슬롯 이름
    pub fn encrypted_slot(self) -> &'static str {
        match self {
            SecretCategory::Credentials => "credentials_encrypted",
            SecretCategory::SessionToken => "session_token_encrypted",
            SecretCategory::TwoFactorToken => "two_factor_token_encrypted",
            SecretCategory::IntegrationToken => "integration_token_encrypted",
        }
    }

    pub fn key_alias(self) -> KeyAlias {
        match self {
            SecretCategory::Credentials => KeyAlias::CredentialsKey,
            SecretCategory::SessionToken
            | SecretCategory::TwoFactorToken
            | SecretCategory::IntegrationToken => KeyAlias::TokensKey,
        }
    }

    /// 카테고리의 빈 값 (읽기 기본값이자 삭제 센티널)
    pub fn empty_value(self) -> SecretValue {
        match self {
            SecretCategory::Credentials => SecretValue::Credentials(CredentialPair::default()),
            _ => SecretValue::Token(String::new()),
        }
    }

    /// 값이 이 카테고리에 맞는 형태인지 검증
    pub fn check(self, value: &SecretValue) -> Result<(), SecretStoreError> {
        match (self, value) {
            (SecretCategory::Credentials, SecretValue::Credentials(_)) => Ok(()),
            (SecretCategory::Credentials, SecretValue::Token(_)) => Err(
                SecretStoreError::InvalidValue(format!("{} expects a credential pair", self)),
            ),
            (_, SecretValue::Token(_)) => Ok(()),
            (_, SecretValue::Credentials(_)) => Err(SecretStoreError::InvalidValue(format!(
                "{} expects a token",
                self
            ))),
        }
    }

    /// 봉투 암호화 전 평문 바이트
    ///
    /// 자격 증명은 길이 접두사가 붙은 두 필드로 인코딩되어 구분자 모호성이 없습니다.
    pub(crate) fn encode_plaintext(self, value: &SecretValue) -> Zeroizing<Vec<u8>> {
        match value {
            SecretValue::Token(token) => Zeroizing::new(token.as_bytes().to_vec()),
            SecretValue::Credentials(pair) => {
                let identity = pair.identity.as_bytes();
                let secret = pair.secret.as_bytes();
                let mut out =
                    Vec::with_capacity(LEN_PREFIX * 2 + identity.len() + secret.len());
                out.extend_from_slice(&(identity.len() as u32).to_be_bytes());
                out.extend_from_slice(identity);
                out.extend_from_slice(&(secret.len() as u32).to_be_bytes());
                out.extend_from_slice(secret);
                Zeroizing::new(out)
            }
        }
    }

    /// 복호화된 평문 바이트를 값으로 복원
    pub(crate) fn decode_plaintext(self, bytes: &[u8]) -> Result<SecretValue, SecretStoreError> {
        match self {
            SecretCategory::Credentials => {
                let (identity, rest) = take_field(bytes)?;
                let (secret, rest) = take_field(rest)?;
                if !rest.is_empty() {
                    return Err(SecretStoreError::Decrypt(
                        "trailing bytes after credential fields".to_string(),
                    ));
                }
                Ok(SecretValue::Credentials(CredentialPair::new(identity, secret)))
            }
            _ => {
                let token = String::from_utf8(bytes.to_vec()).map_err(|_| {
                    SecretStoreError::Decrypt("token payload is not UTF-8".to_string())
                })?;
                Ok(SecretValue::Token(token))
            }
        }
    }

    /// 레거시 평문 슬롯 포맷으로 직렬화 (평문 폴백 저장용)
    pub(crate) fn to_legacy(self, value: &SecretValue) -> Result<Zeroizing<String>, SecretStoreError> {
        match value {
            SecretValue::Token(token) => Ok(Zeroizing::new(token.clone())),
            SecretValue::Credentials(pair) => {
                // 첫 번째 구분자에서 분리하므로 identity에 구분자가 있으면 복원할 수 없음
                if pair.identity.contains(LEGACY_DELIMITER) {
                    return Err(SecretStoreError::InvalidValue(
                        "identity must not contain ':' in plaintext form".to_string(),
                    ));
                }
                Ok(Zeroizing::new(format!(
                    "{}{}{}",
                    pair.identity, LEGACY_DELIMITER, pair.secret
                )))
            }
        }
    }

    /// 레거시 평문 슬롯 값 파싱
    pub(crate) fn parse_legacy(self, raw: &str) -> SecretValue {
        match self {
            SecretCategory::Credentials => {
                let pair = match raw.split_once(LEGACY_DELIMITER) {
                    Some((identity, secret)) => CredentialPair::new(identity, secret),
                    None => CredentialPair::new(raw, ""),
                };
                SecretValue::Credentials(pair)
            }
            _ => SecretValue::Token(raw.to_string()),
        }
    }
}

fn take_field(bytes: &[u8]) -> Result<(&str, &[u8]), SecretStoreError> {
    if bytes.len() < LEN_PREFIX {
        return Err(SecretStoreError::Decrypt(
            "credential field truncated".to_string(),
        ));
    }
    let (prefix, rest) = bytes.split_at(LEN_PREFIX);
    let mut len_bytes = [0u8; LEN_PREFIX];
    len_bytes.copy_from_slice(prefix);
    let len = u32::from_be_bytes(len_bytes) as usize;
    if rest.len() < len {
        return Err(SecretStoreError::Decrypt(
            "credential field length exceeds payload".to_string(),
        ));
    }
    let (field, rest) = rest.split_at(len);
    let field = std::str::from_utf8(field)
        .map_err(|_| SecretStoreError::Decrypt("credential field is not UTF-8".to_string()))?;
    Ok((field, rest))
}

impl fmt::Display for SecretCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SecretCategory {
    type Err = SecretStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "credentials" => Ok(SecretCategory::Credentials),
            "session_token" => Ok(SecretCategory::SessionToken),
            "two_factor_token" => Ok(SecretCategory::TwoFactorToken),
            "integration_token" => Ok(SecretCategory::IntegrationToken),
            other => Err(SecretStoreError::InvalidValue(format!(
                "unknown secret category: {}",
                other
            ))),
        }
    }
}

/// 키 별칭 (키 저장소에 저장되는 논리 이름)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlias {
    CredentialsKey,
    TokensKey,
}

impl KeyAlias {
    pub const ALL: [KeyAlias; 2] = [KeyAlias::CredentialsKey, KeyAlias::TokensKey];

    pub fn as_str(self) -> &'static str {
        match self {
            KeyAlias::CredentialsKey => "CredentialsKey",
            KeyAlias::TokensKey => "TokensKey",
        }
    }
}

impl fmt::Display for KeyAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 사용자 이름 + 비밀 쌍
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct CredentialPair {
    identity: String,
    secret: String,
}

impl CredentialPair {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn is_empty(&self) -> bool {
        self.identity.is_empty() && self.secret.is_empty()
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// 카테고리별 시크릿 값
#[derive(Clone, PartialEq, Eq, Zeroize)]
pub enum SecretValue {
    Credentials(CredentialPair),
    Token(String),
}

impl SecretValue {
    /// 빈 값(삭제 센티널) 여부
    pub fn is_empty(&self) -> bool {
        match self {
            SecretValue::Credentials(pair) => pair.is_empty(),
            SecretValue::Token(token) => token.is_empty(),
        }
    }

    pub fn as_token(&self) -> Option<&str> {
        match self {
            SecretValue::Token(token) => Some(token),
            SecretValue::Credentials(_) => None,
        }
    }

    pub fn as_credentials(&self) -> Option<&CredentialPair> {
        match self {
            SecretValue::Credentials(pair) => Some(pair),
            SecretValue::Token(_) => None,
        }
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretValue::Credentials(pair) => f.debug_tuple("Credentials").field(pair).finish(),
            SecretValue::Token(token) if token.is_empty() => f.write_str("Token(<empty>)"),
            SecretValue::Token(_) => f.write_str("Token(<redacted>)"),
        }
    }
}

/// 카테고리 슬롯 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Empty,
    LegacyPlaintext,
    Encrypted,
    /// 암호문은 있으나 키가 없거나 교체되었거나 데이터가 손상됨
    EncryptedUnreadable,
}
