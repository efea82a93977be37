//! Secrets 모듈
//!
//! 카테고리별 시크릿을 AEAD 봉투로 암호화하여 로컬 슬롯 저장소에 보관합니다.
//!
//! - 키는 OS 키체인(또는 키 파일)에 별칭별로 1개씩 저장 (`CredentialsKey`, `TokensKey`)
//! - 봉투 포맷: base64(`IV(12) || ciphertext || tag(16)`)
//! - 레거시 평문 슬롯은 읽기 시 또는 시작 시 마이그레이션으로 암호화 슬롯으로 이동

pub mod category;
pub mod envelope;
pub mod keys;
pub mod keystore;
pub mod migration;
pub mod store;

pub use category::{CredentialPair, KeyAlias, SecretCategory, SecretValue, SlotState};
pub use keys::{KeyBackendPreference, KeyHandle, SecureKeyProvider};
pub use keystore::{KeyBackend, KeyStore};
pub use migration::{MigrationController, MigrationFailure, MigrationReport, MigrationStatus};
pub use store::{CategoryOutcome, SecretStore, SecurityPosture, WriteOutcome};
