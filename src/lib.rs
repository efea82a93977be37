//! ITE (Integrated Translation Editor) - Secret Store Library
//!
//! 로컬 시크릿 저장소: 키체인 기반 키 관리, AEAD 봉투 암호화,
//! 레거시 평문 슬롯 마이그레이션을 담당합니다.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ite_secrets::{SecretStore, StoreConfig};
//!
//! # fn main() -> Result<(), ite_secrets::SecretStoreError> {
//! let store = Arc::new(SecretStore::open(&StoreConfig::from_env()?)?);
//! store.run_migration_once(1)?;
//! let token = store.session_token()?;
//! # let _ = token;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod secrets;

pub use config::StoreConfig;
pub use error::{ErrorReport, SecretStoreError, StoreResult};
pub use secrets::{
    CategoryOutcome, CredentialPair, KeyBackend, KeyBackendPreference, MigrationController,
    MigrationFailure, MigrationReport, MigrationStatus, SecretCategory, SecretStore, SecretValue,
    SecurityPosture, SlotState, WriteOutcome,
};
