//! Store 설정
//!
//! 코드에서 직접 만들거나 환경 변수(`.env.local` / `.env` 포함)에서 읽습니다.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{SecretStoreError, StoreResult};
use crate::secrets::keys::KeyBackendPreference;

pub const ENV_DATA_DIR: &str = "ITE_SECRETS_DATA_DIR";
pub const ENV_KEY_BACKEND: &str = "ITE_SECRETS_KEY_BACKEND";
pub const ENV_KEYRING_SERVICE: &str = "ITE_SECRETS_KEYRING_SERVICE";
pub const ENV_DB_FILE: &str = "ITE_SECRETS_DB_FILE";

pub const DEFAULT_DB_FILE: &str = "secrets.db";
pub const DEFAULT_KEYRING_SERVICE: &str = "ite";
const KEY_DIR_NAME: &str = "keys";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// 데이터 디렉토리 (DB 파일, 소프트웨어 키 파일)
    pub data_dir: PathBuf,
    /// `data_dir` 기준 DB 파일 이름
    pub db_file: String,
    /// OS 키체인 서비스 이름
    pub keyring_service: String,
    pub key_backend: KeyBackendPreference,
}

impl StoreConfig {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            db_file: DEFAULT_DB_FILE.to_string(),
            keyring_service: DEFAULT_KEYRING_SERVICE.to_string(),
            key_backend: KeyBackendPreference::default(),
        }
    }

    /// `.env.local` → `.env` 로드 후 환경 변수에서 설정 구성
    pub fn from_env() -> StoreResult<Self> {
        load_dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 임의의 조회 함수로 설정 구성 (빈 값은 미설정으로 취급)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> StoreResult<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let data_dir = get(ENV_DATA_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        let mut config = Self::with_data_dir(data_dir);

        if let Some(backend) = get(ENV_KEY_BACKEND) {
            config.key_backend = backend.parse()?;
        }
        if let Some(service) = get(ENV_KEYRING_SERVICE) {
            config.keyring_service = service;
        }
        if let Some(db_file) = get(ENV_DB_FILE) {
            config.db_file = db_file;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.db_file.is_empty() {
            return Err(SecretStoreError::Config("db file name is empty".to_string()));
        }
        if Path::new(&self.db_file).components().count() != 1 {
            return Err(SecretStoreError::Config(format!(
                "db file must be a plain file name: {}",
                self.db_file
            )));
        }
        if self.keyring_service.is_empty() {
            return Err(SecretStoreError::Config(
                "keyring service name is empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file)
    }

    /// 소프트웨어 키 파일 디렉토리
    pub fn key_dir(&self) -> PathBuf {
        self.data_dir.join(KEY_DIR_NAME)
    }
}

fn default_data_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".ite"),
        None => PathBuf::from(".ite"),
    }
}

fn load_dotenv() {
    // 파일이 없을 수 있으므로 실패해도 무시
    if dotenvy::from_filename(".env.local").is_ok() {
        return;
    }
    let _ = dotenvy::dotenv();
}
