//! Secure Key Provider - 키 생성/조회/삭제
//!
//! - 앱 시작 시 1회 백엔드를 결정 (`KeyBackendPreference`)
//! - 키는 첫 사용 시 생성되며 명시적으로 삭제하기 전까지 유지
//! - 같은 별칭에 대한 동시 생성은 직렬화되어 항상 하나의 키로 수렴

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use rand::Rng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::SecretStoreError;
use crate::secrets::category::KeyAlias;
use crate::secrets::keystore::{
    FileKeyStore, KeyBackend, KeyMaterial, KeyStore, KeyStoreError, KeyringKeyStore,
    MemoryKeyStore, KEY_LEN,
};

/// 키 백엔드 선호도 (설정)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyBackendPreference {
    /// OS 키체인 우선, 실패 시 키 파일
    #[default]
    Auto,
    /// OS 키체인만 사용
    Platform,
    /// 키 파일만 사용
    Software,
    /// 메모리 (프로세스 종료 시 키 소실)
    Memory,
    /// 암호화 비활성화 (모든 쓰기가 평문 폴백)
    None,
}

impl FromStr for KeyBackendPreference {
    type Err = SecretStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "platform" | "keychain" | "keyring" => Ok(Self::Platform),
            "software" | "file" => Ok(Self::Software),
            "memory" => Ok(Self::Memory),
            "none" | "disabled" => Ok(Self::None),
            other => Err(SecretStoreError::Config(format!(
                "unknown key backend: {}",
                other
            ))),
        }
    }
}

/// 키 핸들 (별칭 + 키 재료)
///
/// `Debug` 출력에는 별칭만 포함됩니다.
#[derive(Clone)]
pub struct KeyHandle {
    alias: KeyAlias,
    material: Arc<KeyMaterial>,
}

impl KeyHandle {
    pub(crate) fn new(alias: KeyAlias, material: KeyMaterial) -> Self {
        Self {
            alias,
            material: Arc::new(material),
        }
    }

    /// 고정 바이트로 핸들 생성 (테스트/외부 키 주입용)
    pub fn from_bytes(alias: KeyAlias, bytes: [u8; KEY_LEN]) -> Self {
        Self::new(alias, Zeroizing::new(bytes))
    }

    pub fn alias(&self) -> KeyAlias {
        self.alias
    }

    pub(crate) fn material(&self) -> &[u8; KEY_LEN] {
        &self.material
    }
}

impl fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHandle")
            .field("alias", &self.alias)
            .finish_non_exhaustive()
    }
}

/// Secure Key Provider
///
/// 원시 키 재료를 다루는 유일한 컴포넌트입니다.
pub struct SecureKeyProvider {
    store: Option<Box<dyn KeyStore>>,
    /// 로드된 키 캐시 (생성 직렬화 락 겸용)
    cache: Mutex<HashMap<KeyAlias, KeyHandle>>,
}

impl SecureKeyProvider {
    pub fn new(store: Box<dyn KeyStore>) -> Self {
        Self {
            store: Some(store),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// 키 저장소가 없는 provider (모든 키 요청이 능력 부재로 실패)
    pub fn unavailable() -> Self {
        Self {
            store: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// 설정된 선호도에 따라 백엔드 결정 (앱 시작 시 1회)
    pub fn resolve(
        preference: KeyBackendPreference,
        keyring_service: &str,
        key_dir: &std::path::Path,
    ) -> Self {
        let keyring = || match KeyringKeyStore::probe(keyring_service) {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!(error = %e, "OS keychain is not accessible");
                None
            }
        };
        let files = || match FileKeyStore::new(key_dir) {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!(error = %e, dir = %key_dir.display(), "key directory is not usable");
                None
            }
        };

        let store: Option<Box<dyn KeyStore>> = match preference {
            KeyBackendPreference::Auto => match keyring() {
                Some(store) => Some(Box::new(store)),
                None => files().map(|s| Box::new(s) as Box<dyn KeyStore>),
            },
            KeyBackendPreference::Platform => keyring().map(|s| Box::new(s) as Box<dyn KeyStore>),
            KeyBackendPreference::Software => files().map(|s| Box::new(s) as Box<dyn KeyStore>),
            KeyBackendPreference::Memory => Some(Box::new(MemoryKeyStore::new())),
            KeyBackendPreference::None => None,
        };

        let provider = match store {
            Some(store) => Self::new(store),
            None => Self::unavailable(),
        };
        tracing::info!(
            preference = ?preference,
            backend = ?provider.backend(),
            "key provider resolved"
        );
        provider
    }

    pub fn backend(&self) -> KeyBackend {
        self.store
            .as_ref()
            .map(|s| s.backend())
            .unwrap_or(KeyBackend::Unavailable)
    }

    pub fn is_available(&self) -> bool {
        self.store.is_some()
    }

    fn store(&self) -> Result<&dyn KeyStore, SecretStoreError> {
        self.store.as_deref().ok_or_else(|| {
            SecretStoreError::KeyCapabilityUnavailable("no key store backend configured".to_string())
        })
    }

    fn lock_cache(&self) -> Result<MutexGuard<'_, HashMap<KeyAlias, KeyHandle>>, SecretStoreError> {
        self.cache
            .lock()
            .map_err(|e| SecretStoreError::LockPoisoned(format!("Failed to acquire key cache lock: {}", e)))
    }

    /// 기존 키 반환 또는 새 256-bit 키 생성
    pub fn get_or_create_key(&self, alias: KeyAlias) -> Result<KeyHandle, SecretStoreError> {
        let store = self.store()?;
        let mut cache = self.lock_cache()?;

        if let Some(handle) = cache.get(&alias) {
            return Ok(handle.clone());
        }

        // 읽을 수 없는 키로는 아무것도 암호화된 적이 없으므로 새 키로 교체
        let existing = match store.load(alias) {
            Ok(existing) => existing,
            Err(KeyStoreError::Corrupt(_)) => {
                tracing::warn!(alias = %alias, "stored key is unreadable, generating a new one");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let material = match existing {
            Some(material) => material,
            None => {
                let mut fresh = Zeroizing::new([0u8; KEY_LEN]);
                rand::thread_rng().fill(&mut fresh[..]);
                store.store(alias, &fresh)?;

                // 다른 프로세스가 먼저 저장했을 수 있으므로 저장소의 값을 채택
                let persisted = store.load(alias)?.ok_or_else(|| {
                    SecretStoreError::KeyStore(format!("{} vanished right after creation", alias))
                })?;
                tracing::info!(alias = %alias, backend = ?store.backend(), "created new key");
                persisted
            }
        };

        let handle = KeyHandle::new(alias, material);
        cache.insert(alias, handle.clone());
        Ok(handle)
    }

    /// 기존 키만 조회 (생성하지 않음)
    pub fn get_key(&self, alias: KeyAlias) -> Result<Option<KeyHandle>, SecretStoreError> {
        let store = self.store()?;
        let mut cache = self.lock_cache()?;

        if let Some(handle) = cache.get(&alias) {
            return Ok(Some(handle.clone()));
        }

        match store.load(alias)? {
            Some(material) => {
                let handle = KeyHandle::new(alias, material);
                cache.insert(alias, handle.clone());
                Ok(Some(handle))
            }
            None => Ok(None),
        }
    }

    /// 키 영구 삭제
    ///
    /// 이 별칭으로 만든 모든 봉투는 더 이상 복호화할 수 없습니다.
    pub fn delete_key(&self, alias: KeyAlias) -> Result<(), SecretStoreError> {
        let store = self.store()?;
        let mut cache = self.lock_cache()?;

        store.delete(alias)?;
        cache.remove(&alias);
        tracing::info!(alias = %alias, "key deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn test_get_or_create_is_stable() {
        let provider = SecureKeyProvider::new(Box::new(MemoryKeyStore::new()));

        let first = provider.get_or_create_key(KeyAlias::TokensKey).unwrap();
        let second = provider.get_or_create_key(KeyAlias::TokensKey).unwrap();
        assert_eq!(first.material(), second.material());

        let other = provider.get_or_create_key(KeyAlias::CredentialsKey).unwrap();
        assert_ne!(first.material(), other.material());
    }

    #[test]
    fn test_concurrent_first_use_yields_one_key() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(SecureKeyProvider::new(Box::new(
            FileKeyStore::new(dir.path()).unwrap(),
        )));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = Arc::clone(&provider);
                thread::spawn(move || {
                    *provider.get_or_create_key(KeyAlias::TokensKey).unwrap().material()
                })
            })
            .collect();

        let keys: Vec<[u8; KEY_LEN]> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(keys.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_separate_providers_share_file_key() {
        let dir = tempdir().unwrap();
        let a = SecureKeyProvider::new(Box::new(FileKeyStore::new(dir.path()).unwrap()));
        let b = SecureKeyProvider::new(Box::new(FileKeyStore::new(dir.path()).unwrap()));

        let from_a = a.get_or_create_key(KeyAlias::CredentialsKey).unwrap();
        let from_b = b.get_or_create_key(KeyAlias::CredentialsKey).unwrap();
        assert_eq!(from_a.material(), from_b.material());
    }

    #[test]
    fn test_empty_key_file_is_recovered() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("TokensKey.key"), "").unwrap();
        let provider = SecureKeyProvider::new(Box::new(FileKeyStore::new(dir.path()).unwrap()));

        let created = provider.get_or_create_key(KeyAlias::TokensKey).unwrap();

        let reopened = SecureKeyProvider::new(Box::new(FileKeyStore::new(dir.path()).unwrap()));
        let loaded = reopened.get_key(KeyAlias::TokensKey).unwrap().unwrap();
        assert_eq!(created.material(), loaded.material());
    }

    #[test]
    fn test_get_key_does_not_create() {
        let provider = SecureKeyProvider::new(Box::new(MemoryKeyStore::new()));
        assert!(provider.get_key(KeyAlias::TokensKey).unwrap().is_none());

        provider.get_or_create_key(KeyAlias::TokensKey).unwrap();
        assert!(provider.get_key(KeyAlias::TokensKey).unwrap().is_some());
    }

    #[test]
    fn test_delete_key_then_recreate_differs() {
        let provider = SecureKeyProvider::new(Box::new(MemoryKeyStore::new()));

        let before = provider.get_or_create_key(KeyAlias::TokensKey).unwrap();
        provider.delete_key(KeyAlias::TokensKey).unwrap();
        assert!(provider.get_key(KeyAlias::TokensKey).unwrap().is_none());

        let after = provider.get_or_create_key(KeyAlias::TokensKey).unwrap();
        assert_ne!(before.material(), after.material());
    }

    #[test]
    fn test_unavailable_reports_capability_error() {
        let provider = SecureKeyProvider::unavailable();
        assert_eq!(provider.backend(), KeyBackend::Unavailable);

        let err = provider.get_or_create_key(KeyAlias::TokensKey).unwrap_err();
        assert!(matches!(err, SecretStoreError::KeyCapabilityUnavailable(_)));
    }

    #[test]
    fn test_resolve_software_and_none() {
        let dir = tempdir().unwrap();

        let software = SecureKeyProvider::resolve(KeyBackendPreference::Software, "test", dir.path());
        assert_eq!(software.backend(), KeyBackend::SoftwareFallback);

        let none = SecureKeyProvider::resolve(KeyBackendPreference::None, "test", dir.path());
        assert_eq!(none.backend(), KeyBackend::Unavailable);
    }

    #[test]
    fn test_debug_hides_material() {
        let handle = KeyHandle::from_bytes(KeyAlias::TokensKey, [0xAB; KEY_LEN]);
        let rendered = format!("{:?}", handle);
        assert!(rendered.contains("TokensKey"));
        assert!(!rendered.contains("171"));
    }

    #[test]
    fn test_preference_from_str() {
        assert_eq!("keychain".parse::<KeyBackendPreference>().unwrap(), KeyBackendPreference::Platform);
        assert_eq!("AUTO".parse::<KeyBackendPreference>().unwrap(), KeyBackendPreference::Auto);
        assert!("tpm".parse::<KeyBackendPreference>().is_err());
    }
}
