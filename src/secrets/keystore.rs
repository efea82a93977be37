//! 키 저장소 백엔드
//!
//! 원시 키 재료를 저장하는 세 가지 백엔드:
//! - [`KeyringKeyStore`]: OS 키체인/키링 (`keyring` crate)
//! - [`FileKeyStore`]: 데이터 디렉토리의 키 파일 (0600 권한)
//! - [`MemoryKeyStore`]: 프로세스 메모리 (테스트/일회성 세션용)
//!
//! 키 재료는 base64로 인코딩하여 저장합니다.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use keyring::Entry;
use rand::Rng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::secrets::category::KeyAlias;

/// 키 길이 (256-bit)
pub const KEY_LEN: usize = 32;

/// 원시 키 재료 (drop 시 zeroize)
pub type KeyMaterial = Zeroizing<[u8; KEY_LEN]>;

/// 키 저장소 능력 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyBackend {
    /// OS 키체인 (플랫폼 보안 저장소)
    HardwareBacked,
    /// 소프트웨어 키 파일 또는 메모리
    SoftwareFallback,
    Unavailable,
}

/// 키 저장소 오류
#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    /// 저장소 자체에 접근할 수 없음 (일시적 오류가 아닌 능력 부재)
    #[error("key store unavailable: {0}")]
    Unavailable(String),

    #[error("stored key for {0} is corrupt")]
    Corrupt(KeyAlias),

    #[error("key store backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 키 저장소 인터페이스
pub trait KeyStore: Send + Sync {
    fn backend(&self) -> KeyBackend;

    /// 저장된 키 로드 (없으면 `None`)
    fn load(&self, alias: KeyAlias) -> Result<Option<KeyMaterial>, KeyStoreError>;

    /// 키 저장
    ///
    /// 이미 유효한 키가 있으면 기존 키를 유지하고, 없거나 읽을 수 없는 값만 교체합니다.
    /// 호출자는 저장 후 다시 로드하여 실제로 남은 키를 사용합니다.
    fn store(&self, alias: KeyAlias, key: &KeyMaterial) -> Result<(), KeyStoreError>;

    /// 키 삭제 (없어도 성공)
    fn delete(&self, alias: KeyAlias) -> Result<(), KeyStoreError>;
}

fn decode_key(alias: KeyAlias, encoded: &str) -> Result<KeyMaterial, KeyStoreError> {
    let bytes = Zeroizing::new(
        BASE64
            .decode(encoded.trim())
            .map_err(|_| KeyStoreError::Corrupt(alias))?,
    );
    if bytes.len() != KEY_LEN {
        return Err(KeyStoreError::Corrupt(alias));
    }
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&bytes);
    Ok(key)
}

fn encode_key(key: &KeyMaterial) -> Zeroizing<String> {
    Zeroizing::new(BASE64.encode(key.as_ref()))
}

// =====================================
// OS 키체인
// =====================================

/// 키체인 접근 확인용 엔트리 이름
const PROBE_ENTRY: &str = "ite:keystore_probe";

/// OS 키체인 기반 키 저장소
pub struct KeyringKeyStore {
    service: String,
}

impl KeyringKeyStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// 키체인 사용 가능 여부 확인
    ///
    /// 존재하지 않는 엔트리 조회가 `NoEntry`로 끝나면 저장소에 접근 가능한 것으로 봅니다.
    pub fn probe(service: &str) -> Result<Self, KeyStoreError> {
        let store = Self::new(service);
        let entry = store.entry_for(PROBE_ENTRY)?;
        match entry.get_password() {
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(store),
            Err(e) => Err(map_keyring_error(e)),
        }
    }

    fn entry_for(&self, user: &str) -> Result<Entry, KeyStoreError> {
        Entry::new(&self.service, user).map_err(map_keyring_error)
    }

    fn entry(&self, alias: KeyAlias) -> Result<Entry, KeyStoreError> {
        self.entry_for(&format!("ite:{}_v1", alias.as_str()))
    }
}

/// 키체인 엔트리 읽기/쓰기
trait PasswordSlot {
    fn get_password(&self) -> keyring::Result<String>;
    fn set_password(&self, password: &str) -> keyring::Result<()>;
}

impl PasswordSlot for Entry {
    fn get_password(&self) -> keyring::Result<String> {
        Entry::get_password(self)
    }

    fn set_password(&self, password: &str) -> keyring::Result<()> {
        Entry::set_password(self, password)
    }
}

/// 유효한 키가 없을 때만 기록
///
/// 키체인에는 원자적 생성 연산이 없어 다른 프로세스와의 확인-기록 사이 경쟁은 남습니다.
fn set_if_absent(
    slot: &impl PasswordSlot,
    alias: KeyAlias,
    key: &KeyMaterial,
) -> Result<(), KeyStoreError> {
    match slot.get_password() {
        Ok(existing) => {
            let existing = Zeroizing::new(existing);
            if decode_key(alias, &existing).is_ok() {
                return Ok(());
            }
            tracing::warn!(alias = %alias, "replacing unreadable keychain entry");
        }
        Err(keyring::Error::NoEntry) => {}
        Err(e) => return Err(map_keyring_error(e)),
    }
    slot.set_password(&encode_key(key))
        .map_err(map_keyring_error)
}

fn map_keyring_error(err: keyring::Error) -> KeyStoreError {
    match err {
        keyring::Error::PlatformFailure(e) => KeyStoreError::Unavailable(e.to_string()),
        keyring::Error::NoStorageAccess(e) => KeyStoreError::Unavailable(e.to_string()),
        other => KeyStoreError::Backend(other.to_string()),
    }
}

impl KeyStore for KeyringKeyStore {
    fn backend(&self) -> KeyBackend {
        KeyBackend::HardwareBacked
    }

    fn load(&self, alias: KeyAlias) -> Result<Option<KeyMaterial>, KeyStoreError> {
        let entry = self.entry(alias)?;
        let encoded = match entry.get_password() {
            Ok(password) => Zeroizing::new(password),
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => return Err(map_keyring_error(e)),
        };
        decode_key(alias, &encoded).map(Some)
    }

    fn store(&self, alias: KeyAlias, key: &KeyMaterial) -> Result<(), KeyStoreError> {
        let entry = self.entry(alias)?;
        set_if_absent(&entry, alias, key)
    }

    fn delete(&self, alias: KeyAlias) -> Result<(), KeyStoreError> {
        let entry = self.entry(alias)?;
        match entry.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(map_keyring_error(e)),
        }
    }
}

// =====================================
// 키 파일 (소프트웨어 폴백)
// =====================================

/// 데이터 디렉토리 기반 키 저장소
///
/// 별칭마다 `<dir>/<alias>.key` 파일 하나. 키는 임시 파일에 완전히 기록한 뒤
/// `hard_link`로 제자리에 놓이므로 반쯤 쓰인 키 파일은 보이지 않고,
/// 이미 존재하는 유효한 키는 덮어쓰지 않습니다.
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, KeyStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| KeyStoreError::Unavailable(format!("{}: {}", dir.display(), e)))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, alias: KeyAlias) -> PathBuf {
        self.dir.join(format!("{}.key", alias.as_str()))
    }

    /// 동시 생성끼리 겹치지 않는 임시 파일 경로
    fn tmp_path(&self, alias: KeyAlias) -> PathBuf {
        let suffix: u64 = rand::thread_rng().gen();
        self.dir
            .join(format!("{}.key.{:016x}.tmp", alias.as_str(), suffix))
    }

    fn write_tmp(path: &Path, key: &KeyMaterial) -> Result<(), KeyStoreError> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(path)?;
        file.write_all(encode_key(key).as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// 기존 파일이 유효한 키가 아닌지 (비어 있음, 잘림, 손상)
    fn is_unusable(alias: KeyAlias, path: &Path) -> Result<bool, KeyStoreError> {
        match fs::read_to_string(path) {
            Ok(content) => {
                let content = Zeroizing::new(content);
                Ok(decode_key(alias, &content).is_err())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    fn link_into_place(
        &self,
        alias: KeyAlias,
        tmp: &Path,
        path: &Path,
    ) -> Result<(), KeyStoreError> {
        match fs::hard_link(tmp, path) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        // 먼저 놓인 유효한 키가 우선
        if !Self::is_unusable(alias, path)? {
            return Ok(());
        }

        tracing::warn!(alias = %alias, path = %path.display(), "replacing unreadable key file");
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match fs::hard_link(tmp, path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl KeyStore for FileKeyStore {
    fn backend(&self) -> KeyBackend {
        KeyBackend::SoftwareFallback
    }

    fn load(&self, alias: KeyAlias) -> Result<Option<KeyMaterial>, KeyStoreError> {
        let path = self.path(alias);
        match fs::read_to_string(&path) {
            Ok(content) => {
                let content = Zeroizing::new(content);
                decode_key(alias, &content).map(Some)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, alias: KeyAlias, key: &KeyMaterial) -> Result<(), KeyStoreError> {
        let path = self.path(alias);
        let tmp_path = self.tmp_path(alias);

        let result = Self::write_tmp(&tmp_path, key)
            .and_then(|()| self.link_into_place(alias, &tmp_path, &path));

        if let Err(e) = fs::remove_file(&tmp_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %tmp_path.display(), error = %e, "failed to remove temp key file");
            }
        }
        result
    }

    fn delete(&self, alias: KeyAlias) -> Result<(), KeyStoreError> {
        match fs::remove_file(self.path(alias)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// =====================================
// 메모리
// =====================================

/// 프로세스 메모리 키 저장소 (재시작 시 키 소실)
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: Mutex<HashMap<KeyAlias, KeyMaterial>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn backend(&self) -> KeyBackend {
        KeyBackend::SoftwareFallback
    }

    fn load(&self, alias: KeyAlias) -> Result<Option<KeyMaterial>, KeyStoreError> {
        let keys = self
            .keys
            .lock()
            .map_err(|e| KeyStoreError::Backend(format!("Failed to acquire key lock: {}", e)))?;
        Ok(keys.get(&alias).cloned())
    }

    fn store(&self, alias: KeyAlias, key: &KeyMaterial) -> Result<(), KeyStoreError> {
        let mut keys = self
            .keys
            .lock()
            .map_err(|e| KeyStoreError::Backend(format!("Failed to acquire key lock: {}", e)))?;
        keys.entry(alias).or_insert_with(|| key.clone());
        Ok(())
    }

    fn delete(&self, alias: KeyAlias) -> Result<(), KeyStoreError> {
        let mut keys = self
            .keys
            .lock()
            .map_err(|e| KeyStoreError::Backend(format!("Failed to acquire key lock: {}", e)))?;
        keys.remove(&alias);
        Ok(())
    }
}
