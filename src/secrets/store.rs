//! Secret Store Facade
//!
//! 카테고리별 타입 접근자를 제공하고, 읽기 시 레거시 마이그레이션과
//! 쓰기 시 암호화/평문 폴백을 조율합니다.
//!
//! `read()`는 순수 함수가 아닙니다: 레거시 평문 슬롯만 있는 카테고리를 읽으면
//! 그 자리에서 암호화 슬롯으로 옮기고 레거시 슬롯을 삭제합니다.
//! 부작용 없는 조회는 [`SecretStore::peek`]를 사용하세요.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::config::StoreConfig;
use crate::db::{Database, MigrationState, SlotOp, SlotStorage};
use crate::error::{SecretStoreError, StoreResult};
use crate::secrets::category::{CredentialPair, KeyAlias, SecretCategory, SecretValue, SlotState};
use crate::secrets::envelope;
use crate::secrets::keys::SecureKeyProvider;
use crate::secrets::keystore::KeyBackend;
use crate::secrets::migration::{MigrationController, MigrationFailure, MigrationReport};

/// 쓰기 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    Encrypted,
    Cleared,
    /// 키 저장소를 쓸 수 없어 평문으로 저장됨 (사용자에게 경고 필요)
    PlaintextFallback,
}

/// 카테고리별 마이그레이션 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryOutcome {
    Empty,
    AlreadyEncrypted,
    Migrated,
    PlaintextFallback,
    /// 암호문을 복호화할 수 없고 대체할 레거시 값도 없음
    Unreadable,
    Failed(String),
}

/// 현재 보안 상태 (평문으로 남아 있는 카테고리 목록 포함)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPosture {
    pub backend: KeyBackend,
    pub plaintext_categories: Vec<SecretCategory>,
}

impl SecurityPosture {
    pub fn is_degraded(&self) -> bool {
        self.backend == KeyBackend::Unavailable || !self.plaintext_categories.is_empty()
    }
}

/// 슬롯 해석 결과 (저장소 변경 없음)
struct Resolution {
    value: SecretValue,
    state: SlotState,
    decrypt_failure: Option<SecretStoreError>,
}

/// Secret Store
///
/// 명시적으로 생성해 `Arc`로 공유합니다. 같은 카테고리에 대한 읽기/쓰기는
/// 카테고리별 락으로 직렬화됩니다.
pub struct SecretStore {
    storage: Arc<dyn SlotStorage>,
    keys: Arc<SecureKeyProvider>,
    locks: [Mutex<()>; 4],
    migration_lock: Mutex<()>,
    fallback_warned: AtomicBool,
}

impl SecretStore {
    pub fn new(storage: Arc<dyn SlotStorage>, keys: Arc<SecureKeyProvider>) -> Self {
        Self {
            storage,
            keys,
            locks: Default::default(),
            migration_lock: Mutex::new(()),
            fallback_warned: AtomicBool::new(false),
        }
    }

    /// 설정으로부터 저장소 열기 (DB 초기화 + 키 백엔드 결정)
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        let db = Database::new(&config.database_path())?;
        db.initialize()?;

        let keys = SecureKeyProvider::resolve(
            config.key_backend,
            &config.keyring_service,
            &config.key_dir(),
        );

        tracing::info!(
            data_dir = %config.data_dir.display(),
            backend = ?keys.backend(),
            "secret store opened"
        );
        Ok(Self::new(Arc::new(db), Arc::new(keys)))
    }

    pub fn key_provider(&self) -> &SecureKeyProvider {
        &self.keys
    }

    pub(crate) fn storage(&self) -> &dyn SlotStorage {
        self.storage.as_ref()
    }

    pub(crate) fn lock_migration(&self) -> StoreResult<MutexGuard<'_, ()>> {
        self.migration_lock.lock().map_err(|e| {
            SecretStoreError::LockPoisoned(format!("Failed to acquire migration lock: {}", e))
        })
    }

    fn lock_category(&self, category: SecretCategory) -> StoreResult<MutexGuard<'_, ()>> {
        self.locks[category.index()].lock().map_err(|e| {
            SecretStoreError::LockPoisoned(format!("Failed to acquire {} lock: {}", category, e))
        })
    }

    // =====================================
    // 공개 API
    // =====================================

    /// 카테고리 값 읽기 (없으면 빈 값)
    ///
    /// 레거시 평문만 있으면 암호화해 옮긴 뒤 반환합니다.
    pub fn read(&self, category: SecretCategory) -> StoreResult<SecretValue> {
        let _guard = self.lock_category(category)?;
        let (value, _) = self.resolve_and_migrate(category)?;
        Ok(value)
    }

    /// 카테고리 값 쓰기 (빈 값이면 두 슬롯 모두 삭제)
    pub fn write(&self, category: SecretCategory, value: &SecretValue) -> StoreResult<WriteOutcome> {
        let _guard = self.lock_category(category)?;
        self.write_locked(category, value)
    }

    /// 부작용 없는 조회 (레거시 값도 옮기지 않고 그대로 반환)
    pub fn peek(&self, category: SecretCategory) -> StoreResult<SecretValue> {
        let _guard = self.lock_category(category)?;
        Ok(self.resolve(category)?.value)
    }

    /// 슬롯 상태 조회 (값은 노출하지 않음)
    pub fn slot_state(&self, category: SecretCategory) -> StoreResult<SlotState> {
        let _guard = self.lock_category(category)?;
        Ok(self.resolve(category)?.state)
    }

    /// 필요한 경우에만 레거시 값을 암호화 슬롯으로 이동
    pub fn migrate_if_needed(&self, category: SecretCategory) -> StoreResult<CategoryOutcome> {
        let _guard = self.lock_category(category)?;
        let (_, outcome) = self.resolve_and_migrate(category)?;
        Ok(outcome)
    }

    pub fn clear(&self, category: SecretCategory) -> StoreResult<()> {
        self.write(category, &category.empty_value())?;
        Ok(())
    }

    /// 로그아웃: 모든 카테고리 삭제
    pub fn clear_all(&self) -> StoreResult<()> {
        for category in SecretCategory::ALL {
            self.clear(category)?;
        }
        tracing::info!("all secret slots cleared");
        Ok(())
    }

    /// 모든 슬롯 삭제 후 키까지 영구 삭제
    pub fn wipe(&self) -> StoreResult<()> {
        self.clear_all()?;
        if self.keys.is_available() {
            for alias in KeyAlias::ALL {
                self.keys.delete_key(alias)?;
            }
        }
        tracing::warn!("secret store wiped");
        Ok(())
    }

    pub fn posture(&self) -> StoreResult<SecurityPosture> {
        let mut plaintext_categories = Vec::new();
        for category in SecretCategory::ALL {
            let legacy = self.storage.get(category.legacy_slot())?;
            if legacy.is_some_and(|v| !v.is_empty()) {
                plaintext_categories.push(category);
            }
        }
        Ok(SecurityPosture {
            backend: self.keys.backend(),
            plaintext_categories,
        })
    }

    pub fn migration_state(&self) -> StoreResult<MigrationState> {
        self.storage.migration_state()
    }

    /// 시작 시 1회 마이그레이션 실행
    pub fn run_migration_once(
        &self,
        target_version: u32,
    ) -> Result<MigrationReport, MigrationFailure> {
        MigrationController::new(self).run(target_version)
    }

    // =====================================
    // 타입 접근자
    // =====================================

    pub fn credentials(&self) -> StoreResult<CredentialPair> {
        let value = self.read(SecretCategory::Credentials)?;
        Ok(value.as_credentials().cloned().unwrap_or_default())
    }

    pub fn set_credentials(&self, pair: &CredentialPair) -> StoreResult<WriteOutcome> {
        self.write(
            SecretCategory::Credentials,
            &SecretValue::Credentials(pair.clone()),
        )
    }

    pub fn session_token(&self) -> StoreResult<String> {
        self.read_token(SecretCategory::SessionToken)
    }

    pub fn set_session_token(&self, token: &str) -> StoreResult<WriteOutcome> {
        self.write_token(SecretCategory::SessionToken, token)
    }

    pub fn two_factor_token(&self) -> StoreResult<String> {
        self.read_token(SecretCategory::TwoFactorToken)
    }

    pub fn set_two_factor_token(&self, token: &str) -> StoreResult<WriteOutcome> {
        self.write_token(SecretCategory::TwoFactorToken, token)
    }

    pub fn integration_token(&self) -> StoreResult<String> {
        self.read_token(SecretCategory::IntegrationToken)
    }

    pub fn set_integration_token(&self, token: &str) -> StoreResult<WriteOutcome> {
        self.write_token(SecretCategory::IntegrationToken, token)
    }

    fn read_token(&self, category: SecretCategory) -> StoreResult<String> {
        let value = self.read(category)?;
        Ok(value.as_token().map(str::to_string).unwrap_or_default())
    }

    fn write_token(&self, category: SecretCategory, token: &str) -> StoreResult<WriteOutcome> {
        self.write(category, &SecretValue::Token(token.to_string()))
    }

    // =====================================
    // 내부 구현 (카테고리 락을 잡은 상태에서 호출)
    // =====================================

    fn resolve(&self, category: SecretCategory) -> StoreResult<Resolution> {
        let mut decrypt_failure = None;

        if let Some(text) = self.storage.get(category.encrypted_slot())? {
            if !text.is_empty() {
                match self.open_envelope(category, &text) {
                    Ok(value) => {
                        return Ok(Resolution {
                            value,
                            state: SlotState::Encrypted,
                            decrypt_failure: None,
                        })
                    }
                    Err(e) => {
                        tracing::debug!(category = %category, code = e.code(), "decrypt failed");
                        decrypt_failure = Some(e);
                    }
                }
            }
        }

        if let Some(raw) = self.storage.get(category.legacy_slot())? {
            if !raw.is_empty() {
                return Ok(Resolution {
                    value: category.parse_legacy(&raw),
                    state: SlotState::LegacyPlaintext,
                    decrypt_failure,
                });
            }
        }

        let state = if decrypt_failure.is_some() {
            SlotState::EncryptedUnreadable
        } else {
            SlotState::Empty
        };
        Ok(Resolution {
            value: category.empty_value(),
            state,
            decrypt_failure,
        })
    }

    fn resolve_and_migrate(
        &self,
        category: SecretCategory,
    ) -> StoreResult<(SecretValue, CategoryOutcome)> {
        let resolution = self.resolve(category)?;
        if let Some(e) = &resolution.decrypt_failure {
            tracing::warn!(
                category = %category,
                code = e.code(),
                state = ?resolution.state,
                "encrypted slot is unreadable"
            );
        }
        let outcome = match resolution.state {
            SlotState::Empty => CategoryOutcome::Empty,
            SlotState::Encrypted => CategoryOutcome::AlreadyEncrypted,
            SlotState::EncryptedUnreadable => CategoryOutcome::Unreadable,
            SlotState::LegacyPlaintext => match self.write_locked(category, &resolution.value)? {
                WriteOutcome::Encrypted => {
                    tracing::info!(category = %category, "migrated legacy plaintext secret");
                    CategoryOutcome::Migrated
                }
                WriteOutcome::PlaintextFallback => CategoryOutcome::PlaintextFallback,
                WriteOutcome::Cleared => CategoryOutcome::Empty,
            },
        };
        Ok((resolution.value, outcome))
    }

    fn write_locked(
        &self,
        category: SecretCategory,
        value: &SecretValue,
    ) -> StoreResult<WriteOutcome> {
        category.check(value)?;
        let encrypted_slot = category.encrypted_slot();
        let legacy_slot = category.legacy_slot();

        if value.is_empty() {
            self.storage.apply(&[
                SlotOp::Remove {
                    slot: encrypted_slot,
                },
                SlotOp::Remove { slot: legacy_slot },
            ])?;
            tracing::debug!(category = %category, "secret cleared");
            return Ok(WriteOutcome::Cleared);
        }

        match self.seal(category, value) {
            Ok(envelope_text) => {
                self.storage.apply(&[
                    SlotOp::Put {
                        slot: encrypted_slot,
                        value: envelope_text.as_str(),
                    },
                    SlotOp::Remove { slot: legacy_slot },
                ])?;
                tracing::debug!(category = %category, "secret stored encrypted");
                Ok(WriteOutcome::Encrypted)
            }
            Err(e) => {
                let raw = category.to_legacy(value)?;
                self.storage.apply(&[
                    SlotOp::Put {
                        slot: legacy_slot,
                        value: raw.as_str(),
                    },
                    SlotOp::Remove {
                        slot: encrypted_slot,
                    },
                ])?;
                self.warn_fallback(category, &e);
                Ok(WriteOutcome::PlaintextFallback)
            }
        }
    }

    fn seal(&self, category: SecretCategory, value: &SecretValue) -> StoreResult<String> {
        let key = self.keys.get_or_create_key(category.key_alias())?;
        let plaintext = category.encode_plaintext(value);
        let envelope = envelope::encrypt(&plaintext, &key)?;
        Ok(envelope.encode())
    }

    fn open_envelope(&self, category: SecretCategory, text: &str) -> StoreResult<SecretValue> {
        let alias = category.key_alias();
        let key = self.keys.get_key(alias)?.ok_or_else(|| {
            SecretStoreError::Decrypt(format!("{} is missing from the key store", alias))
        })?;
        let plaintext = zeroize::Zeroizing::new(envelope::decrypt(text, &key)?);
        category.decode_plaintext(&plaintext)
    }

    fn warn_fallback(&self, category: SecretCategory, cause: &SecretStoreError) {
        if !self.fallback_warned.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                category = %category,
                code = cause.code(),
                error = %cause,
                "key store unusable, storing secret as plaintext"
            );
        } else {
            tracing::debug!(category = %category, code = cause.code(), "plaintext fallback");
        }
    }
}
