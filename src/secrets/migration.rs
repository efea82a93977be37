//! Migration Controller
//!
//! 시작 시 1회, 버전 단위로 레거시 평문 슬롯을 암호화 슬롯으로 옮깁니다.
//! 완료 버전은 영속 저장소에 기록되며 재실행은 멱등입니다.

use serde::Serialize;

use crate::error::SecretStoreError;
use crate::secrets::category::SecretCategory;
use crate::secrets::store::{CategoryOutcome, SecretStore};

/// 마이그레이션 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// 이미 대상 버전 이상으로 완료되어 아무것도 하지 않음
    AlreadyCompleted,
    Completed,
    /// 복구할 수 없는 오류로 중단되어 완료가 기록되지 않음
    Incomplete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryReport {
    pub category: SecretCategory,
    pub outcome: CategoryOutcome,
}

/// 마이그레이션 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub target_version: u32,
    pub previous_version: u32,
    pub status: MigrationStatus,
    pub categories: Vec<CategoryReport>,
    pub migrated: usize,
    pub failed: usize,
}

impl MigrationReport {
    fn already_completed(target_version: u32, previous_version: u32) -> Self {
        Self {
            target_version,
            previous_version,
            status: MigrationStatus::AlreadyCompleted,
            categories: Vec::new(),
            migrated: 0,
            failed: 0,
        }
    }
}

/// 마이그레이션 실패
///
/// 카테고리 단계까지 진행했다면 중단 시점까지의 결과를 함께 담습니다.
#[derive(Debug, thiserror::Error)]
#[error("secret migration incomplete: {error}")]
pub struct MigrationFailure {
    #[source]
    pub error: SecretStoreError,
    pub report: Option<MigrationReport>,
}

impl MigrationFailure {
    pub fn code(&self) -> &'static str {
        self.error.code()
    }
}

impl From<MigrationFailure> for SecretStoreError {
    fn from(failure: MigrationFailure) -> Self {
        failure.error
    }
}

impl From<SecretStoreError> for MigrationFailure {
    fn from(error: SecretStoreError) -> Self {
        Self {
            error,
            report: None,
        }
    }
}

pub struct MigrationController<'a> {
    store: &'a SecretStore,
}

impl<'a> MigrationController<'a> {
    pub fn new(store: &'a SecretStore) -> Self {
        Self { store }
    }

    /// 대상 버전까지 마이그레이션 실행
    ///
    /// 키 저장소가 없거나 영속 저장소가 실패하면 완료를 기록하지 않고
    /// 오류를 반환합니다 (다음 시작 시 재시도). 한 카테고리의 실패는
    /// 나머지 카테고리의 마이그레이션을 막지 않습니다.
    pub fn run(&self, target_version: u32) -> Result<MigrationReport, MigrationFailure> {
        let _guard = self.store.lock_migration()?;

        let state = self.store.storage().migration_state()?;
        if state.completed_version >= target_version {
            tracing::debug!(
                version = state.completed_version,
                target_version,
                "secret migration already completed"
            );
            return Ok(MigrationReport::already_completed(
                target_version,
                state.completed_version,
            ));
        }

        if !self.store.key_provider().is_available() {
            tracing::warn!(
                target_version,
                "no key store available, secret migration postponed"
            );
            return Err(SecretStoreError::KeyCapabilityUnavailable(
                "cannot migrate secrets without a key store".to_string(),
            )
            .into());
        }

        tracing::info!(
            from = state.completed_version,
            target_version,
            "starting secret migration"
        );

        let mut categories = Vec::with_capacity(SecretCategory::ALL.len());
        let mut migrated = 0;
        let mut failed = 0;
        let mut fatal: Option<SecretStoreError> = None;

        for category in SecretCategory::ALL {
            let outcome = match self.store.migrate_if_needed(category) {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(
                        category = %category,
                        code = e.code(),
                        error = %e,
                        "failed to migrate secret"
                    );
                    let outcome = CategoryOutcome::Failed(e.code().to_string());
                    if e.is_unrecoverable() && fatal.is_none() {
                        fatal = Some(e);
                    }
                    outcome
                }
            };

            match outcome {
                CategoryOutcome::Migrated => migrated += 1,
                CategoryOutcome::Failed(_) => failed += 1,
                _ => {}
            }
            categories.push(CategoryReport { category, outcome });
        }

        if let Some(error) = fatal {
            tracing::error!(
                target_version,
                migrated,
                failed,
                "secret migration incomplete, completion not recorded"
            );
            return Err(MigrationFailure {
                error,
                report: Some(MigrationReport {
                    target_version,
                    previous_version: state.completed_version,
                    status: MigrationStatus::Incomplete,
                    categories,
                    migrated,
                    failed,
                }),
            });
        }

        let recorded = self.store.storage().record_migration(target_version)?;
        tracing::info!(
            version = recorded.completed_version,
            migrated,
            failed,
            "secret migration completed"
        );

        Ok(MigrationReport {
            target_version,
            previous_version: state.completed_version,
            status: MigrationStatus::Completed,
            categories,
            migrated,
            failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, MigrationState, SlotOp, SlotStorage};
    use crate::error::StoreResult;
    use crate::secrets::category::CredentialPair;
    use crate::secrets::keys::SecureKeyProvider;
    use crate::secrets::keystore::MemoryKeyStore;
    use std::sync::Arc;
    use std::thread;

    fn seeded_db() -> Arc<Database> {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db.apply(&[
            SlotOp::Put {
                slot: "credentials",
                value: "alice:p@ss",
            },
            SlotOp::Put {
                slot: "session_token",
                value: "secret123",
            },
        ])
        .unwrap();
        Arc::new(db)
    }

    fn memory_keys() -> Arc<SecureKeyProvider> {
        Arc::new(SecureKeyProvider::new(Box::new(MemoryKeyStore::new())))
    }

    #[test]
    fn test_migration_moves_legacy_slots() {
        let db = seeded_db();
        let store = SecretStore::new(db.clone(), memory_keys());

        let report = store.run_migration_once(1).unwrap();
        assert_eq!(report.status, MigrationStatus::Completed);
        assert_eq!(report.previous_version, 0);
        assert_eq!(report.migrated, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(
            report.categories[0],
            CategoryReport {
                category: SecretCategory::Credentials,
                outcome: CategoryOutcome::Migrated,
            }
        );
        assert_eq!(report.categories[3].outcome, CategoryOutcome::Empty);

        assert_eq!(db.get("credentials").unwrap(), None);
        assert_eq!(db.get("session_token").unwrap(), None);
        assert_eq!(db.migration_state().unwrap().completed_version, 1);

        assert_eq!(store.credentials().unwrap(), CredentialPair::new("alice", "p@ss"));
        assert_eq!(store.session_token().unwrap(), "secret123");
    }

    #[test]
    fn test_migration_is_idempotent() {
        let db = seeded_db();
        let store = SecretStore::new(db.clone(), memory_keys());

        store.run_migration_once(2).unwrap();
        let envelope = db.get("session_token_encrypted").unwrap();

        let again = store.run_migration_once(2).unwrap();
        assert_eq!(again.status, MigrationStatus::AlreadyCompleted);
        assert_eq!(again.previous_version, 2);
        assert!(again.categories.is_empty());

        let lower = store.run_migration_once(1).unwrap();
        assert_eq!(lower.status, MigrationStatus::AlreadyCompleted);

        assert_eq!(db.get("session_token_encrypted").unwrap(), envelope);
        assert_eq!(store.session_token().unwrap(), "secret123");
    }

    #[test]
    fn test_unavailable_key_store_persists_nothing() {
        let db = seeded_db();
        let store = SecretStore::new(db.clone(), Arc::new(SecureKeyProvider::unavailable()));

        let err = store.run_migration_once(1).unwrap_err();
        assert!(matches!(err.error, SecretStoreError::KeyCapabilityUnavailable(_)));
        assert!(err.report.is_none());
        assert_eq!(db.migration_state().unwrap(), MigrationState::default());
        assert_eq!(db.get("session_token").unwrap().as_deref(), Some("secret123"));

        // 키 저장소가 생기면 다음 시작 시 재시도
        let store = SecretStore::new(db.clone(), memory_keys());
        let report = store.run_migration_once(1).unwrap();
        assert_eq!(report.migrated, 2);
    }

    /// 쓰기가 항상 실패하는 저장소
    struct ReadOnlyStorage {
        inner: Arc<Database>,
    }

    impl SlotStorage for ReadOnlyStorage {
        fn get(&self, slot: &str) -> StoreResult<Option<String>> {
            self.inner.get(slot)
        }

        fn apply(&self, _ops: &[SlotOp<'_>]) -> StoreResult<()> {
            Err(SecretStoreError::PersistedStorage(
                "attempt to write a readonly database".to_string(),
            ))
        }

        fn migration_state(&self) -> StoreResult<MigrationState> {
            self.inner.migration_state()
        }

        fn record_migration(&self, version: u32) -> StoreResult<MigrationState> {
            self.inner.record_migration(version)
        }
    }

    #[test]
    fn test_storage_failure_blocks_completion() {
        let db = seeded_db();
        let storage = Arc::new(ReadOnlyStorage { inner: db.clone() });
        let store = SecretStore::new(storage, memory_keys());

        let err = store.run_migration_once(1).unwrap_err();
        assert!(matches!(err.error, SecretStoreError::PersistedStorage(_)));
        assert_eq!(err.code(), "PERSISTED_STORAGE_FAILURE");
        let report = err.report.unwrap();
        assert_eq!(report.status, MigrationStatus::Incomplete);
        assert_eq!(report.failed, 2);

        assert_eq!(db.migration_state().unwrap().completed_version, 0);
        assert_eq!(db.get("credentials").unwrap().as_deref(), Some("alice:p@ss"));
    }

    /// 자격 증명 암호화 슬롯 쓰기만 실패하는 저장소
    struct CredentialsWriteFails {
        inner: Arc<Database>,
        error: fn() -> SecretStoreError,
    }

    impl SlotStorage for CredentialsWriteFails {
        fn get(&self, slot: &str) -> StoreResult<Option<String>> {
            self.inner.get(slot)
        }

        fn apply(&self, ops: &[SlotOp<'_>]) -> StoreResult<()> {
            let touches_credentials = ops.iter().any(|op| {
                matches!(op, SlotOp::Put { slot, .. } if *slot == "credentials_encrypted")
            });
            if touches_credentials {
                return Err((self.error)());
            }
            self.inner.apply(ops)
        }

        fn migration_state(&self) -> StoreResult<MigrationState> {
            self.inner.migration_state()
        }

        fn record_migration(&self, version: u32) -> StoreResult<MigrationState> {
            self.inner.record_migration(version)
        }
    }

    #[test]
    fn test_failed_category_does_not_stop_later_ones() {
        let db = seeded_db();
        let storage = Arc::new(CredentialsWriteFails {
            inner: db.clone(),
            error: || SecretStoreError::PersistedStorage("disk I/O error".to_string()),
        });
        let store = SecretStore::new(storage, memory_keys());

        let err = store.run_migration_once(1).unwrap_err();
        assert!(matches!(err.error, SecretStoreError::PersistedStorage(_)));

        let report = err.report.unwrap();
        assert_eq!(report.status, MigrationStatus::Incomplete);
        assert_eq!(
            report.categories[0].outcome,
            CategoryOutcome::Failed("PERSISTED_STORAGE_FAILURE".to_string())
        );
        assert_eq!(report.categories[1].outcome, CategoryOutcome::Migrated);
        assert_eq!((report.migrated, report.failed), (1, 1));

        assert!(db.get("session_token_encrypted").unwrap().is_some());
        assert_eq!(db.get("session_token").unwrap(), None);
        assert_eq!(db.get("credentials").unwrap().as_deref(), Some("alice:p@ss"));
        assert_eq!(db.migration_state().unwrap().completed_version, 0);
    }

    #[test]
    fn test_recoverable_failure_is_reported_and_completed() {
        let db = seeded_db();
        let storage = Arc::new(CredentialsWriteFails {
            inner: db.clone(),
            error: || SecretStoreError::KeyStore("keychain busy".to_string()),
        });
        let store = SecretStore::new(storage, memory_keys());

        let report = store.run_migration_once(1).unwrap();
        assert_eq!(report.status, MigrationStatus::Completed);
        assert_eq!(report.failed, 1);
        assert_eq!(
            report.categories[0].outcome,
            CategoryOutcome::Failed("KEY_STORE_ERROR".to_string())
        );
        assert_eq!(db.migration_state().unwrap().completed_version, 1);
    }

    #[test]
    fn test_concurrent_runs_complete_once() {
        let db = seeded_db();
        let store = Arc::new(SecretStore::new(db.clone(), memory_keys()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.run_migration_once(1).unwrap().status)
            })
            .collect();
        let statuses: Vec<MigrationStatus> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        let completed = statuses
            .iter()
            .filter(|s| **s == MigrationStatus::Completed)
            .count();
        assert_eq!(completed, 1);
        assert_eq!(store.session_token().unwrap(), "secret123");
    }

    #[test]
    fn test_report_serializes_for_shell() {
        let db = seeded_db();
        let store = SecretStore::new(db, memory_keys());
        let report = store.run_migration_once(1).unwrap();

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["targetVersion"], 1);
        assert_eq!(json["status"], "completed");
        assert_eq!(json["categories"][1]["category"], "session_token");
        assert_eq!(json["categories"][1]["outcome"], "migrated");
        assert!(!json.to_string().contains("secret123"));
    }
}
