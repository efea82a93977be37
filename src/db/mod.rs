//! Database Module
//!
//! 로컬 키-값 슬롯 저장소 (SQLite)
//!
//! - 카테고리별 레거시 평문 슬롯 / 암호화 슬롯
//! - 마이그레이션 완료 버전 (감소하지 않음)

mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::error::{SecretStoreError, StoreResult};

/// 슬롯 변경 연산 (한 트랜잭션 안에서 적용)
#[derive(Debug)]
pub enum SlotOp<'a> {
    Put { slot: &'a str, value: &'a str },
    Remove { slot: &'a str },
}

/// 마이그레이션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationState {
    pub completed_version: u32,
    /// 완료 시각 (unix ms), 한 번도 완료되지 않았으면 `None`
    pub completed_at: Option<i64>,
}

/// 영속 슬롯 저장소 인터페이스
pub trait SlotStorage: Send + Sync {
    fn get(&self, slot: &str) -> StoreResult<Option<String>>;

    /// 모든 연산을 원자적으로 적용
    fn apply(&self, ops: &[SlotOp<'_>]) -> StoreResult<()>;

    fn migration_state(&self) -> StoreResult<MigrationState>;

    /// 완료 버전 기록. 저장된 버전보다 낮으면 무시하고 현재 상태를 반환
    fn record_migration(&self, version: u32) -> StoreResult<MigrationState>;
}

/// 데이터베이스 래퍼
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// 새 데이터베이스 연결 생성
    pub fn new(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// 메모리 데이터베이스 (테스트/일회성 세션)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// 데이터베이스 스키마 초기화
    pub fn initialize(&self) -> StoreResult<()> {
        self.lock()?.execute_batch(schema::CREATE_SCHEMA)?;
        Ok(())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            SecretStoreError::LockPoisoned(format!("Failed to acquire database lock: {}", e))
        })
    }

    /// 저장된 슬롯 이름 목록
    pub fn list_slots(&self) -> StoreResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT name FROM secret_slots ORDER BY name")?;
        let iter = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for name in iter {
            names.push(name?);
        }
        Ok(names)
    }
}

impl SlotStorage for Database {
    fn get(&self, slot: &str) -> StoreResult<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM secret_slots WHERE name = ?1",
                [slot],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn apply(&self, ops: &[SlotOp<'_>]) -> StoreResult<()> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let now = chrono::Utc::now().timestamp_millis();

        for op in ops {
            match op {
                SlotOp::Put { slot, value } => {
                    tx.execute(
                        "INSERT OR REPLACE INTO secret_slots (name, value, updated_at)
                         VALUES (?1, ?2, ?3)",
                        (slot, value, now),
                    )?;
                }
                SlotOp::Remove { slot } => {
                    tx.execute("DELETE FROM secret_slots WHERE name = ?1", [slot])?;
                }
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn migration_state(&self) -> StoreResult<MigrationState> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT completed_version, completed_at FROM secret_migration WHERE id = 1",
                [],
                |row| Ok((row.get::<_, u32>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        Ok(match row {
            Some((completed_version, completed_at)) => MigrationState {
                completed_version,
                completed_at: Some(completed_at),
            },
            None => MigrationState::default(),
        })
    }

    fn record_migration(&self, version: u32) -> StoreResult<MigrationState> {
        {
            let conn = self.lock()?;
            let now = chrono::Utc::now().timestamp_millis();
            // 버전은 증가만 허용
            conn.execute(
                "INSERT INTO secret_migration (id, completed_version, completed_at)
                 VALUES (1, ?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET
                     completed_version = excluded.completed_version,
                     completed_at = excluded.completed_at
                 WHERE excluded.completed_version > secret_migration.completed_version",
                (version, now),
            )?;
        }
        self.migration_state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn memory_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    #[test]
    fn test_slot_put_get_remove() {
        let db = memory_db();

        assert_eq!(db.get("session_token").unwrap(), None);
        db.apply(&[SlotOp::Put {
            slot: "session_token",
            value: "abc",
        }])
        .unwrap();
        assert_eq!(db.get("session_token").unwrap().as_deref(), Some("abc"));

        db.apply(&[SlotOp::Remove {
            slot: "session_token",
        }])
        .unwrap();
        assert_eq!(db.get("session_token").unwrap(), None);
    }

    #[test]
    fn test_apply_put_and_remove_together() {
        let db = memory_db();
        db.apply(&[SlotOp::Put {
            slot: "credentials",
            value: "alice:pw",
        }])
        .unwrap();

        db.apply(&[
            SlotOp::Put {
                slot: "credentials_encrypted",
                value: "ZW52",
            },
            SlotOp::Remove {
                slot: "credentials",
            },
        ])
        .unwrap();

        assert_eq!(db.list_slots().unwrap(), vec!["credentials_encrypted".to_string()]);
    }

    #[test]
    fn test_migration_version_never_decreases() {
        let db = memory_db();
        assert_eq!(db.migration_state().unwrap(), MigrationState::default());

        let state = db.record_migration(3).unwrap();
        assert_eq!(state.completed_version, 3);
        assert!(state.completed_at.is_some());

        let state = db.record_migration(1).unwrap();
        assert_eq!(state.completed_version, 3);

        let state = db.record_migration(4).unwrap();
        assert_eq!(state.completed_version, 4);
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("secrets.db");

        {
            let db = Database::new(&path).unwrap();
            db.initialize().unwrap();
            db.apply(&[SlotOp::Put {
                slot: "integration_token",
                value: "tok",
            }])
            .unwrap();
            db.record_migration(2).unwrap();
        }

        let db = Database::new(&path).unwrap();
        db.initialize().unwrap();
        assert_eq!(db.get("integration_token").unwrap().as_deref(), Some("tok"));
        assert_eq!(db.migration_state().unwrap().completed_version, 2);
    }
}
