//! Database Schema
//!
//! SQLite 테이블 스키마 정의

/// 데이터베이스 스키마 생성 SQL
pub const CREATE_SCHEMA: &str = r#"
-- 시크릿 슬롯 테이블 (레거시 평문 슬롯 + 암호화 슬롯)
CREATE TABLE IF NOT EXISTS secret_slots (
    name TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

-- 마이그레이션 상태 (단일 행)
CREATE TABLE IF NOT EXISTS secret_migration (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    completed_version INTEGER NOT NULL,
    completed_at INTEGER NOT NULL
);
"#;
