// ==========================================
// 货柜流转系统 - SQLite 连接初始化与建表
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少多 worker 并发写入时的偶发 busy 错误
// - 幂等建表（CREATE TABLE IF NOT EXISTS）
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要"每个连接"单独开启
/// - busy_timeout 需要"每个连接"单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开连接、建表并包装为共享连接
pub fn open_shared_connection(db_path: &str) -> rusqlite::Result<Arc<Mutex<Connection>>> {
    let conn = open_sqlite_connection(db_path)?;
    init_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// 初始化全部表结构（幂等）
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL DEFAULT 'global',
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        -- 货柜当前快照
        CREATE TABLE IF NOT EXISTS supply (
            supply_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            container_number TEXT NOT NULL,
            declaration_number TEXT,
            created_at TEXT NOT NULL,
            arrived_at TEXT,
            lock_flag INTEGER NOT NULL DEFAULT 0,
            lock_context TEXT NOT NULL DEFAULT '',
            user_id TEXT NOT NULL,
            profile_id TEXT NOT NULL,
            lines_json TEXT NOT NULL,
            revision INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_supply_container
          ON supply(container_number, user_id, profile_id, status);

        -- 货柜版本轨迹（只追加）
        CREATE TABLE IF NOT EXISTS supply_version (
            supply_id TEXT NOT NULL REFERENCES supply(supply_id),
            revision INTEGER NOT NULL,
            status TEXT NOT NULL,
            actor TEXT NOT NULL,
            snapshot_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (supply_id, revision)
        );

        -- 追溯码
        CREATE TABLE IF NOT EXISTS mark (
            mark_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            product_id INTEGER,
            offer_id INTEGER,
            variation_id INTEGER,
            modification_id INTEGER,
            part_id TEXT,
            user_id TEXT NOT NULL,
            profile_id TEXT NOT NULL,
            code_text TEXT NOT NULL,
            code_hash TEXT NOT NULL UNIQUE,
            image_ref TEXT,
            is_error INTEGER NOT NULL DEFAULT 0,
            supply_id TEXT,
            reservation_key TEXT,
            comment TEXT,
            source_file TEXT,
            created_at TEXT NOT NULL,
            modified_at TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_mark_reservation_key
          ON mark(reservation_key) WHERE reservation_key IS NOT NULL;

        CREATE INDEX IF NOT EXISTS idx_mark_candidate
          ON mark(status, user_id, product_id, modified_at);

        CREATE INDEX IF NOT EXISTS idx_mark_supply
          ON mark(supply_id);

        -- 消息队列（延迟可见）
        CREATE TABLE IF NOT EXISTS message_queue (
            message_id TEXT PRIMARY KEY,
            lane TEXT NOT NULL,
            kind TEXT NOT NULL,
            command_json TEXT NOT NULL,
            dedup_key TEXT,
            status TEXT NOT NULL DEFAULT 'PENDING',
            attempts INTEGER NOT NULL DEFAULT 0,
            available_at INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            finished_at TEXT,
            last_error TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_message_queue_due
          ON message_queue(status, lane, available_at);

        CREATE INDEX IF NOT EXISTS idx_message_queue_dedup
          ON message_queue(dedup_key, status);

        -- 已处理消息（幂等键）
        CREATE TABLE IF NOT EXISTS processed_message (
            dedup_key TEXT PRIMARY KEY,
            processed_at TEXT NOT NULL
        );
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;

    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_schema_version_absent_before_init() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), None);
    }
}
