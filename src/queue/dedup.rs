// ==========================================
// 货柜流转系统 - 幂等键存储
// ==========================================
// 职责: 记录已处理的逻辑事件，至少一次投递下保证只生效一次
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

pub struct DedupStore {
    conn: Arc<Mutex<Connection>>,
}

impl DedupStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn is_processed(&self, dedup_key: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM processed_message WHERE dedup_key = ?1",
            params![dedup_key],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// 记录幂等键
    ///
    /// # 返回
    /// - true: 首次记录
    /// - false: 已存在（重复事件）
    pub fn check_and_mark(&self, dedup_key: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO processed_message (dedup_key, processed_at) VALUES (?1, ?2)",
            params![dedup_key, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;

    #[test]
    fn test_second_mark_reports_duplicate() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let store = DedupStore::new(Arc::new(Mutex::new(conn)));

        assert!(!store.is_processed("goods-received:e1").unwrap());
        assert!(store.check_and_mark("goods-received:e1").unwrap());
        assert!(!store.check_and_mark("goods-received:e1").unwrap());
        assert!(store.is_processed("goods-received:e1").unwrap());
    }
}
