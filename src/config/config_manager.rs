// ==========================================
// 货柜流转系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::intake_config_trait::IntakeConfigReader;
use crate::db::open_sqlite_connection;
use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::HashMap;
use std::error::Error;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;
        crate::db::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 读取 global scope 的配置值
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        self.get_config_value(key)
    }

    /// 写入 global scope 的配置值（存在则覆盖）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at) VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        tracing::info!(config_key = key, value = value, "配置已更新");
        Ok(())
    }

    /// 读取配置，带默认值
    fn get_config_or_default(&self, key: &str, default: &str) -> Result<String, Box<dyn Error>> {
        Ok(self.get_config_value(key)?.unwrap_or_else(|| default.to_string()))
    }

    /// 读取正整数配置，格式错误时回退默认值
    pub fn get_u64_or(&self, key: &str, default: u64) -> Result<u64, Box<dyn Error>> {
        let value = self.get_config_or_default(key, &default.to_string())?;
        Ok(value.trim().parse::<u64>().unwrap_or_else(|_| {
            tracing::warn!(config_key = key, raw_value = %value, default, "配置格式错误，使用默认值");
            default
        }))
    }

    /// 读取可选正整数配置（未配置或为空返回 None）
    pub fn get_optional_u64(&self, key: &str) -> Result<Option<u64>, Box<dyn Error>> {
        let Some(value) = self.get_config_value(key)? else {
            return Ok(None);
        };
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        match trimmed.parse::<u64>() {
            Ok(v) => Ok(Some(v)),
            Err(_) => {
                tracing::warn!(config_key = key, raw_value = %value, "配置格式错误，按未配置处理");
                Ok(None)
            }
        }
    }

    /// 获取所有配置的快照（JSON格式）
    pub fn get_config_snapshot(&self) -> Result<String, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let mut config_map: HashMap<String, String> = HashMap::new();
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        Ok(serde_json::to_string(&json!(config_map))?)
    }

    /// 从配置快照恢复配置
    ///
    /// # 返回
    /// - Ok(usize): 恢复的配置项数量
    pub fn restore_config_from_snapshot(&self, snapshot_json: &str) -> Result<usize, Box<dyn Error>> {
        let config_map: HashMap<String, String> = serde_json::from_str(snapshot_json)?;

        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        let tx = conn.unchecked_transaction()?;

        let mut count = 0;
        for (key, value) in config_map.iter() {
            count += tx.execute(
                "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
                 ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2",
                params![key, value],
            )?;
        }

        tx.commit()?;
        Ok(count)
    }
}

// ==========================================
// IntakeConfigReader Trait 实现
// ==========================================
impl IntakeConfigReader for ConfigManager {
    fn get_header_aliases(&self) -> Result<HashMap<String, Vec<String>>, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::MANIFEST_HEADER_ALIASES, "{}")?;
        let aliases: HashMap<String, Vec<String>> = serde_json::from_str(&value).unwrap_or_else(|_| {
            tracing::warn!(
                config_key = config_keys::MANIFEST_HEADER_ALIASES,
                raw_value = %value,
                "表头别名配置格式错误，使用内置别名"
            );
            HashMap::new()
        });
        Ok(aliases)
    }

    fn get_mark_image_prefix(&self) -> Result<String, Box<dyn Error>> {
        let value = self.get_config_or_default(
            config_keys::MARK_IMAGE_PREFIX,
            config_keys::DEFAULT_MARK_IMAGE_PREFIX,
        )?;
        let trimmed = value.trim().trim_matches('/');
        if trimmed.is_empty() {
            Ok(config_keys::DEFAULT_MARK_IMAGE_PREFIX.to_string())
        } else {
            Ok(trimmed.to_string())
        }
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 追溯码分配
    pub const RESERVE_RETRY_DELAY_SECS: &str = "allocation.reserve_retry_delay_secs";
    pub const FIRST_CHECK_DELAY_SECS: &str = "allocation.first_check_delay_secs";
    pub const CHECK_RETRY_DELAY_SECS: &str = "allocation.check_retry_delay_secs";

    // 下游副作用
    pub const RELEASE_RETRY_DELAY_SECS: &str = "mark.release_retry_delay_secs";
    pub const RECEIPT_RETRY_DELAY_SECS: &str = "inventory.receipt_retry_delay_secs";

    // 队列
    pub const QUEUE_MAX_ATTEMPTS: &str = "queue.max_attempts";
    pub const QUEUE_ALERT_EVERY: &str = "queue.alert_every";
    pub const WORKER_POLL_INTERVAL_MS: &str = "worker.poll_interval_ms";
    pub const WORKER_BATCH_SIZE: &str = "worker.batch_size";

    // 录入
    pub const MARK_IMAGE_PREFIX: &str = "storage.mark_image_prefix";
    pub const DEFAULT_MARK_IMAGE_PREFIX: &str = "marks";
    pub const MANIFEST_HEADER_ALIASES: &str = "manifest.header_aliases";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn test_numeric_config_falls_back_on_garbage() {
        let config = manager();
        assert_eq!(config.get_u64_or(config_keys::CHECK_RETRY_DELAY_SECS, 15).unwrap(), 15);

        config.set_global_config_value(config_keys::CHECK_RETRY_DELAY_SECS, "abc").unwrap();
        assert_eq!(config.get_u64_or(config_keys::CHECK_RETRY_DELAY_SECS, 15).unwrap(), 15);

        config.set_global_config_value(config_keys::CHECK_RETRY_DELAY_SECS, "5").unwrap();
        assert_eq!(config.get_u64_or(config_keys::CHECK_RETRY_DELAY_SECS, 15).unwrap(), 5);
    }

    #[test]
    fn test_optional_config_treats_blank_as_unset() {
        let config = manager();
        assert_eq!(config.get_optional_u64(config_keys::QUEUE_MAX_ATTEMPTS).unwrap(), None);
        config.set_global_config_value(config_keys::QUEUE_MAX_ATTEMPTS, " ").unwrap();
        assert_eq!(config.get_optional_u64(config_keys::QUEUE_MAX_ATTEMPTS).unwrap(), None);
        config.set_global_config_value(config_keys::QUEUE_MAX_ATTEMPTS, "40").unwrap();
        assert_eq!(config.get_optional_u64(config_keys::QUEUE_MAX_ATTEMPTS).unwrap(), Some(40));
    }

    #[test]
    fn test_snapshot_restore_roundtrip() {
        let config = manager();
        config.set_global_config_value(config_keys::WORKER_BATCH_SIZE, "20").unwrap();
        let snapshot = config.get_config_snapshot().unwrap();

        config.set_global_config_value(config_keys::WORKER_BATCH_SIZE, "99").unwrap();
        assert_eq!(config.restore_config_from_snapshot(&snapshot).unwrap(), 1);
        assert_eq!(
            config.get_global_config_value(config_keys::WORKER_BATCH_SIZE).unwrap(),
            Some("20".to_string())
        );
    }

    #[test]
    fn test_mark_image_prefix_is_normalized() {
        let config = manager();
        assert_eq!(config.get_mark_image_prefix().unwrap(), "marks");
        config.set_global_config_value(config_keys::MARK_IMAGE_PREFIX, "/cdn/marks/").unwrap();
        assert_eq!(config.get_mark_image_prefix().unwrap(), "cdn/marks");
    }
}
