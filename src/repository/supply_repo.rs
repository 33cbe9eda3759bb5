use crate::db::open_shared_connection;
use crate::domain::supply::{Supply, SupplyInvariable, SupplyLine, SupplyLock, SupplyVersion};
use crate::domain::types::{Owner, SupplyStatus};
use crate::repository::codec::{opt_ts_from_sql, ts_from_sql, ts_to_sql};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// SupplyRepository - 货柜仓储
// ==========================================
/// 货柜仓储
/// 职责: supply 快照 + supply_version 版本轨迹
/// 红线: 不删除记录；每次写入追加一条版本
pub struct SupplyRepository {
    conn: Arc<Mutex<Connection>>,
}

const SUPPLY_COLUMNS: &str = r#"
    supply_id, status, container_number, declaration_number, created_at, arrived_at,
    lock_flag, lock_context, user_id, profile_id, lines_json, revision, updated_at
"#;

impl SupplyRepository {
    /// 创建新的 SupplyRepository 实例（会确保表结构存在）
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_shared_connection(db_path)?;
        Ok(Self { conn })
    }

    /// 从已有连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<(Supply, String)> {
        let status_raw: String = row.get(1)?;
        let lines_json: String = row.get(10)?;
        let status = status_raw.parse::<SupplyStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let supply = Supply {
            supply_id: row.get(0)?,
            status,
            lines: Vec::new(),
            invariable: SupplyInvariable {
                container_number: row.get(2)?,
                declaration_number: row.get(3)?,
                created_at: ts_from_sql(&row.get::<_, String>(4)?),
                arrived_at: opt_ts_from_sql(row.get(5)?),
            },
            lock: SupplyLock {
                locked: row.get::<_, i64>(6)? != 0,
                context: row.get(7)?,
            },
            owner: Owner {
                user_id: row.get(8)?,
                profile_id: row.get(9)?,
            },
            revision: row.get(11)?,
            updated_at: ts_from_sql(&row.get::<_, String>(12)?),
        };
        Ok((supply, lines_json))
    }

    fn decode(raw: (Supply, String)) -> RepositoryResult<Supply> {
        let (mut supply, lines_json) = raw;
        supply.lines = serde_json::from_str::<Vec<SupplyLine>>(&lines_json)?;
        Ok(supply)
    }

    fn append_version(conn: &Connection, supply: &Supply, actor: &str) -> RepositoryResult<()> {
        let snapshot = serde_json::to_string(supply)?;
        conn.execute(
            r#"
            INSERT INTO supply_version (supply_id, revision, status, actor, snapshot_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                supply.supply_id,
                supply.revision,
                supply.status.as_str(),
                actor,
                snapshot,
                ts_to_sql(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// 新建货柜（revision 固定为 0）
    ///
    /// # 参数
    /// - supply: 货柜
    /// - actor: 操作人（写入版本轨迹）
    pub fn insert(&self, supply: &Supply, actor: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let lines_json = serde_json::to_string(&supply.lines)?;
        tx.execute(
            r#"
            INSERT INTO supply (
                supply_id, status, container_number, declaration_number, created_at, arrived_at,
                lock_flag, lock_context, user_id, profile_id, lines_json, revision, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                supply.supply_id,
                supply.status.as_str(),
                supply.invariable.container_number,
                supply.invariable.declaration_number,
                ts_to_sql(&supply.invariable.created_at),
                supply.invariable.arrived_at.as_ref().map(ts_to_sql),
                supply.lock.locked as i64,
                supply.lock.context,
                supply.owner.user_id,
                supply.owner.profile_id,
                lines_json,
                supply.revision,
                ts_to_sql(&supply.updated_at),
            ],
        )?;
        Self::append_version(&tx, supply, actor)?;

        tx.commit()?;
        Ok(())
    }

    /// 保存货柜变更（乐观锁）
    ///
    /// # 说明
    /// - 仅当库中 revision 等于 supply.revision 时写入
    /// - 写入成功后 supply.revision +1，并追加版本
    /// - revision 不匹配返回 OptimisticLockFailure，由调用方决定重试
    pub fn save(&self, supply: &mut Supply, actor: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let expected = supply.revision;
        let next_revision = expected + 1;
        let now = Utc::now();
        let lines_json = serde_json::to_string(&supply.lines)?;

        let updated = tx.execute(
            r#"
            UPDATE supply SET
                status = ?1, declaration_number = ?2, arrived_at = ?3,
                lock_flag = ?4, lock_context = ?5, lines_json = ?6,
                revision = ?7, updated_at = ?8
            WHERE supply_id = ?9 AND revision = ?10
            "#,
            params![
                supply.status.as_str(),
                supply.invariable.declaration_number,
                supply.invariable.arrived_at.as_ref().map(ts_to_sql),
                supply.lock.locked as i64,
                supply.lock.context,
                lines_json,
                next_revision,
                ts_to_sql(&now),
                supply.supply_id,
                expected,
            ],
        )?;

        if updated == 0 {
            let actual: Option<i64> = tx
                .query_row(
                    "SELECT revision FROM supply WHERE supply_id = ?1",
                    params![supply.supply_id],
                    |row| row.get(0),
                )
                .optional()?;
            return match actual {
                Some(actual) => Err(RepositoryError::OptimisticLockFailure {
                    supply_id: supply.supply_id.clone(),
                    expected,
                    actual,
                }),
                None => Err(RepositoryError::NotFound {
                    entity: "Supply".to_string(),
                    id: supply.supply_id.clone(),
                }),
            };
        }

        supply.revision = next_revision;
        supply.updated_at = now;
        Self::append_version(&tx, supply, actor)?;

        tx.commit()?;
        Ok(())
    }

    /// 按 supply_id 查询
    pub fn find_by_id(&self, supply_id: &str) -> RepositoryResult<Option<Supply>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM supply WHERE supply_id = ?1", SUPPLY_COLUMNS);
        let raw = conn
            .query_row(&sql, params![supply_id], Self::map_row)
            .optional()?;
        raw.map(Self::decode).transpose()
    }

    /// 同一归属人（用户 + 档案）、同一状态下是否已存在该集装箱号
    pub fn exists_by_container(
        &self,
        container_number: &str,
        owner: &Owner,
        status: SupplyStatus,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            r#"
            SELECT COUNT(*) FROM supply
            WHERE container_number = ?1 AND user_id = ?2 AND profile_id = ?3 AND status = ?4
            "#,
            params![container_number, owner.user_id, owner.profile_id, status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// 按状态列出货柜
    pub fn list_by_status(&self, status: SupplyStatus) -> RepositoryResult<Vec<Supply>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM supply WHERE status = ?1 ORDER BY created_at ASC",
            SUPPLY_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![status.as_str()], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::decode).collect()
    }

    /// 该货柜是否曾经记录过某状态（重放保护）
    pub fn has_recorded_status(&self, supply_id: &str, status: SupplyStatus) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM supply_version WHERE supply_id = ?1 AND status = ?2",
            params![supply_id, status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// 版本轨迹（按 revision 升序）
    pub fn history(&self, supply_id: &str) -> RepositoryResult<Vec<SupplyVersion>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT supply_id, revision, status, actor, snapshot_json, created_at
            FROM supply_version
            WHERE supply_id = ?1
            ORDER BY revision ASC
            "#,
        )?;

        let rows = stmt
            .query_map(params![supply_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(supply_id, revision, status, actor, snapshot, created_at)| {
                let status = status.parse::<SupplyStatus>().map_err(|e| {
                    RepositoryError::FieldValueError {
                        field: "status".to_string(),
                        message: e.to_string(),
                    }
                })?;
                Ok(SupplyVersion {
                    supply_id,
                    revision,
                    status,
                    actor,
                    snapshot: serde_json::from_str(&snapshot)?,
                    created_at: ts_from_sql(&created_at),
                })
            })
            .collect()
    }
}
