use crate::db::open_shared_connection;
use crate::domain::mark::{Mark, MarkCode, MarkInvariable, MarkStatusCounts};
use crate::domain::types::{MarkStatus, Owner, ProductRef};
use crate::repository::codec::{product_from_columns, product_to_columns, ts_from_sql, ts_to_sql};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// MarkRepository - 追溯码仓储
// ==========================================
/// 追溯码仓储
/// 职责: 管理 mark 表
/// 红线: 占用必须是条件写（CAS），不允许先读后写
pub struct MarkRepository {
    conn: Arc<Mutex<Connection>>,
}

const MARK_COLUMNS: &str = r#"
    mark_id, status, product_id, offer_id, variation_id, modification_id, part_id,
    user_id, profile_id, code_text, code_hash, image_ref, is_error,
    supply_id, reservation_key, comment, source_file, created_at, modified_at
"#;

/// 商品匹配条件（IS 运算符使 NULL 与 NULL 相等，unknown 只匹配 unknown）
const PRODUCT_MATCH: &str =
    "product_id IS ?1 AND offer_id IS ?2 AND variation_id IS ?3 AND modification_id IS ?4";

impl MarkRepository {
    /// 创建新的 MarkRepository 实例（独立连接，会确保表结构存在）
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

    fn map_row(row: &Row<'_>) -> rusqlite::Result<Mark> {
        let status_raw: String = row.get(1)?;
        let status = status_raw.parse::<MarkStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(Mark {
            mark_id: row.get(0)?,
            status,
            invariable: MarkInvariable {
                product: product_from_columns((row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?)),
                part_id: row.get(6)?,
                owner: Owner {
                    user_id: row.get(7)?,
                    profile_id: row.get(8)?,
                },
            },
            code: MarkCode {
                text: row.get(9)?,
                content_hash: row.get(10)?,
                image_ref: row.get(11)?,
                is_error: row.get::<_, i64>(12)? != 0,
            },
            supply_id: row.get(13)?,
            reservation_key: row.get(14)?,
            comment: row.get(15)?,
            source_file: row.get(16)?,
            created_at: ts_from_sql(&row.get::<_, String>(17)?),
            modified_at: ts_from_sql(&row.get::<_, String>(18)?),
        })
    }

    /// 新增追溯码
    ///
    /// # 返回
    /// - Err(UniqueConstraintViolation): code_hash 已存在（同一实物码重复扫描）
    pub fn insert(&self, mark: &Mark) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let (product_id, offer_id, variation_id, modification_id) =
            product_to_columns(&mark.invariable.product);

        conn.execute(
            r#"
            INSERT INTO mark (
                mark_id, status, product_id, offer_id, variation_id, modification_id, part_id,
                user_id, profile_id, code_text, code_hash, image_ref, is_error,
                supply_id, reservation_key, comment, source_file, created_at, modified_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
            "#,
            params![
                mark.mark_id,
                mark.status.as_str(),
                product_id,
                offer_id,
                variation_id,
                modification_id,
                mark.invariable.part_id,
                mark.invariable.owner.user_id,
                mark.invariable.owner.profile_id,
                mark.code.text,
                mark.code.content_hash,
                mark.code.image_ref,
                mark.code.is_error as i64,
                mark.supply_id,
                mark.reservation_key,
                mark.comment,
                mark.source_file,
                ts_to_sql(&mark.created_at),
                ts_to_sql(&mark.modified_at),
            ],
        )?;
        Ok(())
    }

    pub fn exists_by_hash(&self, content_hash: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM mark WHERE code_hash = ?1",
            params![content_hash],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn find_by_id(&self, mark_id: &str) -> RepositoryResult<Option<Mark>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM mark WHERE mark_id = ?1", MARK_COLUMNS);
        Ok(conn.query_row(&sql, params![mark_id], Self::map_row).optional()?)
    }

    pub fn find_by_reservation_key(&self, reservation_key: &str) -> RepositoryResult<Option<Mark>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM mark WHERE reservation_key = ?1", MARK_COLUMNS);
        Ok(conn
            .query_row(&sql, params![reservation_key], Self::map_row)
            .optional()?)
    }

    /// 查找一个可预留的追溯码
    ///
    /// # 条件
    /// - status = UNDEFINED，未关联货柜，非识别失败码
    /// - 商品复合键完全匹配（unknown 只匹配 unknown）
    /// - 同一用户名下
    ///
    /// # 排序
    /// 1. 本档案（profile）优先于合作档案
    /// 2. modified_at 最早优先
    /// 3. part_id 升序
    pub fn find_candidate(
        &self,
        product: &ProductRef,
        owner: &Owner,
    ) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let (product_id, offer_id, variation_id, modification_id) = product_to_columns(product);
        let sql = format!(
            r#"
            SELECT mark_id FROM mark
            WHERE status = 'UNDEFINED' AND supply_id IS NULL AND is_error = 0
              AND {}
              AND user_id = ?5
            ORDER BY CASE WHEN profile_id = ?6 THEN 0 ELSE 1 END,
                     modified_at ASC,
                     part_id ASC,
                     mark_id ASC
            LIMIT 1
            "#,
            PRODUCT_MATCH
        );

        Ok(conn
            .query_row(
                &sql,
                params![
                    product_id,
                    offer_id,
                    variation_id,
                    modification_id,
                    owner.user_id,
                    owner.profile_id
                ],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// 条件占用（CAS）
    ///
    /// # 返回
    /// - true: 本次占用成功
    /// - false: 已被他人占用，或该预留键已占用过其他码
    pub fn try_claim(
        &self,
        mark_id: &str,
        supply_id: &str,
        reservation_key: &str,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let result = conn.execute(
            r#"
            UPDATE mark
            SET status = 'SUPPLY', supply_id = ?1, reservation_key = ?2, modified_at = ?3
            WHERE mark_id = ?4
              AND status = 'UNDEFINED'
              AND supply_id IS NULL
              AND NOT EXISTS (SELECT 1 FROM mark WHERE reservation_key = ?2)
            "#,
            params![supply_id, reservation_key, ts_to_sql(&Utc::now()), mark_id],
        );

        match result {
            Ok(updated) => Ok(updated == 1),
            // 并发下唯一索引兜底：预留键已被另一个码占用
            Err(rusqlite::Error::SqliteFailure(_, Some(msg))) if msg.contains("UNIQUE") => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// 统计关联到货柜且商品匹配的追溯码数量
    pub fn count_linked(&self, supply_id: &str, product: &ProductRef) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let (product_id, offer_id, variation_id, modification_id) = product_to_columns(product);
        let sql = format!(
            "SELECT COUNT(*) FROM mark WHERE {} AND supply_id = ?5 AND status = 'SUPPLY'",
            PRODUCT_MATCH
        );
        Ok(conn.query_row(
            &sql,
            params![product_id, offer_id, variation_id, modification_id, supply_id],
            |row| row.get(0),
        )?)
    }

    /// 关联到货柜的全部追溯码
    pub fn list_by_supply(&self, supply_id: &str) -> RepositoryResult<Vec<Mark>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM mark WHERE supply_id = ?1 ORDER BY modified_at ASC, mark_id ASC",
            MARK_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let marks = stmt
            .query_map(params![supply_id], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(marks)
    }

    /// 释放到流通: SUPPLY → NEW，同时解除货柜关联（条件写）
    ///
    /// reservation_key 保留，作为"哪个单位用过哪个码"的审计
    pub fn release(&self, mark_id: &str, supply_id: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            r#"
            UPDATE mark SET status = 'NEW', supply_id = NULL, modified_at = ?1
            WHERE mark_id = ?2 AND supply_id = ?3 AND status = 'SUPPLY'
            "#,
            params![ts_to_sql(&Utc::now()), mark_id, supply_id],
        )?;
        Ok(updated == 1)
    }

    pub fn set_comment(&self, mark_id: &str, comment: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            "UPDATE mark SET comment = ?1, modified_at = ?2 WHERE mark_id = ?3",
            params![comment, ts_to_sql(&Utc::now()), mark_id],
        )?;
        Ok(updated == 1)
    }

    pub fn set_image_ref(&self, mark_id: &str, image_ref: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            "UPDATE mark SET image_ref = ?1 WHERE mark_id = ?2",
            params![image_ref, mark_id],
        )?;
        Ok(updated == 1)
    }

    /// 人工补录识别失败码
    ///
    /// 仅对 is_error = 1 且仍为 UNDEFINED 的码生效
    pub fn resolve_error_code(
        &self,
        mark_id: &str,
        code: &MarkCode,
        product: &ProductRef,
        part_id: Option<&str>,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let (product_id, offer_id, variation_id, modification_id) = product_to_columns(product);
        let updated = conn.execute(
            r#"
            UPDATE mark SET
                code_text = ?1, code_hash = ?2, is_error = 0,
                product_id = ?3, offer_id = ?4, variation_id = ?5, modification_id = ?6,
                part_id = COALESCE(?7, part_id), modified_at = ?8
            WHERE mark_id = ?9 AND is_error = 1 AND status = 'UNDEFINED'
            "#,
            params![
                code.text,
                code.content_hash,
                product_id,
                offer_id,
                variation_id,
                modification_id,
                part_id,
                ts_to_sql(&Utc::now()),
                mark_id,
            ],
        )?;
        Ok(updated == 1)
    }

    /// 按状态统计某用户的追溯码
    pub fn status_counts(&self, user_id: &str) -> RepositoryResult<MarkStatusCounts> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT status, is_error, COUNT(*) FROM mark
            WHERE user_id = ?1
            GROUP BY status, is_error
            "#,
        )?;

        let mut counts = MarkStatusCounts::default();
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        for row in rows {
            let (status, is_error, count) = row?;
            if is_error != 0 {
                counts.errors += count;
            }
            match status.parse::<MarkStatus>() {
                Ok(MarkStatus::Undefined) => counts.undefined += count,
                Ok(MarkStatus::Supply) => counts.supply += count,
                Ok(MarkStatus::New) => counts.new += count,
                Err(e) => tracing::warn!(error = %e, "忽略未知追溯码状态"),
            }
        }

        Ok(counts)
    }
}
