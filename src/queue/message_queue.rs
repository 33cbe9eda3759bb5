// ==========================================
// 货柜流转系统 - 延迟消息队列
// ==========================================
// 职责: 持久化命令，按"可见时间"交付给 worker
// 说明: 重试不新建消息，而是把同一行的 available_at 往后推
// ==========================================

use crate::queue::clock::{Clock, SystemClock};
use crate::queue::command::{Command, Lane};
use crate::queue::retry::RetryPolicy;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// 消息状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    /// 等待中
    Pending,
    /// 执行中
    Running,
    /// 已完成
    Done,
    /// 失败（不再重试）
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &str {
        match self {
            MessageStatus::Pending => "PENDING",
            MessageStatus::Running => "RUNNING",
            MessageStatus::Done => "DONE",
            MessageStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(MessageStatus::Pending),
            "RUNNING" => Ok(MessageStatus::Running),
            "DONE" => Ok(MessageStatus::Done),
            "FAILED" => Ok(MessageStatus::Failed),
            other => Err(format!("未知消息状态: {}", other)),
        }
    }
}

fn parse_status(raw: &str) -> RepositoryResult<MessageStatus> {
    raw.parse::<MessageStatus>().map_err(|message| RepositoryError::FieldValueError {
        field: "status".to_string(),
        message,
    })
}

/// 队列消息
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub message_id: String,
    pub lane: Lane,
    pub command: Command,
    pub dedup_key: String,
    pub status: MessageStatus,
    /// 已领取次数（含本次）
    pub attempts: u32,
    pub available_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// 队列统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: i64,
    pub running: i64,
    pub done: i64,
    pub failed: i64,
}

// ==========================================
// MessageQueue - 延迟消息队列
// ==========================================
pub struct MessageQueue {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())
}

impl MessageQueue {
    /// 使用系统时钟
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self::with_clock(conn, Arc::new(SystemClock))
    }

    pub fn with_clock(conn: Arc<Mutex<Connection>>, clock: Arc<dyn Clock>) -> Self {
        Self { conn, clock }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 提交命令到队列
    ///
    /// # 返回
    /// - Ok(Some(message_id)): 已入队
    /// - Ok(None): 同一幂等键已处理过或已在队列中，忽略
    pub fn enqueue(
        &self,
        command: Command,
        lane: Lane,
        delay: Duration,
    ) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let dedup_key = command.dedup_key();

        let already: bool = conn.query_row(
            r#"
            SELECT EXISTS(SELECT 1 FROM processed_message WHERE dedup_key = ?1)
                OR EXISTS(SELECT 1 FROM message_queue
                          WHERE dedup_key = ?1 AND status IN ('PENDING', 'RUNNING'))
            "#,
            params![dedup_key],
            |row| row.get(0),
        )?;

        if already {
            tracing::debug!(dedup_key = %dedup_key, kind = command.kind(), "命令已存在，跳过入队");
            return Ok(None);
        }

        let message_id = Uuid::new_v4().to_string();
        let now = self.clock.now();
        let command_json = serde_json::to_string(&command)?;

        conn.execute(
            r#"
            INSERT INTO message_queue (
                message_id, lane, kind, command_json, dedup_key,
                status, attempts, available_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 'PENDING', 0, ?6, ?7)
            "#,
            params![
                message_id,
                lane.as_str(),
                command.kind(),
                command_json,
                dedup_key,
                to_millis(after(now, delay)),
                now.to_rfc3339(),
            ],
        )?;

        tracing::debug!(
            message_id = %message_id,
            kind = command.kind(),
            lane = %lane,
            delay_secs = delay.as_secs(),
            "命令已加入队列"
        );

        Ok(Some(message_id))
    }

    /// 领取到期消息（PENDING → RUNNING，attempts +1）
    pub fn claim_due(&self, lane: Lane, limit: usize) -> RepositoryResult<Vec<QueueMessage>> {
        let conn = self.get_conn()?;
        let now = to_millis(self.clock.now());

        let mut stmt = conn.prepare(
            r#"
            SELECT message_id, command_json, dedup_key, attempts, available_at, last_error
            FROM message_queue
            WHERE status = 'PENDING' AND lane = ?1 AND available_at <= ?2
            ORDER BY available_at ASC, created_at ASC
            LIMIT ?3
            "#,
        )?;
        let rows = stmt
            .query_map(params![lane.as_str(), now, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        let mut claimed = Vec::with_capacity(rows.len());
        for (message_id, command_json, dedup_key, attempts, available_at, last_error) in rows {
            // 条件更新，防止多个 worker 同时领取
            let updated = conn.execute(
                "UPDATE message_queue SET status = 'RUNNING', attempts = attempts + 1 WHERE message_id = ?1 AND status = 'PENDING'",
                params![message_id],
            )?;
            if updated == 0 {
                continue;
            }

            let command: Command = match serde_json::from_str(&command_json) {
                Ok(cmd) => cmd,
                Err(e) => {
                    tracing::error!(message_id = %message_id, error = %e, "命令反序列化失败，标记为 FAILED");
                    conn.execute(
                        "UPDATE message_queue SET status = 'FAILED', last_error = ?1, finished_at = ?2 WHERE message_id = ?3",
                        params![e.to_string(), Utc::now().to_rfc3339(), message_id],
                    )?;
                    continue;
                }
            };

            claimed.push(QueueMessage {
                message_id,
                lane,
                dedup_key: dedup_key.unwrap_or_else(|| command.dedup_key()),
                command,
                status: MessageStatus::Running,
                attempts: (attempts + 1) as u32,
                available_at: from_millis(available_at),
                last_error,
            });
        }

        Ok(claimed)
    }

    /// 标记完成
    pub fn complete(&self, message_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE message_queue SET status = 'DONE', finished_at = ?1 WHERE message_id = ?2",
            params![self.clock.now().to_rfc3339(), message_id],
        )?;
        Ok(())
    }

    /// 标记失败（不再重试）
    pub fn fail(&self, message_id: &str, error: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE message_queue SET status = 'FAILED', last_error = ?1, finished_at = ?2 WHERE message_id = ?3",
            params![error, self.clock.now().to_rfc3339(), message_id],
        )?;
        Ok(())
    }

    /// 延迟重新可见（同一消息）
    pub fn reschedule(
        &self,
        message_id: &str,
        lane: Lane,
        delay: Duration,
        reason: &str,
    ) -> RepositoryResult<DateTime<Utc>> {
        let conn = self.get_conn()?;
        let available_at = after(self.clock.now(), RetryPolicy::effective_delay(delay));
        conn.execute(
            r#"
            UPDATE message_queue
            SET status = 'PENDING', lane = ?1, available_at = ?2, last_error = ?3
            WHERE message_id = ?4
            "#,
            params![lane.as_str(), to_millis(available_at), reason, message_id],
        )?;
        Ok(available_at)
    }

    /// 进程重启后把中断的 RUNNING 消息恢复为 PENDING
    pub fn recover_interrupted(&self) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let n = conn.execute(
            "UPDATE message_queue SET status = 'PENDING' WHERE status = 'RUNNING'",
            [],
        )?;
        if n > 0 {
            tracing::warn!(count = n, "恢复中断的队列消息");
        }
        Ok(n)
    }

    /// 查询单条消息
    pub fn find(&self, message_id: &str) -> RepositoryResult<Option<(MessageStatus, u32, Option<String>)>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                "SELECT status, attempts, last_error FROM message_queue WHERE message_id = ?1",
                params![message_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(s, a, e)| Ok((parse_status(&s)?, a as u32, e)))
            .transpose()
    }

    /// 某类命令的待处理数量
    pub fn pending_count(&self, kind: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM message_queue WHERE kind = ?1 AND status IN ('PENDING', 'RUNNING')",
            params![kind],
            |row| row.get(0),
        )?)
    }

    /// 队列整体统计
    pub fn counts(&self) -> RepositoryResult<QueueCounts> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM message_queue GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let mut counts = QueueCounts::default();
        for row in rows {
            let (status, n) = row?;
            match parse_status(&status)? {
                MessageStatus::Pending => counts.pending = n,
                MessageStatus::Running => counts.running = n,
                MessageStatus::Done => counts.done = n,
                MessageStatus::Failed => counts.failed = n,
            }
        }
        Ok(counts)
    }
}
