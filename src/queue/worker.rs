// ==========================================
// 货柜流转系统 - 队列消费者
// ==========================================
// 职责: 按通道顺序领取到期消息，分发给处理器，回写处理结果
// 红线: 处理器不阻塞；重试只通过 reschedule 实现
// ==========================================

use crate::queue::command::{Command, Lane};
use crate::queue::dedup::DedupStore;
use crate::queue::message_queue::{MessageQueue, QueueMessage};
use crate::queue::retry::{HandlerOutcome, RetryDecision, RetryPolicy};
use crate::repository::error::RepositoryResult;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// 命令处理器
pub trait CommandHandler: Send + Sync {
    /// 处理一条命令
    ///
    /// # 参数
    /// - command: 命令
    /// - attempt: 第几次尝试（从 1 开始）
    fn handle(&self, command: &Command, attempt: u32) -> HandlerOutcome;
}

/// 一轮消费的统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainStats {
    pub claimed: usize,
    pub done: usize,
    pub skipped: usize,
    pub retried: usize,
    pub failed: usize,
}

impl DrainStats {
    fn absorb(&mut self, other: &DrainStats) {
        self.claimed += other.claimed;
        self.done += other.done;
        self.skipped += other.skipped;
        self.retried += other.retried;
        self.failed += other.failed;
    }
}

// ==========================================
// QueueWorker - 队列消费者
// ==========================================
pub struct QueueWorker {
    queue: Arc<MessageQueue>,
    dedup: Arc<DedupStore>,
    handler: Arc<dyn CommandHandler>,
    policy: RetryPolicy,
    batch_size: usize,
}

impl QueueWorker {
    pub fn new(
        queue: Arc<MessageQueue>,
        dedup: Arc<DedupStore>,
        handler: Arc<dyn CommandHandler>,
        policy: RetryPolicy,
        batch_size: usize,
    ) -> Self {
        Self {
            queue,
            dedup,
            handler,
            policy,
            batch_size: batch_size.max(1),
        }
    }

    /// 处理当前时刻所有到期消息
    ///
    /// 处理过程中新入队且已到期的消息（级联命令）在同一次 drain 内继续处理，
    /// 直到一整轮没有可领取的消息为止
    pub fn drain(&self) -> RepositoryResult<DrainStats> {
        let mut total = DrainStats::default();

        loop {
            let mut round = DrainStats::default();
            for lane in Lane::DRAIN_ORDER {
                loop {
                    let batch = self.queue.claim_due(lane, self.batch_size)?;
                    if batch.is_empty() {
                        break;
                    }
                    for message in batch {
                        round.claimed += 1;
                        self.process(message, &mut round)?;
                    }
                }
            }

            if round.claimed == 0 {
                break;
            }
            total.absorb(&round);
        }

        if total.claimed > 0 {
            tracing::debug!(
                claimed = total.claimed,
                done = total.done,
                skipped = total.skipped,
                retried = total.retried,
                failed = total.failed,
                "队列消费完成"
            );
        }
        Ok(total)
    }

    fn process(&self, message: QueueMessage, stats: &mut DrainStats) -> RepositoryResult<()> {
        let handler_name = message.command.kind();

        // 同一逻辑事件已生效过
        if self.dedup.is_processed(&message.dedup_key)? {
            tracing::debug!(
                handler = handler_name,
                dedup_key = %message.dedup_key,
                "重复投递，跳过"
            );
            self.queue.complete(&message.message_id)?;
            stats.skipped += 1;
            return Ok(());
        }

        let outcome = self.handler.handle(&message.command, message.attempts);

        match outcome {
            HandlerOutcome::Done => {
                self.queue.complete(&message.message_id)?;
                self.dedup.check_and_mark(&message.dedup_key)?;
                stats.done += 1;
            }
            HandlerOutcome::Skip(reason) => {
                tracing::debug!(
                    handler = handler_name,
                    supply_id = message.command.supply_id().unwrap_or(""),
                    reason = %reason,
                    "命令无需处理"
                );
                self.queue.complete(&message.message_id)?;
                self.dedup.check_and_mark(&message.dedup_key)?;
                stats.skipped += 1;
            }
            HandlerOutcome::Retry {
                delay,
                lane,
                reason,
            } => match self.policy.decide(message.attempts) {
                RetryDecision::Reschedule => {
                    if self.policy.should_alert(message.attempts) {
                        tracing::warn!(
                            handler = handler_name,
                            supply_id = message.command.supply_id().unwrap_or(""),
                            attempt = message.attempts,
                            reason = %reason,
                            "命令持续重试，请检查资源是否充足"
                        );
                    }
                    let available_at =
                        self.queue
                            .reschedule(&message.message_id, lane, delay, &reason)?;
                    tracing::debug!(
                        handler = handler_name,
                        attempt = message.attempts,
                        lane = %lane,
                        available_at = %available_at,
                        reason = %reason,
                        "命令延迟重试"
                    );
                    stats.retried += 1;
                }
                RetryDecision::Exhausted => {
                    tracing::error!(
                        handler = handler_name,
                        supply_id = message.command.supply_id().unwrap_or(""),
                        attempt = message.attempts,
                        reason = %reason,
                        "重试次数耗尽，命令失败"
                    );
                    self.queue.fail(&message.message_id, &reason)?;
                    stats.failed += 1;
                }
            },
            HandlerOutcome::Failed(error) => {
                tracing::error!(
                    handler = handler_name,
                    supply_id = message.command.supply_id().unwrap_or(""),
                    attempt = message.attempts,
                    error = %error,
                    "命令处理失败"
                );
                self.queue.fail(&message.message_id, &error)?;
                stats.failed += 1;
            }
        }

        Ok(())
    }

    /// 常驻消费循环，Ctrl-C 退出
    pub async fn run(self: Arc<Self>, poll_interval: Duration) -> RepositoryResult<()> {
        self.queue.recover_interrupted()?;
        tracing::info!(poll_interval_ms = poll_interval.as_millis() as u64, "队列消费者启动");

        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let worker = self.clone();
                    let drained = tokio::task::spawn_blocking(move || worker.drain()).await;
                    match drained {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => tracing::error!(error = %e, "队列消费出错"),
                        Err(e) => tracing::error!(error = %e, "队列消费任务异常退出"),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("收到退出信号，队列消费者停止");
                    break;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use crate::queue::clock::ManualClock;
    use rusqlite::Connection;
    use std::sync::Mutex;

    /// 前 n 次返回重试，之后完成
    struct FlakyHandler {
        fail_times: u32,
        calls: Mutex<Vec<u32>>,
    }

    impl CommandHandler for FlakyHandler {
        fn handle(&self, _command: &Command, attempt: u32) -> HandlerOutcome {
            self.calls.lock().unwrap().push(attempt);
            if attempt <= self.fail_times {
                HandlerOutcome::retry_on(Lane::LowPriority, Duration::from_secs(15), "not yet")
            } else {
                HandlerOutcome::Done
            }
        }
    }

    fn setup(policy: RetryPolicy, fail_times: u32) -> (QueueWorker, Arc<MessageQueue>, Arc<ManualClock>, Arc<FlakyHandler>) {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let clock = Arc::new(ManualClock::default());
        let queue = Arc::new(MessageQueue::with_clock(conn.clone(), clock.clone()));
        let dedup = Arc::new(DedupStore::new(conn));
        let handler = Arc::new(FlakyHandler {
            fail_times,
            calls: Mutex::new(Vec::new()),
        });
        let worker = QueueWorker::new(queue.clone(), dedup, handler.clone(), policy, 10);
        (worker, queue, clock, handler)
    }

    fn reserve() -> Command {
        Command::ReserveMark {
            supply_id: "s1".into(),
            line_id: "l1".into(),
            unit: 0,
        }
    }

    #[test]
    fn test_retry_waits_for_delay_then_completes() {
        let (worker, queue, clock, handler) = setup(RetryPolicy::unbounded(), 2);
        queue.enqueue(reserve(), Lane::Default, Duration::ZERO).unwrap();

        assert_eq!(worker.drain().unwrap().retried, 1);
        // 延迟未到，不会再次领取
        assert_eq!(worker.drain().unwrap().claimed, 0);

        clock.advance(Duration::from_secs(15));
        assert_eq!(worker.drain().unwrap().retried, 1);
        clock.advance(Duration::from_secs(15));
        assert_eq!(worker.drain().unwrap().done, 1);

        assert_eq!(*handler.calls.lock().unwrap(), vec![1, 2, 3]);
        // 已完成的幂等键不再入队
        assert!(queue.enqueue(reserve(), Lane::Default, Duration::ZERO).unwrap().is_none());
    }

    #[test]
    fn test_capped_policy_marks_message_failed() {
        let policy = RetryPolicy {
            max_attempts: Some(2),
            alert_every: 0,
        };
        let (worker, queue, clock, _handler) = setup(policy, 10);
        queue.enqueue(reserve(), Lane::Default, Duration::ZERO).unwrap();

        worker.drain().unwrap();
        clock.advance(Duration::from_secs(15));
        let stats = worker.drain().unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(queue.counts().unwrap().failed, 1);
    }
}
