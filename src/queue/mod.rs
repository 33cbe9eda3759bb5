// ==========================================
// 货柜流转系统 - 消息队列层
// ==========================================
// 职责: 延迟可见的命令队列、幂等键、重试策略、消费者
// ==========================================

pub mod clock;
pub mod command;
pub mod dedup;
pub mod message_queue;
pub mod retry;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{Command, Lane};
pub use dedup::DedupStore;
pub use message_queue::{MessageQueue, MessageStatus, QueueCounts, QueueMessage};
pub use retry::{HandlerOutcome, RetryDecision, RetryPolicy, MIN_RETRY_DELAY};
pub use worker::{CommandHandler, DrainStats, QueueWorker};
