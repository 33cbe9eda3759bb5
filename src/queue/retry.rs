// ==========================================
// 货柜流转系统 - 处理结果与重试策略
// ==========================================
// 红线: 处理器内部不 sleep；延迟重试 = 同一消息延迟重新可见
// ==========================================

use crate::queue::command::Lane;
use std::time::Duration;

/// 最小重试延迟，避免同一轮消费中反复领取同一消息
pub const MIN_RETRY_DELAY: Duration = Duration::from_secs(1);

/// 处理器返回的结果
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// 处理完成
    Done,
    /// 无需处理（重复、过期、守卫拦截），视为成功
    Skip(String),
    /// 暂时无法完成，延迟后重试
    Retry {
        delay: Duration,
        lane: Lane,
        reason: String,
    },
    /// 不可恢复的失败，记录后不再重试
    Failed(String),
}

impl HandlerOutcome {
    pub fn retry(delay: Duration, reason: impl Into<String>) -> Self {
        HandlerOutcome::Retry {
            delay,
            lane: Lane::Default,
            reason: reason.into(),
        }
    }

    pub fn retry_on(lane: Lane, delay: Duration, reason: impl Into<String>) -> Self {
        HandlerOutcome::Retry {
            delay,
            lane,
            reason: reason.into(),
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        HandlerOutcome::Skip(reason.into())
    }
}

/// 重试上限判定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Reschedule,
    Exhausted,
}

// ==========================================
// RetryPolicy - 重试策略
// ==========================================
/// 重试策略
///
/// - max_attempts = None 时无限重试（现网行为）
/// - 每 alert_every 次尝试打一条告警日志，便于发现码源不足导致的饥饿
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub alert_every: u32,
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            alert_every: 100,
        }
    }

    pub fn decide(&self, attempts: u32) -> RetryDecision {
        match self.max_attempts {
            Some(max) if attempts >= max => RetryDecision::Exhausted,
            _ => RetryDecision::Reschedule,
        }
    }

    pub fn should_alert(&self, attempts: u32) -> bool {
        self.alert_every > 0 && attempts > 0 && attempts % self.alert_every == 0
    }

    /// 规范化延迟
    pub fn effective_delay(delay: Duration) -> Duration {
        delay.max(MIN_RETRY_DELAY)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_never_exhausts() {
        let policy = RetryPolicy::unbounded();
        assert_eq!(policy.decide(1_000_000), RetryDecision::Reschedule);
    }

    #[test]
    fn test_capped_policy_exhausts() {
        let policy = RetryPolicy {
            max_attempts: Some(3),
            alert_every: 0,
        };
        assert_eq!(policy.decide(2), RetryDecision::Reschedule);
        assert_eq!(policy.decide(3), RetryDecision::Exhausted);
        assert!(!policy.should_alert(3));
    }

    #[test]
    fn test_alert_cadence() {
        let policy = RetryPolicy {
            max_attempts: None,
            alert_every: 10,
        };
        assert!(!policy.should_alert(9));
        assert!(policy.should_alert(10));
        assert!(policy.should_alert(20));
    }

    #[test]
    fn test_zero_delay_is_clamped() {
        assert_eq!(RetryPolicy::effective_delay(Duration::ZERO), MIN_RETRY_DELAY);
        assert_eq!(
            RetryPolicy::effective_delay(Duration::from_secs(15)),
            Duration::from_secs(15)
        );
    }
}
