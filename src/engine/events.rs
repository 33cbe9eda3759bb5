// ==========================================
// 货柜流转系统 - 货柜可见性通知
// ==========================================
// 职责: 定义广播 trait，实现依赖倒置
// 说明: 通知是尽力而为的，失败只记日志，不影响业务流程
// ==========================================

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;

// ==========================================
// 通知类型
// ==========================================

/// 货柜可见性变化
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupplyNotice {
    /// 状态变更开始，其他操作者隐藏该货柜
    Hidden { supply_id: String },
    /// 追溯码分配完成，解除锁定
    Unlocked { supply_id: String },
}

impl SupplyNotice {
    pub fn as_str(&self) -> &str {
        match self {
            SupplyNotice::Hidden { .. } => "Hidden",
            SupplyNotice::Unlocked { .. } => "Unlocked",
        }
    }

    pub fn supply_id(&self) -> &str {
        match self {
            SupplyNotice::Hidden { supply_id } | SupplyNotice::Unlocked { supply_id } => supply_id,
        }
    }
}

// ==========================================
// 广播 Trait
// ==========================================

/// 货柜通知广播者
///
/// # 实现说明
/// - 推送到前端/其他会话的发布订阅通道
/// - 调用方不等待确认
pub trait SupplyNotifier: Send + Sync {
    fn broadcast(&self, notice: &SupplyNotice) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// 空操作广播者
#[derive(Debug, Clone, Default)]
pub struct NoOpSupplyNotifier;

impl SupplyNotifier for NoOpSupplyNotifier {
    fn broadcast(&self, notice: &SupplyNotice) -> Result<(), Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            supply_id = notice.supply_id(),
            notice = notice.as_str(),
            "NoOpSupplyNotifier: 跳过广播"
        );
        Ok(())
    }
}

/// 可选广播者包装
///
/// 简化 Option<Arc<dyn SupplyNotifier>> 的使用，并吞掉广播失败
pub struct OptionalSupplyNotifier {
    inner: Option<Arc<dyn SupplyNotifier>>,
}

impl OptionalSupplyNotifier {
    pub fn with_notifier(notifier: Arc<dyn SupplyNotifier>) -> Self {
        Self {
            inner: Some(notifier),
        }
    }

    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 广播（失败只记日志）
    ///
    /// # 返回
    /// - true: 已送达广播者
    /// - false: 未配置或广播失败
    pub fn broadcast(&self, notice: SupplyNotice) -> bool {
        match &self.inner {
            Some(notifier) => match notifier.broadcast(&notice) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(
                        supply_id = notice.supply_id(),
                        notice = notice.as_str(),
                        error = %e,
                        "货柜通知广播失败"
                    );
                    false
                }
            },
            None => false,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalSupplyNotifier {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingNotifier;

    impl SupplyNotifier for FailingNotifier {
        fn broadcast(&self, _notice: &SupplyNotice) -> Result<(), Box<dyn Error + Send + Sync>> {
            Err("channel closed".into())
        }
    }

    #[test]
    fn test_optional_notifier_none() {
        let notifier = OptionalSupplyNotifier::none();
        assert!(!notifier.is_configured());
        assert!(!notifier.broadcast(SupplyNotice::Unlocked {
            supply_id: "s1".into()
        }));
    }

    #[test]
    fn test_broadcast_failure_is_swallowed() {
        let notifier = OptionalSupplyNotifier::with_notifier(Arc::new(FailingNotifier));
        assert!(!notifier.broadcast(SupplyNotice::Hidden {
            supply_id: "s1".into()
        }));
    }

    #[test]
    fn test_notice_serializes_with_type_tag() {
        let json = serde_json::to_value(SupplyNotice::Unlocked {
            supply_id: "s1".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "UNLOCKED");
        assert_eq!(json["supply_id"], "s1");
    }
}
