// ==========================================
// 货柜流转系统 - 运行参数
// ==========================================
// 职责: 把 config_kv 中的零散配置物化为一个只读结构
// ==========================================

use crate::config::config_manager::{config_keys, ConfigManager};
use crate::config::intake_config_trait::IntakeConfigReader;
use crate::queue::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::time::Duration;

/// 工作流运行参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// 无候选码时预留请求的重试间隔
    pub reserve_retry_delay_secs: u64,
    /// 首次核对延迟
    pub first_check_delay_secs: u64,
    /// 核对未完成时的重试间隔
    pub check_retry_delay_secs: u64,
    /// 释放追溯码失败的重试间隔
    pub release_retry_delay_secs: u64,
    /// 仓储系统不可用时入库申请的重试间隔
    pub receipt_retry_delay_secs: u64,
    /// 重试上限（None = 无限）
    pub max_attempts: Option<u32>,
    /// 每 N 次尝试告警一次
    pub alert_every: u32,
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub mark_image_prefix: String,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            reserve_retry_delay_secs: 15,
            first_check_delay_secs: 30,
            check_retry_delay_secs: 15,
            release_retry_delay_secs: 15,
            receipt_retry_delay_secs: 15,
            max_attempts: None,
            alert_every: 100,
            poll_interval_ms: 1000,
            batch_size: 50,
            mark_image_prefix: config_keys::DEFAULT_MARK_IMAGE_PREFIX.to_string(),
        }
    }
}

impl WorkflowSettings {
    /// 从配置表加载（未配置项使用默认值）
    pub fn load(config: &ConfigManager) -> Result<Self, Box<dyn Error>> {
        let d = Self::default();
        Ok(Self {
            reserve_retry_delay_secs: config
                .get_u64_or(config_keys::RESERVE_RETRY_DELAY_SECS, d.reserve_retry_delay_secs)?,
            first_check_delay_secs: config
                .get_u64_or(config_keys::FIRST_CHECK_DELAY_SECS, d.first_check_delay_secs)?,
            check_retry_delay_secs: config
                .get_u64_or(config_keys::CHECK_RETRY_DELAY_SECS, d.check_retry_delay_secs)?,
            release_retry_delay_secs: config
                .get_u64_or(config_keys::RELEASE_RETRY_DELAY_SECS, d.release_retry_delay_secs)?,
            receipt_retry_delay_secs: config
                .get_u64_or(config_keys::RECEIPT_RETRY_DELAY_SECS, d.receipt_retry_delay_secs)?,
            max_attempts: config
                .get_optional_u64(config_keys::QUEUE_MAX_ATTEMPTS)?
                .map(|v| v.min(u32::MAX as u64) as u32),
            alert_every: config
                .get_u64_or(config_keys::QUEUE_ALERT_EVERY, d.alert_every as u64)?
                .min(u32::MAX as u64) as u32,
            poll_interval_ms: config
                .get_u64_or(config_keys::WORKER_POLL_INTERVAL_MS, d.poll_interval_ms)?,
            batch_size: config.get_u64_or(config_keys::WORKER_BATCH_SIZE, d.batch_size as u64)?
                as usize,
            mark_image_prefix: config.get_mark_image_prefix()?,
        })
    }

    pub fn reserve_retry_delay(&self) -> Duration {
        Duration::from_secs(self.reserve_retry_delay_secs)
    }

    pub fn first_check_delay(&self) -> Duration {
        Duration::from_secs(self.first_check_delay_secs)
    }

    pub fn check_retry_delay(&self) -> Duration {
        Duration::from_secs(self.check_retry_delay_secs)
    }

    pub fn release_retry_delay(&self) -> Duration {
        Duration::from_secs(self.release_retry_delay_secs)
    }

    pub fn receipt_retry_delay(&self) -> Duration {
        Duration::from_secs(self.receipt_retry_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            alert_every: self.alert_every,
        }
    }
}
