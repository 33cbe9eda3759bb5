// ==========================================
// 货柜流转系统 - 状态转换编排器
// ==========================================
// 职责: 校验并执行货柜状态变更，按目标状态触发副作用
// 红线: 批次内单项失败不影响其他项
// 红线: 变更前重新读取当前状态（重试消息可能晚于状态推进到达）
// ==========================================

use crate::domain::supply::Supply;
use crate::domain::types::SupplyStatus;
use crate::engine::error::{FailureKind, WorkflowError, WorkflowResult};
use crate::engine::events::{OptionalSupplyNotifier, SupplyNotice};
use crate::queue::{Command, Lane, MessageQueue};
use crate::repository::{MarkRepository, RepositoryError, SupplyRepository};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// 乐观锁冲突时重新读取的次数
const MAX_SAVE_ATTEMPTS: usize = 3;

/// 系统操作人
pub const SYSTEM_ACTOR: &str = "system";

/// 批次转换参数（整批共享）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionPayload {
    /// 报关单号（进入 CLEARANCE 时必填）
    pub declaration_number: Option<String>,
    /// 操作人
    pub actor: String,
}

impl TransitionPayload {
    pub fn by(actor: impl Into<String>) -> Self {
        Self {
            declaration_number: None,
            actor: actor.into(),
        }
    }

    pub fn system() -> Self {
        Self::by(SYSTEM_ACTOR)
    }

    pub fn with_declaration(mut self, declaration_number: impl Into<String>) -> Self {
        self.declaration_number = Some(declaration_number.into());
        self
    }
}

/// 单项转换结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEffect {
    /// 已变更并触发副作用
    Applied,
    /// 已处于目标状态，无操作
    AlreadyAtTarget,
    /// 该状态曾记录过，按重放处理
    Replayed,
}

/// 单项失败
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub supply_id: String,
    pub kind: FailureKind,
    pub message: String,
}

/// 批次结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<ItemFailure>,
}

impl TransitionReport {
    pub fn failed_ids(&self) -> Vec<String> {
        self.failed.iter().map(|f| f.supply_id.clone()).collect()
    }

    pub fn failure_of(&self, supply_id: &str) -> Option<&ItemFailure> {
        self.failed.iter().find(|f| f.supply_id == supply_id)
    }

    fn record(&mut self, supply_id: &str, result: WorkflowResult<TransitionEffect>) {
        match result {
            Ok(_) => self.succeeded.push(supply_id.to_string()),
            Err(e) => self.failed.push(ItemFailure {
                supply_id: supply_id.to_string(),
                kind: e.kind(),
                message: e.to_string(),
            }),
        }
    }
}

// ==========================================
// StatusTransitionOrchestrator
// ==========================================
pub struct StatusTransitionOrchestrator {
    supply_repo: Arc<SupplyRepository>,
    mark_repo: Arc<MarkRepository>,
    queue: Arc<MessageQueue>,
    notifier: Arc<OptionalSupplyNotifier>,
}

impl StatusTransitionOrchestrator {
    pub fn new(
        supply_repo: Arc<SupplyRepository>,
        mark_repo: Arc<MarkRepository>,
        queue: Arc<MessageQueue>,
        notifier: Arc<OptionalSupplyNotifier>,
    ) -> Self {
        Self {
            supply_repo,
            mark_repo,
            queue,
            notifier,
        }
    }

    /// 批量转换到目标状态
    ///
    /// # 返回
    /// - succeeded: 成功（含已处于目标状态）的货柜
    /// - failed: 失败项及原因
    #[instrument(skip_all, fields(target = %target, count = supply_ids.len()))]
    pub fn apply_transitions(
        &self,
        supply_ids: &[String],
        target: SupplyStatus,
        payload: &TransitionPayload,
    ) -> TransitionReport {
        self.run_batch(supply_ids, target, payload, false)
    }

    /// 按状态名批量转换（通用入口）
    ///
    /// 额外检查"该状态是否已记录过"，重复请求按成功处理且不再变更
    pub fn apply_by_name(
        &self,
        supply_ids: &[String],
        status_name: &str,
        payload: &TransitionPayload,
    ) -> TransitionReport {
        match status_name.parse::<SupplyStatus>() {
            Ok(target) => self.run_batch(supply_ids, target, payload, true),
            Err(e) => {
                let mut report = TransitionReport::default();
                for id in supply_ids {
                    report.record(id, Err(WorkflowError::ValidationFailure(e.to_string())));
                }
                report
            }
        }
    }

    /// 全部行收货后推进到 COMPLETED（系统触发）
    pub fn complete_supply(&self, supply_id: &str) -> WorkflowResult<TransitionEffect> {
        self.transition_one(supply_id, SupplyStatus::Completed, &TransitionPayload::system(), false)
    }

    fn run_batch(
        &self,
        supply_ids: &[String],
        target: SupplyStatus,
        payload: &TransitionPayload,
        replay_guard: bool,
    ) -> TransitionReport {
        let mut report = TransitionReport::default();
        for supply_id in supply_ids {
            let result = self.transition_one(supply_id, target, payload, replay_guard);
            if let Err(e) = &result {
                match e.kind() {
                    FailureKind::NotFound | FailureKind::Fatal => {
                        tracing::error!(supply_id = %supply_id, target = %target, error = %e, "货柜状态转换失败")
                    }
                    _ => tracing::warn!(supply_id = %supply_id, target = %target, error = %e, "货柜状态转换被拒绝"),
                }
            }
            report.record(supply_id, result);
        }

        tracing::info!(
            target = %target,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "批量状态转换完成"
        );
        report
    }

    fn transition_one(
        &self,
        supply_id: &str,
        target: SupplyStatus,
        payload: &TransitionPayload,
        replay_guard: bool,
    ) -> WorkflowResult<TransitionEffect> {
        self.notifier.broadcast(SupplyNotice::Hidden {
            supply_id: supply_id.to_string(),
        });

        let mut attempt = 0;
        loop {
            attempt += 1;

            let mut supply = self
                .supply_repo
                .find_by_id(supply_id)?
                .ok_or_else(|| WorkflowError::not_found("Supply", supply_id))?;

            if supply.status == target {
                tracing::debug!(supply_id, target = %target, "货柜已处于目标状态");
                // 补投上次可能丢失的副作用，幂等键保证不会重复执行
                self.apply_side_effects(&supply, target)?;
                return Ok(TransitionEffect::AlreadyAtTarget);
            }
            if replay_guard && self.supply_repo.has_recorded_status(supply_id, target)? {
                tracing::debug!(supply_id, target = %target, "目标状态已记录过，按重放处理");
                return Ok(TransitionEffect::Replayed);
            }

            let from = supply.status;
            Self::validate(&supply, target, payload)?;
            Self::mutate(&mut supply, target, payload);

            match self.supply_repo.save(&mut supply, &payload.actor) {
                Ok(()) => {
                    tracing::info!(
                        supply_id,
                        from = %from,
                        to = %target,
                        revision = supply.revision,
                        actor = %payload.actor,
                        "货柜状态已变更"
                    );
                    self.apply_side_effects(&supply, target)?;
                    return Ok(TransitionEffect::Applied);
                }
                Err(RepositoryError::OptimisticLockFailure { .. }) if attempt < MAX_SAVE_ATTEMPTS => {
                    tracing::debug!(supply_id, attempt, "货柜并发修改，重新读取");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// 合法性与目标状态前置条件
    fn validate(supply: &Supply, target: SupplyStatus, payload: &TransitionPayload) -> WorkflowResult<()> {
        if !target.accepts_from(supply.status) {
            return Err(WorkflowError::ValidationFailure(format!(
                "非法状态转换: {} → {}",
                supply.status, target
            )));
        }

        match target {
            SupplyStatus::Clearance | SupplyStatus::Delivery => {
                let unresolved = supply.unresolved_lines();
                if !unresolved.is_empty() {
                    return Err(WorkflowError::ValidationFailure(format!(
                        "存在 {} 行商品未识别",
                        unresolved.len()
                    )));
                }
                if target == SupplyStatus::Clearance {
                    let has_declaration = payload
                        .declaration_number
                        .as_deref()
                        .map(|d| !d.trim().is_empty())
                        .unwrap_or(false);
                    if !has_declaration {
                        return Err(WorkflowError::ValidationFailure("缺少报关单号".to_string()));
                    }
                }
            }
            SupplyStatus::Completed => {
                if !supply.all_lines_received() {
                    return Err(WorkflowError::ValidationFailure("仍有行未收货".to_string()));
                }
            }
            SupplyStatus::New | SupplyStatus::Cleared | SupplyStatus::Canceled => {}
        }
        Ok(())
    }

    fn mutate(supply: &mut Supply, target: SupplyStatus, payload: &TransitionPayload) {
        supply.status = target;
        match target {
            SupplyStatus::Clearance => {
                supply.invariable.declaration_number = payload
                    .declaration_number
                    .as_ref()
                    .map(|d| d.trim().to_string());
            }
            SupplyStatus::Canceled => supply.unlock(),
            _ => {}
        }
    }

    /// 落库后的副作用，全部异步投递
    ///
    /// 投递失败时状态已变更，返回 Transient；同一目标状态再次请求会补投
    fn apply_side_effects(&self, supply: &Supply, target: SupplyStatus) -> WorkflowResult<()> {
        let result = match target {
            SupplyStatus::Cleared => self.enqueue_comments(supply),
            SupplyStatus::Delivery => self.enqueue_receipt_requests(supply),
            SupplyStatus::Completed => self.enqueue_releases(supply),
            _ => Ok(0),
        };
        match result {
            Ok(n) => {
                if n > 0 {
                    tracing::info!(supply_id = %supply.supply_id, target = %target, commands = n, "副作用已投递");
                }
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    supply_id = %supply.supply_id,
                    target = %target,
                    error = %e,
                    "副作用投递失败"
                );
                Err(WorkflowError::Transient(format!(
                    "状态已变更为 {}，副作用投递失败: {}",
                    target, e
                )))
            }
        }
    }

    fn enqueue_comments(&self, supply: &Supply) -> WorkflowResult<usize> {
        let Some(comment) = supply.invariable.declaration_number.clone() else {
            tracing::warn!(supply_id = %supply.supply_id, "货柜无报关单号，跳过追溯码备注");
            return Ok(0);
        };
        let mut count = 0;
        for mark in self.mark_repo.list_by_supply(&supply.supply_id)? {
            let enqueued = self.queue.enqueue(
                Command::CommentMark {
                    mark_id: mark.mark_id,
                    supply_id: supply.supply_id.clone(),
                    comment: comment.clone(),
                },
                Lane::Default,
                Duration::ZERO,
            )?;
            count += enqueued.is_some() as usize;
        }
        Ok(count)
    }

    fn enqueue_receipt_requests(&self, supply: &Supply) -> WorkflowResult<usize> {
        let mut count = 0;
        for line in &supply.lines {
            let enqueued = self.queue.enqueue(
                Command::RequestGoodsReceipt {
                    supply_id: supply.supply_id.clone(),
                    line_id: line.line_id.clone(),
                },
                Lane::Default,
                Duration::ZERO,
            )?;
            count += enqueued.is_some() as usize;
        }
        Ok(count)
    }

    fn enqueue_releases(&self, supply: &Supply) -> WorkflowResult<usize> {
        let mut count = 0;
        for mark in self.mark_repo.list_by_supply(&supply.supply_id)? {
            let enqueued = self.queue.enqueue(
                Command::ReleaseMark {
                    mark_id: mark.mark_id,
                    supply_id: supply.supply_id.clone(),
                },
                Lane::Default,
                Duration::ZERO,
            )?;
            count += enqueued.is_some() as usize;
        }
        Ok(count)
    }
}
