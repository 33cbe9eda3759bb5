// ==========================================
// 货柜流转系统 - 追溯码分配引擎
// ==========================================
// 职责: 为进入 NEW 的货柜按单位预留追溯码，核对完成后解除锁定
// 红线: 占用必须是条件写（CAS），一个单位最多占用一个码
// 红线: 处理器内不等待；无候选时交由队列延迟重试
// ==========================================

use crate::config::WorkflowSettings;
use crate::domain::mark::reservation_key;
use crate::domain::supply::{Supply, LOCK_CONTEXT_ALLOCATION};
use crate::domain::types::{product_label, SupplyStatus};
use crate::engine::error::{WorkflowError, WorkflowResult};
use crate::engine::events::{OptionalSupplyNotifier, SupplyNotice};
use crate::queue::{Command, Lane, MessageQueue};
use crate::repository::{MarkRepository, SupplyRepository};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// 同一条预留请求内，被抢占后立即换下一个候选的次数上限
const MAX_CLAIM_ROUNDS: usize = 8;

/// 预留结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// 本次占用成功
    Claimed { mark_id: String },
    /// 该单位已占用过（重复投递）
    AlreadyReserved { mark_id: String },
    /// 暂无候选码
    NoCandidate,
    /// 候选码均被并发抢走
    Contended,
    /// 请求已过期（货柜终态、单位越界）
    Stale(String),
}

/// 核对结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// 本行已满足，其余行仍在进行
    LineSatisfied,
    /// 全部行已满足，锁已解除
    Unlocked,
    /// 数量不足，继续核对
    Pending { linked: i64, requested: u32 },
    /// 数量超出（不应出现）
    Anomaly { linked: i64, requested: u32 },
    /// 请求已过期
    Stale(String),
}

// ==========================================
// MarkAllocationEngine
// ==========================================
pub struct MarkAllocationEngine {
    supply_repo: Arc<SupplyRepository>,
    mark_repo: Arc<MarkRepository>,
    queue: Arc<MessageQueue>,
    notifier: Arc<OptionalSupplyNotifier>,
    settings: WorkflowSettings,
}

impl MarkAllocationEngine {
    pub fn new(
        supply_repo: Arc<SupplyRepository>,
        mark_repo: Arc<MarkRepository>,
        queue: Arc<MessageQueue>,
        notifier: Arc<OptionalSupplyNotifier>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            supply_repo,
            mark_repo,
            queue,
            notifier,
            settings,
        }
    }

    /// 新货柜入库并启动分配
    ///
    /// 有需求数量时加分配锁，落库后按单位投递预留请求、按行投递核对
    ///
    /// # 返回
    /// - 投递的预留请求数量
    #[instrument(skip(self, supply), fields(supply_id = %supply.supply_id))]
    pub fn admit(&self, supply: &mut Supply, actor: &str) -> WorkflowResult<usize> {
        if supply.total_quantity() > 0 {
            supply.lock(LOCK_CONTEXT_ALLOCATION);
        }
        self.supply_repo.insert(supply, actor)?;
        self.schedule_for_supply(supply)
    }

    /// 为货柜投递预留请求与核对请求
    pub fn schedule_for_supply(&self, supply: &Supply) -> WorkflowResult<usize> {
        let mut reservations = 0;
        for line in &supply.lines {
            for unit in 0..line.quantity {
                let enqueued = self.queue.enqueue(
                    Command::ReserveMark {
                        supply_id: supply.supply_id.clone(),
                        line_id: line.line_id.clone(),
                        unit,
                    },
                    Lane::Default,
                    Duration::ZERO,
                )?;
                if enqueued.is_some() {
                    reservations += 1;
                }
            }

            self.queue.enqueue(
                Command::CheckAllocation {
                    supply_id: supply.supply_id.clone(),
                    line_id: line.line_id.clone(),
                },
                Lane::Default,
                self.settings.first_check_delay(),
            )?;
        }

        tracing::info!(
            supply_id = %supply.supply_id,
            lines = supply.lines.len(),
            reservations,
            "追溯码分配已启动"
        );
        Ok(reservations)
    }

    /// 为某行的一个单位预留追溯码
    ///
    /// # 说明
    /// - 候选: UNDEFINED、未关联、商品复合键一致（unknown 只匹配 unknown）
    /// - 排序: 本档案优先，modified_at 最早，part_id 升序
    /// - 被并发抢占时立即换下一个候选
    #[instrument(skip(self), fields(handler = "RESERVE_MARK"))]
    pub fn reserve(&self, supply_id: &str, line_id: &str, unit: u32) -> WorkflowResult<ReserveOutcome> {
        let supply = self
            .supply_repo
            .find_by_id(supply_id)?
            .ok_or_else(|| WorkflowError::not_found("Supply", supply_id))?;

        if supply.status.is_terminal() {
            return Ok(ReserveOutcome::Stale(format!("货柜已处于终态 {}", supply.status)));
        }

        let line = supply
            .find_line(line_id)
            .ok_or_else(|| WorkflowError::not_found("SupplyLine", line_id))?;

        if unit >= line.quantity {
            return Ok(ReserveOutcome::Stale(format!(
                "单位序号 {} 超出行数量 {}",
                unit, line.quantity
            )));
        }

        let key = reservation_key(supply_id, line_id, unit);
        if let Some(mark) = self.mark_repo.find_by_reservation_key(&key)? {
            self.comment_late_claim(supply_id, &mark.mark_id)?;
            return Ok(ReserveOutcome::AlreadyReserved {
                mark_id: mark.mark_id,
            });
        }

        for _ in 0..MAX_CLAIM_ROUNDS {
            let Some(mark_id) = self.mark_repo.find_candidate(&line.product, &supply.owner)? else {
                tracing::debug!(
                    supply_id,
                    line_id,
                    unit,
                    product = %product_label(&line.product),
                    "暂无可用追溯码"
                );
                return Ok(ReserveOutcome::NoCandidate);
            };

            if self.mark_repo.try_claim(&mark_id, supply_id, &key)? {
                tracing::info!(supply_id, line_id, unit, mark_id = %mark_id, "追溯码已预留");
                self.comment_late_claim(supply_id, &mark_id)?;
                return Ok(ReserveOutcome::Claimed { mark_id });
            }

            // 预留键被同一单位的重复投递占用
            if let Some(mark) = self.mark_repo.find_by_reservation_key(&key)? {
                return Ok(ReserveOutcome::AlreadyReserved {
                    mark_id: mark.mark_id,
                });
            }
            tracing::debug!(supply_id, line_id, unit, mark_id = %mark_id, "候选码已被抢占，换下一个");
        }

        Ok(ReserveOutcome::Contended)
    }

    /// 货柜已过 CLEARED 才占到的码，补投报关单号备注
    ///
    /// 占用后重新读取货柜状态，与状态转换时的批量备注互补
    fn comment_late_claim(&self, supply_id: &str, mark_id: &str) -> WorkflowResult<()> {
        let Some(supply) = self.supply_repo.find_by_id(supply_id)? else {
            return Ok(());
        };
        if !matches!(supply.status, SupplyStatus::Cleared | SupplyStatus::Delivery) {
            return Ok(());
        }
        let Some(comment) = supply.invariable.declaration_number else {
            return Ok(());
        };

        let enqueued = self
            .queue
            .enqueue(
                Command::CommentMark {
                    mark_id: mark_id.to_string(),
                    supply_id: supply_id.to_string(),
                    comment,
                },
                Lane::Default,
                Duration::ZERO,
            )
            .map_err(|e| WorkflowError::Transient(format!("备注投递失败: {}", e)))?;
        if enqueued.is_some() {
            tracing::info!(supply_id, mark_id, status = %supply.status, "晚到的追溯码补投备注");
        }
        Ok(())
    }

    /// 核对某行的预留数量
    ///
    /// 全部行都满足时解除分配锁并广播 Unlocked
    #[instrument(skip(self), fields(handler = "CHECK_ALLOCATION"))]
    pub fn check_completion(&self, supply_id: &str, line_id: &str) -> WorkflowResult<CheckOutcome> {
        let mut supply = self
            .supply_repo
            .find_by_id(supply_id)?
            .ok_or_else(|| WorkflowError::not_found("Supply", supply_id))?;

        if supply.status.is_terminal() {
            return Ok(CheckOutcome::Stale(format!("货柜已处于终态 {}", supply.status)));
        }

        let line = supply
            .find_line(line_id)
            .ok_or_else(|| WorkflowError::not_found("SupplyLine", line_id))?;

        let linked = self.mark_repo.count_linked(supply_id, &line.product)?;
        let requested = line.quantity;

        if linked > requested as i64 {
            tracing::error!(
                supply_id,
                line_id,
                linked,
                requested,
                "关联追溯码数量超过需求数量"
            );
            return Ok(CheckOutcome::Anomaly { linked, requested });
        }
        if linked < requested as i64 {
            tracing::debug!(supply_id, line_id, linked, requested, "追溯码预留未完成");
            return Ok(CheckOutcome::Pending { linked, requested });
        }

        for other in supply.lines.iter().filter(|l| l.line_id != line_id) {
            let other_linked = self.mark_repo.count_linked(supply_id, &other.product)?;
            if other_linked < other.quantity as i64 {
                return Ok(CheckOutcome::LineSatisfied);
            }
        }

        if supply.lock.locked {
            supply.unlock();
            self.supply_repo.save(&mut supply, "allocation")?;
        }
        self.notifier.broadcast(SupplyNotice::Unlocked {
            supply_id: supply_id.to_string(),
        });
        tracing::info!(supply_id, "追溯码分配完成，货柜已解锁");

        Ok(CheckOutcome::Unlocked)
    }
}
