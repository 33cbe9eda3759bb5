// ==========================================
// 货柜流转系统 - 命令分发
// ==========================================
// 职责: 把队列命令交给对应服务，并把业务结果翻译为队列处理结果
// 映射:
// - NotFound / ValidationFailure / Fatal → Failed
// - Duplicate / Stale → Skip
// - Transient / 无候选 / 未完成 → Retry
// ==========================================

use crate::config::WorkflowSettings;
use crate::engine::allocation::{CheckOutcome, MarkAllocationEngine, ReserveOutcome};
use crate::engine::error::WorkflowError;
use crate::engine::mark_lifecycle::{MarkEffect, MarkLifecycleService};
use crate::engine::receipt::{
    GoodsReceiptRequester, ReceiptRequestOutcome, ReceivedOutcome, ReceivedProductHandler,
};
use crate::engine::transition::StatusTransitionOrchestrator;
use crate::queue::{Command, CommandHandler, HandlerOutcome, Lane};
use std::sync::Arc;
use std::time::Duration;

pub struct WorkflowDispatcher {
    allocation: Arc<MarkAllocationEngine>,
    transitions: Arc<StatusTransitionOrchestrator>,
    receipt_requester: Arc<GoodsReceiptRequester>,
    received_handler: Arc<ReceivedProductHandler>,
    marks: Arc<MarkLifecycleService>,
    settings: WorkflowSettings,
}

impl WorkflowDispatcher {
    pub fn new(
        allocation: Arc<MarkAllocationEngine>,
        transitions: Arc<StatusTransitionOrchestrator>,
        receipt_requester: Arc<GoodsReceiptRequester>,
        received_handler: Arc<ReceivedProductHandler>,
        marks: Arc<MarkLifecycleService>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            allocation,
            transitions,
            receipt_requester,
            received_handler,
            marks,
            settings,
        }
    }

    /// 错误 → 处理结果
    ///
    /// # 参数
    /// - retry_delay: Transient 时的重试间隔
    fn on_error(err: WorkflowError, retry_delay: Duration) -> HandlerOutcome {
        match err {
            WorkflowError::Transient(reason) => HandlerOutcome::retry(retry_delay, reason),
            WorkflowError::Duplicate(reason) => HandlerOutcome::skip(reason),
            other => HandlerOutcome::Failed(other.to_string()),
        }
    }

    fn on_mark_effect(result: Result<MarkEffect, WorkflowError>, retry_delay: Duration) -> HandlerOutcome {
        match result {
            Ok(MarkEffect::Applied) => HandlerOutcome::Done,
            Ok(MarkEffect::Stale(reason)) => HandlerOutcome::skip(reason),
            Err(e) => Self::on_error(e, retry_delay),
        }
    }
}

impl CommandHandler for WorkflowDispatcher {
    fn handle(&self, command: &Command, attempt: u32) -> HandlerOutcome {
        let s = &self.settings;
        match command {
            Command::ReserveMark {
                supply_id,
                line_id,
                unit,
            } => match self.allocation.reserve(supply_id, line_id, *unit) {
                Ok(ReserveOutcome::Claimed { .. }) => HandlerOutcome::Done,
                Ok(ReserveOutcome::AlreadyReserved { mark_id }) => {
                    HandlerOutcome::skip(format!("单位已占用追溯码 {}", mark_id))
                }
                Ok(ReserveOutcome::NoCandidate) => HandlerOutcome::retry_on(
                    Lane::LowPriority,
                    s.reserve_retry_delay(),
                    "暂无可用追溯码",
                ),
                Ok(ReserveOutcome::Contended) => HandlerOutcome::retry_on(
                    Lane::LowPriority,
                    s.reserve_retry_delay(),
                    "候选码争用激烈",
                ),
                Ok(ReserveOutcome::Stale(reason)) => HandlerOutcome::skip(reason),
                Err(e) => Self::on_error(e, s.reserve_retry_delay()),
            },

            Command::CheckAllocation { supply_id, line_id } => {
                match self.allocation.check_completion(supply_id, line_id) {
                    Ok(CheckOutcome::Unlocked) | Ok(CheckOutcome::LineSatisfied) => HandlerOutcome::Done,
                    Ok(CheckOutcome::Pending { linked, requested }) => HandlerOutcome::retry(
                        s.check_retry_delay(),
                        format!("已预留 {}/{}", linked, requested),
                    ),
                    Ok(CheckOutcome::Anomaly { linked, requested }) => HandlerOutcome::Failed(
                        format!("关联数量异常 {}/{}", linked, requested),
                    ),
                    Ok(CheckOutcome::Stale(reason)) => HandlerOutcome::skip(reason),
                    Err(e) => Self::on_error(e, s.check_retry_delay()),
                }
            }

            Command::CommentMark {
                mark_id,
                supply_id,
                comment,
            } => Self::on_mark_effect(
                self.marks.comment(mark_id, supply_id, comment),
                s.release_retry_delay(),
            ),

            Command::RequestGoodsReceipt { supply_id, line_id } => {
                match self.receipt_requester.request(supply_id, line_id) {
                    Ok(ReceiptRequestOutcome::Sent) => HandlerOutcome::Done,
                    Ok(ReceiptRequestOutcome::Stale(reason)) => HandlerOutcome::skip(reason),
                    Err(e) => Self::on_error(e, s.receipt_retry_delay()),
                }
            }

            Command::GoodsReceived { event } => match self.received_handler.handle(event) {
                Ok(ReceivedOutcome::Received { .. }) => HandlerOutcome::Done,
                Ok(ReceivedOutcome::AlreadyReceived) => HandlerOutcome::skip("该行此前已收货"),
                Ok(ReceivedOutcome::Ignored(reason)) => HandlerOutcome::skip(reason),
                Err(e) => Self::on_error(e, s.receipt_retry_delay()),
            },

            Command::CompleteSupply { supply_id } => {
                match self.transitions.complete_supply(supply_id) {
                    Ok(_) => HandlerOutcome::Done,
                    // 收货与状态不一致（例如已取消），无需再推进
                    Err(WorkflowError::ValidationFailure(reason)) => HandlerOutcome::skip(reason),
                    Err(e) => Self::on_error(e, s.release_retry_delay()),
                }
            }

            Command::ReleaseMark { mark_id, supply_id } => {
                let result = self.marks.release(mark_id, supply_id);
                if let Err(e) = &result {
                    tracing::warn!(mark_id = %mark_id, supply_id = %supply_id, attempt, error = %e, "追溯码释放失败");
                }
                Self::on_mark_effect(result, s.release_retry_delay())
            }

            Command::UploadMarkImage { mark_id, image_path } => Self::on_mark_effect(
                self.marks.upload_image(mark_id, image_path),
                s.release_retry_delay(),
            ),
        }
    }
}
