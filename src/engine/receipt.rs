// ==========================================
// 货柜流转系统 - 入库申请与收货回执
// ==========================================
// 出站: DELIVERY 时按行向仓储系统发起入库申请
// 入站: 收货事件 → 标记行已收货 → 全部收货后请求 COMPLETED
// 红线: 同一事件重复投递只生效一次（事件ID幂等 + received 守卫）
// ==========================================

use crate::domain::supply::Supply;
use crate::domain::types::{Resolved, SupplyStatus};
use crate::engine::error::{WorkflowError, WorkflowResult};
use crate::integration::{GoodsReceiptRequest, GoodsReceivedEvent, InventoryGateway};
use crate::queue::{Command, Lane, MessageQueue};
use crate::repository::SupplyRepository;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// 入库申请结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptRequestOutcome {
    Sent,
    /// 货柜已不在 DELIVERY 或行已收货
    Stale(String),
}

/// 收货事件处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceivedOutcome {
    /// 行已标记收货
    Received { completion_requested: bool },
    /// 行此前已收货
    AlreadyReceived,
    /// 货柜不在 DELIVERY，忽略
    Ignored(String),
}

// ==========================================
// GoodsReceiptRequester - 入库申请
// ==========================================
pub struct GoodsReceiptRequester {
    supply_repo: Arc<SupplyRepository>,
    gateway: Arc<dyn InventoryGateway>,
}

impl GoodsReceiptRequester {
    pub fn new(supply_repo: Arc<SupplyRepository>, gateway: Arc<dyn InventoryGateway>) -> Self {
        Self { supply_repo, gateway }
    }

    #[instrument(skip(self), fields(handler = "REQUEST_GOODS_RECEIPT"))]
    pub fn request(&self, supply_id: &str, line_id: &str) -> WorkflowResult<ReceiptRequestOutcome> {
        let supply = self
            .supply_repo
            .find_by_id(supply_id)?
            .ok_or_else(|| WorkflowError::not_found("Supply", supply_id))?;

        if supply.status != SupplyStatus::Delivery {
            return Ok(ReceiptRequestOutcome::Stale(format!(
                "货柜当前状态为 {}",
                supply.status
            )));
        }

        let line = supply
            .find_line(line_id)
            .ok_or_else(|| WorkflowError::not_found("SupplyLine", line_id))?;
        if line.received {
            return Ok(ReceiptRequestOutcome::Stale("该行已收货".to_string()));
        }

        let product = line.product.known().cloned().ok_or_else(|| {
            WorkflowError::ValidationFailure(format!("行 {} 商品未识别，无法申请入库", line_id))
        })?;

        let request = GoodsReceiptRequest {
            reference: supply.reference(),
            line_id: line.line_id.clone(),
            quantity: line.quantity,
            product,
        };
        self.gateway.request_goods_receipt(&request)?;

        tracing::info!(
            supply_id,
            line_id,
            quantity = request.quantity,
            reference = %request.reference,
            "入库申请已提交"
        );
        Ok(ReceiptRequestOutcome::Sent)
    }
}

// ==========================================
// ReceivedProductHandler - 收货回执
// ==========================================
pub struct ReceivedProductHandler {
    supply_repo: Arc<SupplyRepository>,
    queue: Arc<MessageQueue>,
}

impl ReceivedProductHandler {
    pub fn new(supply_repo: Arc<SupplyRepository>, queue: Arc<MessageQueue>) -> Self {
        Self { supply_repo, queue }
    }

    #[instrument(skip(self, event), fields(handler = "GOODS_RECEIVED", event_id = %event.event_id))]
    pub fn handle(&self, event: &GoodsReceivedEvent) -> WorkflowResult<ReceivedOutcome> {
        let supply_id = Supply::parse_reference(&event.reference).ok_or_else(|| {
            WorkflowError::ValidationFailure(format!("无法识别的货柜编号: {}", event.reference))
        })?;

        let mut supply = self
            .supply_repo
            .find_by_id(supply_id)?
            .ok_or_else(|| WorkflowError::not_found("Supply", supply_id))?;

        if supply.status != SupplyStatus::Delivery {
            tracing::warn!(
                supply_id,
                status = %supply.status,
                "货柜不在 DELIVERY 状态，忽略收货事件"
            );
            return Ok(ReceivedOutcome::Ignored(format!("货柜当前状态为 {}", supply.status)));
        }

        let line_id = supply
            .find_line_by_product(&Resolved::Known(event.product.clone()))
            .map(|l| l.line_id.clone())
            .ok_or_else(|| {
                WorkflowError::ValidationFailure(format!("货柜中没有商品 {} 对应的行", event.product))
            })?;

        if !supply.mark_line_received(&line_id) {
            tracing::debug!(supply_id, line_id = %line_id, "该行此前已收货");
            return Ok(ReceivedOutcome::AlreadyReceived);
        }

        // 乐观锁冲突转为 Transient，由队列重试
        self.supply_repo.save(&mut supply, "inventory")?;
        tracing::info!(supply_id, line_id = %line_id, "行已确认收货");

        let completion_requested = supply.all_lines_received();
        if completion_requested {
            self.queue.enqueue(
                Command::CompleteSupply {
                    supply_id: supply.supply_id.clone(),
                },
                Lane::Default,
                Duration::ZERO,
            )?;
            tracing::info!(supply_id, "全部行已收货，请求完成货柜");
        }

        Ok(ReceivedOutcome::Received {
            completion_requested,
        })
    }
}
