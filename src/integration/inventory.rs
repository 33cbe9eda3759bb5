// ==========================================
// 货柜流转系统 - 仓储系统契约
// ==========================================
// 出站: 入库申请（数量、商品标识、货柜编号）
// 入站: 收货事件（货柜编号、商品标识）
// ==========================================

use crate::domain::types::ProductIdentity;
use crate::integration::error::IntegrationResult;
use serde::{Deserialize, Serialize};

/// 入库申请
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoodsReceiptRequest {
    /// 货柜编号（SUP-{supply_id}）
    pub reference: String,
    pub line_id: String,
    pub quantity: u32,
    pub product: ProductIdentity,
}

/// 收货事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoodsReceivedEvent {
    /// 仓储系统侧事件 ID（幂等键）
    pub event_id: String,
    pub reference: String,
    pub product: ProductIdentity,
}

/// 仓储系统网关
pub trait InventoryGateway: Send + Sync {
    fn request_goods_receipt(&self, request: &GoodsReceiptRequest) -> IntegrationResult<()>;
}

/// 只记日志的网关（离线运行）
#[derive(Debug, Clone, Default)]
pub struct LoggingInventoryGateway;

impl InventoryGateway for LoggingInventoryGateway {
    fn request_goods_receipt(&self, request: &GoodsReceiptRequest) -> IntegrationResult<()> {
        tracing::info!(
            reference = %request.reference,
            line_id = %request.line_id,
            quantity = request.quantity,
            product = %request.product,
            "入库申请已发出"
        );
        Ok(())
    }
}
