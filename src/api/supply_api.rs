// ==========================================
// 货柜流转系统 - 货柜 API
// ==========================================
// 职责: 批量状态变更、人工建柜、查询、收货事件接入
// ==========================================

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::api::validator::{StatusChangeRequest, StatusChangeValidator};
use crate::domain::supply::{Supply, SupplyVersion};
use crate::domain::types::{Owner, ProductIdentity, ProductRef, Resolved, SupplyStatus};
use crate::engine::{ItemFailure, MarkAllocationEngine, StatusTransitionOrchestrator};
use crate::i18n::{t, t_with_args};
use crate::importer::barcode::resolve_barcode;
use crate::integration::{GoodsReceivedEvent, ProductCatalog};
use crate::queue::{Command, Lane, MessageQueue};
use crate::repository::SupplyRepository;

// ==========================================
// 请求 / 响应
// ==========================================

/// 批量状态变更响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatusResponse {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub message: String,
    /// 失败明细（类型 + 原因）
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub failures: Vec<ItemFailure>,
}

/// 人工建柜的一行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLineRequest {
    /// 条码（与 product 二选一，都给时以 product 为准）
    pub barcode: Option<String>,
    pub product: Option<ProductIdentity>,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSupplyRequest {
    pub container_number: String,
    pub owner: Owner,
    pub lines: Vec<CreateLineRequest>,
}

// ==========================================
// SupplyApi - 货柜 API
// ==========================================
pub struct SupplyApi {
    supply_repo: Arc<SupplyRepository>,
    catalog: Arc<dyn ProductCatalog>,
    allocation: Arc<MarkAllocationEngine>,
    transitions: Arc<StatusTransitionOrchestrator>,
    queue: Arc<MessageQueue>,
}

impl SupplyApi {
    pub fn new(
        supply_repo: Arc<SupplyRepository>,
        catalog: Arc<dyn ProductCatalog>,
        allocation: Arc<MarkAllocationEngine>,
        transitions: Arc<StatusTransitionOrchestrator>,
        queue: Arc<MessageQueue>,
    ) -> Self {
        Self {
            supply_repo,
            catalog,
            allocation,
            transitions,
            queue,
        }
    }

    // ==========================================
    // 状态变更
    // ==========================================

    /// 批量变更状态
    ///
    /// # 返回
    /// - Ok(BatchStatusResponse): 单项失败不影响其他项
    /// - Err(ApiError): 请求本身不合法（ID为空、状态不允许人工触发等）
    #[instrument(skip(self, request), fields(target = %request.target_status, count = request.supply_ids.len()))]
    pub fn change_status(&self, request: &StatusChangeRequest) -> ApiResult<BatchStatusResponse> {
        let command = StatusChangeValidator::validate(request)?;
        let report = self.transitions.apply_transitions(
            command.supply_ids(),
            command.target(),
            command.payload(),
        );
        Ok(Self::to_response(report.succeeded, report.failed))
    }

    /// 按状态名变更（通用入口，带重放保护）
    #[instrument(skip(self, request), fields(target = %request.target_status, count = request.supply_ids.len()))]
    pub fn change_status_by_name(&self, request: &StatusChangeRequest) -> ApiResult<BatchStatusResponse> {
        let command = StatusChangeValidator::validate(request)?;
        let report = self.transitions.apply_by_name(
            command.supply_ids(),
            command.target().as_str(),
            command.payload(),
        );
        Ok(Self::to_response(report.succeeded, report.failed))
    }

    fn to_response(succeeded: Vec<String>, failures: Vec<ItemFailure>) -> BatchStatusResponse {
        let message = if failures.is_empty() {
            t("common.success")
        } else {
            t_with_args(
                "supply.batch_status",
                &[
                    ("succeeded", &succeeded.len().to_string()),
                    ("failed", &failures.len().to_string()),
                ],
            )
        };
        BatchStatusResponse {
            failed: failures.iter().map(|f| f.supply_id.clone()).collect(),
            succeeded,
            message,
            failures,
        }
    }

    // ==========================================
    // 人工建柜
    // ==========================================

    /// 人工录入货柜，与清单录入走同一条落库 + 启动分配路径
    #[instrument(skip(self, request), fields(container_number = %request.container_number))]
    pub fn create_supply(&self, request: &CreateSupplyRequest, actor: &str) -> ApiResult<Supply> {
        let container_number = request.container_number.trim();
        if container_number.is_empty() {
            return Err(ApiError::InvalidInput("柜号不能为空".to_string()));
        }
        if request.lines.is_empty() {
            return Err(ApiError::InvalidInput("至少需要一行".to_string()));
        }
        if self
            .supply_repo
            .exists_by_container(container_number, &request.owner, SupplyStatus::New)?
        {
            return Err(ApiError::BusinessRuleViolation(format!(
                "柜号 {} 已存在",
                container_number
            )));
        }

        let mut supply = Supply::new(container_number, request.owner.clone());
        for (idx, line) in request.lines.iter().enumerate() {
            if line.quantity == 0 {
                return Err(ApiError::InvalidInput(format!("第{}行数量必须大于0", idx + 1)));
            }
            let product: ProductRef = match (&line.product, &line.barcode) {
                (Some(product), _) => Resolved::Known(product.clone()),
                (None, Some(barcode)) => resolve_barcode(self.catalog.as_ref(), barcode)
                    .map_err(|e| ApiError::InternalError(e.to_string()))?
                    .into(),
                (None, None) => {
                    return Err(ApiError::InvalidInput(format!(
                        "第{}行需要条码或商品标识",
                        idx + 1
                    )))
                }
            };
            supply.add_line(product, line.barcode.clone(), line.quantity);
        }

        let scheduled = self.allocation.admit(&mut supply, actor)?;
        info!(supply_id = %supply.supply_id, scheduled, "人工建柜完成");
        Ok(supply)
    }

    // ==========================================
    // 查询接口
    // ==========================================

    pub fn get_supply(&self, supply_id: &str) -> ApiResult<Supply> {
        self.supply_repo
            .find_by_id(supply_id)?
            .ok_or_else(|| ApiError::NotFound(format!("Supply(id={})不存在", supply_id)))
    }

    pub fn list_by_status(&self, status_name: &str) -> ApiResult<Vec<Supply>> {
        let status: SupplyStatus = status_name
            .parse()
            .map_err(|e: crate::domain::types::UnknownStatus| ApiError::InvalidInput(e.to_string()))?;
        Ok(self.supply_repo.list_by_status(status)?)
    }

    /// 货柜变更历史（按 revision 升序）
    pub fn history(&self, supply_id: &str) -> ApiResult<Vec<SupplyVersion>> {
        let versions = self.supply_repo.history(supply_id)?;
        if versions.is_empty() {
            return Err(ApiError::NotFound(format!("Supply(id={})不存在", supply_id)));
        }
        Ok(versions)
    }

    // ==========================================
    // 仓储系统回调
    // ==========================================

    /// 接收"已收货"事件，入队异步处理
    ///
    /// # 返回
    /// - Ok(true): 已入队
    /// - Ok(false): 同一事件已处理或排队中
    pub fn receive_goods_event(&self, event: GoodsReceivedEvent) -> ApiResult<bool> {
        if event.event_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("事件ID不能为空".to_string()));
        }
        let event_id = event.event_id.clone();
        let enqueued = self
            .queue
            .enqueue(Command::GoodsReceived { event }, Lane::Default, Duration::ZERO)?;
        if enqueued.is_none() {
            warn!(event_id = %event_id, "重复的收货事件，已忽略");
        }
        Ok(enqueued.is_some())
    }
}
