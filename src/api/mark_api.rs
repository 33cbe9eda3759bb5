// ==========================================
// 货柜流转系统 - 追溯码 API
// ==========================================
// 职责: 识别失败码人工补录、追溯码查询
// ==========================================

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::domain::mark::{part_id, Mark, MarkCode, MarkStatusCounts};
use crate::domain::types::{MarkStatus, ProductIdentity, ProductRef, Resolved};
use crate::importer::barcode::{extract_gtin, resolve_barcode};
use crate::integration::ProductCatalog;
use crate::repository::MarkRepository;

/// 人工补录请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveMarkRequest {
    pub mark_id: String,
    /// 人工读出的码内容
    pub code_text: String,
    /// 不提供时按码内容中的 GTIN 查商品目录
    pub product: Option<ProductIdentity>,
}

pub struct MarkApi {
    mark_repo: Arc<MarkRepository>,
    catalog: Arc<dyn ProductCatalog>,
}

impl MarkApi {
    pub fn new(mark_repo: Arc<MarkRepository>, catalog: Arc<dyn ProductCatalog>) -> Self {
        Self { mark_repo, catalog }
    }

    /// 补录识别失败的追溯码
    ///
    /// # 规则
    /// - 仅限错误占位码且仍为 UNDEFINED
    /// - 新码内容仍按内容哈希去重
    pub fn resolve_error_mark(&self, request: &ResolveMarkRequest) -> ApiResult<Mark> {
        let text = request.code_text.trim();
        if text.is_empty() {
            return Err(ApiError::InvalidInput("码内容不能为空".to_string()));
        }

        let mark = self.get_mark(&request.mark_id)?;
        if !mark.code.is_error || mark.status != MarkStatus::Undefined {
            return Err(ApiError::BusinessRuleViolation(format!(
                "追溯码 {} 不是待处理的识别失败码",
                mark.mark_id
            )));
        }

        let code = MarkCode::decoded(text);
        if self.mark_repo.exists_by_hash(&code.content_hash)? {
            return Err(ApiError::BusinessRuleViolation("该码内容已录入".to_string()));
        }

        let gtin = extract_gtin(text);
        let product: ProductRef = match (&request.product, gtin.as_deref()) {
            (Some(product), _) => Resolved::Known(product.clone()),
            (None, Some(gtin)) => resolve_barcode(self.catalog.as_ref(), gtin)
                .map_err(|e| ApiError::InternalError(e.to_string()))?
                .into(),
            (None, None) => Resolved::Unresolved,
        };
        let part = gtin.map(|g| part_id(&g, Utc::now().date_naive()));

        if !self
            .mark_repo
            .resolve_error_code(&mark.mark_id, &code, &product, part.as_deref())?
        {
            return Err(ApiError::BusinessRuleViolation(format!(
                "追溯码 {} 已被其他操作处理",
                mark.mark_id
            )));
        }

        info!(mark_id = %mark.mark_id, "识别失败码已人工补录");
        self.get_mark(&mark.mark_id)
    }

    pub fn get_mark(&self, mark_id: &str) -> ApiResult<Mark> {
        self.mark_repo
            .find_by_id(mark_id)?
            .ok_or_else(|| ApiError::NotFound(format!("Mark(id={})不存在", mark_id)))
    }

    pub fn list_by_supply(&self, supply_id: &str) -> ApiResult<Vec<Mark>> {
        Ok(self.mark_repo.list_by_supply(supply_id)?)
    }

    pub fn status_counts(&self, user_id: &str) -> ApiResult<MarkStatusCounts> {
        Ok(self.mark_repo.status_counts(user_id)?)
    }
}
