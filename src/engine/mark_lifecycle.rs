// ==========================================
// 货柜流转系统 - 追溯码生命周期副作用
// ==========================================
// CLEARED: 写入报关单号备注
// COMPLETED: SUPPLY → NEW 释放到流通
// 录入后: 上传图片到 CDN
// ==========================================

use crate::domain::types::MarkStatus;
use crate::engine::error::{WorkflowError, WorkflowResult};
use crate::integration::FileStorage;
use crate::repository::MarkRepository;
use std::path::Path;
use std::sync::Arc;
use tracing::instrument;

/// 副作用结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkEffect {
    Applied,
    /// 已生效过或追溯码已不属于该货柜
    Stale(String),
}

pub struct MarkLifecycleService {
    mark_repo: Arc<MarkRepository>,
    storage: Arc<dyn FileStorage>,
    image_prefix: String,
}

impl MarkLifecycleService {
    pub fn new(
        mark_repo: Arc<MarkRepository>,
        storage: Arc<dyn FileStorage>,
        image_prefix: impl Into<String>,
    ) -> Self {
        Self {
            mark_repo,
            storage,
            image_prefix: image_prefix.into(),
        }
    }

    /// 写入备注（报关单号）
    #[instrument(skip(self, comment), fields(handler = "COMMENT_MARK"))]
    pub fn comment(&self, mark_id: &str, supply_id: &str, comment: &str) -> WorkflowResult<MarkEffect> {
        let mark = self
            .mark_repo
            .find_by_id(mark_id)?
            .ok_or_else(|| WorkflowError::not_found("Mark", mark_id))?;

        if mark.supply_id.as_deref() != Some(supply_id) {
            return Ok(MarkEffect::Stale("追溯码已不属于该货柜".to_string()));
        }
        if mark.comment.as_deref() == Some(comment) {
            return Ok(MarkEffect::Stale("备注已写入".to_string()));
        }

        self.mark_repo.set_comment(mark_id, comment)?;
        tracing::debug!(mark_id, supply_id, "追溯码备注已写入");
        Ok(MarkEffect::Applied)
    }

    /// 释放到流通
    #[instrument(skip(self), fields(handler = "RELEASE_MARK"))]
    pub fn release(&self, mark_id: &str, supply_id: &str) -> WorkflowResult<MarkEffect> {
        if self.mark_repo.release(mark_id, supply_id)? {
            tracing::info!(mark_id, supply_id, "追溯码已释放到流通");
            return Ok(MarkEffect::Applied);
        }

        let mark = self
            .mark_repo
            .find_by_id(mark_id)?
            .ok_or_else(|| WorkflowError::not_found("Mark", mark_id))?;

        match mark.status {
            MarkStatus::New => Ok(MarkEffect::Stale("追溯码已释放".to_string())),
            MarkStatus::Supply if mark.supply_id.as_deref() != Some(supply_id) => {
                Ok(MarkEffect::Stale("追溯码已属于其他货柜".to_string()))
            }
            status => Err(WorkflowError::Transient(format!(
                "追溯码当前状态 {} 无法释放",
                status
            ))),
        }
    }

    /// 上传追溯码图片并回写引用
    #[instrument(skip(self), fields(handler = "UPLOAD_MARK_IMAGE"))]
    pub fn upload_image(&self, mark_id: &str, image_path: &str) -> WorkflowResult<MarkEffect> {
        let source = Path::new(image_path);
        if !source.is_file() {
            return Err(WorkflowError::ValidationFailure(format!(
                "图片文件不存在: {}",
                image_path
            )));
        }

        let ext = source
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "png".to_string());
        let key = format!("{}/{}.{}", self.image_prefix, mark_id, ext);

        let reference = self.storage.store(&key, source)?;
        if !self.mark_repo.set_image_ref(mark_id, &reference)? {
            return Err(WorkflowError::not_found("Mark", mark_id));
        }
        tracing::debug!(mark_id, reference = %reference, "追溯码图片已上传");
        Ok(MarkEffect::Applied)
    }
}
