// ==========================================
// 货柜流转系统 - 录入 API
// ==========================================
// 职责: 封装清单录入、扫描件录入
// ==========================================

use std::path::Path;
use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::config::IntakeConfigReader;
use crate::domain::types::Owner;
use crate::importer::{
    ManifestImportReport, ManifestImporter, ManifestImporterImpl, MarkImportReport, MarkImporter,
    MarkImporterImpl,
};

/// 录入API
pub struct ImportApi<C>
where
    C: IntakeConfigReader,
{
    manifest_importer: Arc<ManifestImporterImpl<C>>,
    mark_importer: Arc<MarkImporterImpl>,
}

impl<C> ImportApi<C>
where
    C: IntakeConfigReader,
{
    pub fn new(
        manifest_importer: Arc<ManifestImporterImpl<C>>,
        mark_importer: Arc<MarkImporterImpl>,
    ) -> Self {
        Self {
            manifest_importer,
            mark_importer,
        }
    }

    /// 录入清单文件
    ///
    /// # 参数
    /// - file_path: .xlsx / .xls / .csv
    /// - owner: 货柜归属
    /// - actor: 操作人
    pub async fn import_manifest(
        &self,
        file_path: &str,
        owner: &Owner,
        actor: &str,
    ) -> ApiResult<ManifestImportReport> {
        if file_path.trim().is_empty() {
            return Err(ApiError::InvalidInput("文件路径不能为空".to_string()));
        }
        Ok(self
            .manifest_importer
            .import_manifest(Path::new(file_path), owner, actor)
            .await?)
    }

    /// 录入扫描件（目录或单页文件）
    pub async fn import_marks(&self, source: &str, owner: &Owner) -> ApiResult<MarkImportReport> {
        if source.trim().is_empty() {
            return Err(ApiError::InvalidInput("扫描件路径不能为空".to_string()));
        }
        Ok(self
            .mark_importer
            .import_marks(Path::new(source), owner)
            .await?)
    }
}
