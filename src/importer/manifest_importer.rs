// ==========================================
// 货柜流转系统 - 清单录入器实现
// ==========================================
// 流程: 解析 → 映射 → 条码解析 → 按柜号归组 → 重复检查 → 落库 + 启动分配
// 规则: 某行缺少柜号或条码时，该工作表剩余行全部不再处理
// ==========================================

use crate::config::IntakeConfigReader;
use crate::domain::supply::Supply;
use crate::domain::types::{Owner, ProductRef, Resolved, SupplyStatus};
use crate::engine::MarkAllocationEngine;
use crate::i18n::t_with_args;
use crate::importer::barcode::resolve_barcode;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_mapper::{parse_quantity, ManifestFieldMapper};
use crate::importer::file_parser::UniversalFileParser;
use crate::importer::intake_trait::{FieldMapper, FileParser, ManifestImporter, ManifestSheet};
use crate::importer::report::{
    ContainerFailure, CreatedSupply, ManifestImportReport, RowIssue, SheetStop,
};
use crate::integration::ProductCatalog;
use crate::repository::SupplyRepository;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

// ==========================================
// ManifestImporterImpl
// ==========================================
pub struct ManifestImporterImpl<C>
where
    C: IntakeConfigReader,
{
    config: C,
    catalog: Arc<dyn ProductCatalog>,
    supply_repo: Arc<SupplyRepository>,
    allocation: Arc<MarkAllocationEngine>,
    file_parser: Box<dyn FileParser>,
}

/// 归组中的货柜（按首次出现顺序落库）
struct PendingSupplies {
    order: Vec<Supply>,
    index: HashMap<String, usize>,
}

impl PendingSupplies {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn get_or_open(&mut self, container_number: &str, owner: &Owner) -> &mut Supply {
        let idx = match self.index.get(container_number) {
            Some(idx) => *idx,
            None => {
                self.order.push(Supply::new(container_number, owner.clone()));
                let idx = self.order.len() - 1;
                self.index.insert(container_number.to_string(), idx);
                idx
            }
        };
        &mut self.order[idx]
    }
}

impl<C> ManifestImporterImpl<C>
where
    C: IntakeConfigReader,
{
    pub fn new(
        config: C,
        catalog: Arc<dyn ProductCatalog>,
        supply_repo: Arc<SupplyRepository>,
        allocation: Arc<MarkAllocationEngine>,
    ) -> Self {
        Self {
            config,
            catalog,
            supply_repo,
            allocation,
            file_parser: Box::new(UniversalFileParser),
        }
    }

    /// 替换文件解析器（测试或特殊格式）
    pub fn with_file_parser(mut self, file_parser: Box<dyn FileParser>) -> Self {
        self.file_parser = file_parser;
        self
    }

    fn build_mapper(&self) -> ImportResult<ManifestFieldMapper> {
        let extra = self
            .config
            .get_header_aliases()
            .map_err(|e| ImportError::ConfigReadError {
                key: crate::config::config_keys::MANIFEST_HEADER_ALIASES.to_string(),
                message: e.to_string(),
            })?;
        Ok(ManifestFieldMapper::new().with_extra_aliases(&extra))
    }

    /// 处理已解析的工作表
    ///
    /// # 返回
    /// - Ok(report): 单个货柜的重复/失败记录在报告中，不中断批次
    /// - Err: 配置读取失败、商品目录不可用（此时不落库任何货柜）
    pub fn import_sheets(
        &self,
        sheets: &[ManifestSheet],
        owner: &Owner,
        actor: &str,
    ) -> ImportResult<ManifestImportReport> {
        let mapper = self.build_mapper()?;
        let mut report = ManifestImportReport {
            batch_id: Uuid::new_v4().to_string(),
            sheets: sheets.len(),
            ..Default::default()
        };
        let mut pending = PendingSupplies::new();

        // === 阶段 1: 逐表逐行归组 ===
        for sheet in sheets {
            for (idx, row) in sheet.rows.iter().enumerate() {
                let row_number = idx + 2;
                report.rows_read += 1;

                let mapped = mapper.map_row(row, row_number);
                let (Some(container_number), Some(barcode)) =
                    (mapped.container_number, mapped.barcode)
                else {
                    info!(sheet = %sheet.name, row_number, "缺少柜号或条码，停止处理该工作表剩余行");
                    report.stopped.push(SheetStop {
                        sheet: sheet.name.clone(),
                        row_number,
                    });
                    break;
                };

                let quantity = match parse_quantity(mapped.quantity.as_deref(), row_number) {
                    Ok(q) => q,
                    Err(e) => {
                        warn!(sheet = %sheet.name, row_number, error = %e, "清单行被拒绝");
                        report.row_issues.push(RowIssue {
                            sheet: sheet.name.clone(),
                            row_number,
                            message: e.to_string(),
                        });
                        continue;
                    }
                };

                let product: ProductRef = match resolve_barcode(self.catalog.as_ref(), &barcode)? {
                    Some(p) => Resolved::Known(p),
                    None => {
                        warn!(sheet = %sheet.name, row_number, barcode = %barcode, "条码未匹配到商品，按 unknown 录入");
                        Resolved::Unresolved
                    }
                };

                pending
                    .get_or_open(&container_number, owner)
                    .add_line(product, Some(barcode), quantity);
                report.rows_accepted += 1;
            }
        }

        // === 阶段 2: 重复检查 + 落库 + 启动分配 ===
        for mut supply in pending.order {
            let container_number = supply.invariable.container_number.clone();

            match self
                .supply_repo
                .exists_by_container(&container_number, owner, SupplyStatus::New)
            {
                Ok(true) => {
                    warn!(container_number = %container_number, "柜号已存在，跳过");
                    report.duplicates.push(container_number);
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    report.failures.push(ContainerFailure {
                        container_number,
                        message: e.to_string(),
                    });
                    continue;
                }
            }

            match self.allocation.admit(&mut supply, actor) {
                Ok(scheduled) => {
                    report.created.push(CreatedSupply {
                        supply_id: supply.supply_id.clone(),
                        container_number,
                        lines: supply.lines.len(),
                        units: supply.total_quantity(),
                        unresolved_lines: supply.unresolved_lines().len(),
                        scheduled_commands: scheduled,
                    });
                }
                Err(e) => {
                    tracing::error!(container_number = %container_number, error = %e, "货柜落库失败");
                    report.failures.push(ContainerFailure {
                        container_number,
                        message: e.to_string(),
                    });
                }
            }
        }

        report.message = t_with_args(
            "import.manifest_summary",
            &[
                ("created", &report.created.len().to_string()),
                ("duplicates", &report.duplicates.len().to_string()),
                ("failed", &report.failures.len().to_string()),
            ],
        );
        Ok(report)
    }
}

#[async_trait]
impl<C> ManifestImporter for ManifestImporterImpl<C>
where
    C: IntakeConfigReader,
{
    #[instrument(skip(self, file_path, owner), fields(user_id = %owner.user_id))]
    async fn import_manifest<P: AsRef<Path> + Send>(
        &self,
        file_path: P,
        owner: &Owner,
        actor: &str,
    ) -> ImportResult<ManifestImportReport> {
        let start = Utc::now();
        let path = file_path.as_ref();
        info!(file = %path.display(), "开始录入清单");

        let sheets = self.file_parser.parse_sheets(path)?;
        let mut report = self.import_sheets(&sheets, owner, actor)?;

        report.file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        report.elapsed_ms = (Utc::now() - start).num_milliseconds();

        info!(
            batch_id = %report.batch_id,
            created = report.created.len(),
            duplicates = report.duplicates.len(),
            stopped_sheets = report.stopped.len(),
            elapsed_ms = report.elapsed_ms,
            "清单录入完成"
        );
        Ok(report)
    }
}
