// ==========================================
// 货柜流转系统 - 录入接口 Trait
// ==========================================
// 职责: 定义清单录入 / 追溯码录入接口（不包含实现）
// ==========================================

use crate::domain::types::Owner;
use crate::importer::error::ImportResult;
use crate::importer::report::{ManifestImportReport, MarkImportReport};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

/// 一个工作表的原始行（列名 → 单元格文本）
#[derive(Debug, Clone, Default)]
pub struct ManifestSheet {
    pub name: String,
    pub rows: Vec<HashMap<String, String>>,
}

/// 映射后的清单行，字段为空表示源单元格缺失
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawManifestRow {
    pub row_number: usize, // 表头为第 1 行
    pub container_number: Option<String>,
    pub quantity: Option<String>,
    pub barcode: Option<String>,
}

// ==========================================
// ManifestImporter Trait
// ==========================================
// 用途: 清单录入主接口
// 实现者: ManifestImporterImpl
#[async_trait]
pub trait ManifestImporter: Send + Sync {
    /// 从清单文件录入货柜
    ///
    /// # 参数
    /// - file_path: .xlsx / .xls / .csv
    /// - owner: 录入人归属
    /// - actor: 写入历史的操作人
    ///
    /// # 返回
    /// - Ok(ManifestImportReport): 新建货柜、重复货柜、提前终止位置
    /// - Err: 文件读取错误、配置错误
    async fn import_manifest<P: AsRef<Path> + Send>(
        &self,
        file_path: P,
        owner: &Owner,
        actor: &str,
    ) -> ImportResult<ManifestImportReport>;
}

// ==========================================
// MarkImporter Trait
// ==========================================
// 用途: 扫描件录入追溯码
// 实现者: MarkImporterImpl
#[async_trait]
pub trait MarkImporter: Send + Sync {
    /// 从多页扫描件录入追溯码
    ///
    /// # 导入流程（3个阶段）
    /// 1. 拆页
    /// 2. 裁边（失败保留原页）
    /// 3. 识别 + 去重 + 落库 + 上传入队
    async fn import_marks<P: AsRef<Path> + Send>(
        &self,
        source: P,
        owner: &Owner,
    ) -> ImportResult<MarkImportReport>;
}

// ==========================================
// FileParser Trait
// ==========================================
// 实现者: CsvParser, ExcelParser, UniversalFileParser
pub trait FileParser: Send + Sync {
    /// 解析文件为工作表列表，保留空白行
    fn parse_sheets(&self, file_path: &Path) -> ImportResult<Vec<ManifestSheet>>;
}

// ==========================================
// FieldMapper Trait
// ==========================================
// 实现者: ManifestFieldMapper
pub trait FieldMapper: Send + Sync {
    fn map_row(&self, row: &HashMap<String, String>, row_number: usize) -> RawManifestRow;
}
