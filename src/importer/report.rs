// ==========================================
// 货柜流转系统 - 录入报告
// ==========================================

use serde::{Deserialize, Serialize};

/// 某工作表因缺少柜号或条码而提前终止的位置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetStop {
    pub sheet: String,
    pub row_number: usize,
}

/// 被拒绝的单行（数量非法、商品目录不可用等），不影响同表其他行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowIssue {
    pub sheet: String,
    pub row_number: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedSupply {
    pub supply_id: String,
    pub container_number: String,
    pub lines: usize,
    pub units: u32,
    pub unresolved_lines: usize,
    pub scheduled_commands: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerFailure {
    pub container_number: String,
    pub message: String,
}

// ==========================================
// ManifestImportReport - 清单录入结果
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestImportReport {
    pub batch_id: String,
    pub file_name: String,
    pub sheets: usize,
    pub rows_read: usize,
    pub rows_accepted: usize,
    pub stopped: Vec<SheetStop>,
    pub row_issues: Vec<RowIssue>,
    pub created: Vec<CreatedSupply>,
    pub duplicates: Vec<String>, // 重复的柜号
    pub failures: Vec<ContainerFailure>,
    pub message: String,
    pub elapsed_ms: i64,
}

impl ManifestImportReport {
    pub fn created_ids(&self) -> Vec<String> {
        self.created.iter().map(|c| c.supply_id.clone()).collect()
    }
}

/// 单页识别失败的记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageError {
    pub page: usize,
    pub mark_id: String,
    pub renamed_to: String,
    pub message: String,
    /// 改名失败时的原因（占位码指向原文件）
    pub rename_error: Option<String>,
}

// ==========================================
// MarkImportReport - 追溯码录入结果
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkImportReport {
    pub batch_id: String,
    pub source: String,
    pub pages: usize,
    pub crop_failures: usize,
    pub created: Vec<String>, // 新建的 mark_id
    pub duplicates: usize,
    pub errors: Vec<PageError>,
    pub unresolved_products: usize,
    pub message: String,
    pub elapsed_ms: i64,
}
