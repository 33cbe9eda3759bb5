// ==========================================
// 货柜流转系统 - 录入层
// ==========================================
// 职责: 清单录入（生成货柜）、扫描件录入（生成追溯码）
// 支持: Excel, CSV, 多页扫描件
// ==========================================

// 模块声明
pub mod barcode;
pub mod error;
pub mod field_mapper;
pub mod file_parser;
pub mod intake_trait;
pub mod manifest_importer;
pub mod mark_importer;
pub mod report;

// 重导出核心类型
pub use barcode::{barcode_candidates, extract_gtin, resolve_barcode};
pub use error::{ImportError, ImportResult};
pub use field_mapper::ManifestFieldMapper;
pub use file_parser::{CsvParser, ExcelParser, UniversalFileParser};
pub use manifest_importer::ManifestImporterImpl;
pub use mark_importer::MarkImporterImpl;
pub use report::{
    ContainerFailure, CreatedSupply, ManifestImportReport, MarkImportReport, PageError, RowIssue,
    SheetStop,
};

// 重导出 Trait 接口
pub use intake_trait::{
    FieldMapper, FileParser, ManifestImporter, ManifestSheet, MarkImporter, RawManifestRow,
};
