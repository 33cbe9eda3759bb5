// ==========================================
// 货柜流转系统 - 外部协作方接口
// ==========================================
// 职责: 商品目录、仓储系统、文件存储、扫码识别的契约定义与本地实现
// 说明: 只关心请求/响应契约，不关心协作方内部逻辑
// ==========================================

pub mod catalog;
pub mod error;
pub mod inventory;
pub mod scanner;
pub mod storage;

pub use catalog::{CsvProductCatalog, InMemoryCatalog, ProductCatalog};
pub use error::{IntegrationError, IntegrationResult};
pub use inventory::{
    GoodsReceiptRequest, GoodsReceivedEvent, InventoryGateway, LoggingInventoryGateway,
};
pub use scanner::{
    CodeDecoder, CommandDecoder, DecodeOutput, DocumentToolkit, FileDocumentToolkit,
    SidecarDecoder,
};
pub use storage::{FileStorage, LocalFileStorage};
