// ==========================================
// 货柜流转系统 - API 层
// ==========================================
// 职责: 提供业务 API 接口，供命令行与外部调用方使用
// ==========================================

pub mod error;
pub mod import_api;
pub mod mark_api;
pub mod supply_api;
pub mod validator;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use import_api::ImportApi;
pub use mark_api::{MarkApi, ResolveMarkRequest};
pub use supply_api::{BatchStatusResponse, CreateLineRequest, CreateSupplyRequest, SupplyApi};
pub use validator::{StatusChangeCommand, StatusChangeRequest, StatusChangeValidator};
