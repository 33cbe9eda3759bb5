// ==========================================
// 货柜流转系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、业务规则
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod mark;
pub mod supply;
pub mod types;

// 重导出核心类型
pub use mark::{Mark, MarkCode, MarkInvariable, MarkStatusCounts};
pub use supply::{Supply, SupplyInvariable, SupplyLine, SupplyLock, SupplyVersion};
pub use types::{
    MarkStatus, Owner, Predecessor, ProductIdentity, ProductRef, Resolved, SupplyStatus,
    UnknownStatus,
};
