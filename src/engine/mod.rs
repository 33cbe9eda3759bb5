// ==========================================
// 货柜流转系统 - 引擎层
// ==========================================
// 职责: 追溯码分配、状态转换编排、收货回执、追溯码副作用
// 红线: 引擎不直接调度线程，所有异步工作都经由消息队列
// ==========================================

pub mod allocation;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod mark_lifecycle;
pub mod receipt;
pub mod transition;

pub use allocation::{CheckOutcome, MarkAllocationEngine, ReserveOutcome};
pub use dispatcher::WorkflowDispatcher;
pub use error::{FailureKind, WorkflowError, WorkflowResult};
pub use events::{NoOpSupplyNotifier, OptionalSupplyNotifier, SupplyNotice, SupplyNotifier};
pub use mark_lifecycle::{MarkEffect, MarkLifecycleService};
pub use receipt::{
    GoodsReceiptRequester, ReceiptRequestOutcome, ReceivedOutcome, ReceivedProductHandler,
};
pub use transition::{
    ItemFailure, StatusTransitionOrchestrator, TransitionEffect, TransitionPayload,
    TransitionReport, SYSTEM_ACTOR,
};
