// ==========================================
// 货柜流转系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite + tokio
// 系统定位: 进口货柜状态流转 + 追溯码分配
// ==========================================

// 初始化国际化系统
rust_i18n::i18n!("locales", fallback = "zh-CN");

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 消息队列层 - 延迟命令、幂等、重试
pub mod queue;

// 外部协作方 - 商品目录、仓储系统、文件存储、扫码识别
pub mod integration;

// 引擎层 - 业务规则
pub mod engine;

// 录入层 - 清单与扫描件
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// 国际化
pub mod i18n;

// API 层 - 业务接口
pub mod api;

// 应用层 - 实例组装
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{MarkStatus, Owner, ProductIdentity, ProductRef, Resolved, SupplyStatus};

// 领域实体
pub use domain::{Mark, MarkCode, Supply, SupplyLine};

// 引擎
pub use engine::{
    MarkAllocationEngine, ReceivedProductHandler, StatusTransitionOrchestrator, TransitionReport,
    WorkflowDispatcher, WorkflowError,
};

// 队列
pub use queue::{Command, Lane, MessageQueue, QueueWorker};

// API
pub use api::{ImportApi, MarkApi, SupplyApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "货柜流转系统";
