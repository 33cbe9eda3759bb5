// ==========================================
// 货柜流转系统 - 工作流错误类型
// ==========================================
// 分类:
// - NotFound: 聚合不存在，单项失败
// - ValidationFailure: 非法转换/前置条件不满足，单项失败
// - Duplicate: 重复（集装箱号/已占用/重复码），按跳过处理
// - Transient: 暂时无法完成，延迟重试
// - Fatal: 其余异常，记录并计入批次结果
// ==========================================

use crate::integration::IntegrationError;
use crate::repository::error::RepositoryError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 错误类别（批次结果、日志字段用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    NotFound,
    ValidationFailure,
    Duplicate,
    Transient,
    Fatal,
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("记录未找到: {entity} id={id}")]
    NotFound { entity: String, id: String },

    #[error("校验失败: {0}")]
    ValidationFailure(String),

    #[error("重复: {0}")]
    Duplicate(String),

    #[error("暂时无法完成: {0}")]
    Transient(String),

    #[error("不可恢复错误: {0}")]
    Fatal(String),
}

impl WorkflowError {
    pub fn not_found(entity: &str, id: impl Into<String>) -> Self {
        WorkflowError::NotFound {
            entity: entity.to_string(),
            id: id.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            WorkflowError::NotFound { .. } => FailureKind::NotFound,
            WorkflowError::ValidationFailure(_) => FailureKind::ValidationFailure,
            WorkflowError::Duplicate(_) => FailureKind::Duplicate,
            WorkflowError::Transient(_) => FailureKind::Transient,
            WorkflowError::Fatal(_) => FailureKind::Fatal,
        }
    }
}

impl From<RepositoryError> for WorkflowError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::OptimisticLockFailure { .. } | RepositoryError::LockError(_) => {
                WorkflowError::Transient(err.to_string())
            }
            RepositoryError::NotFound { entity, id } => WorkflowError::NotFound { entity, id },
            RepositoryError::UniqueConstraintViolation(msg) => WorkflowError::Duplicate(msg),
            other => WorkflowError::Fatal(other.to_string()),
        }
    }
}

impl From<IntegrationError> for WorkflowError {
    fn from(err: IntegrationError) -> Self {
        if err.is_transient() {
            WorkflowError::Transient(err.to_string())
        } else {
            WorkflowError::Fatal(err.to_string())
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
