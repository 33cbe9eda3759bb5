// ==========================================
// 货柜流转系统 - 协作方错误类型
// ==========================================

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntegrationError {
    #[error("协作方不可用: {service}: {message}")]
    Unavailable { service: String, message: String },

    #[error("协作方拒绝请求: {0}")]
    Rejected(String),

    #[error("文件读写失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("数据格式错误: {0}")]
    InvalidData(String),
}

impl IntegrationError {
    /// 是否值得重试
    pub fn is_transient(&self) -> bool {
        matches!(self, IntegrationError::Unavailable { .. } | IntegrationError::Io(_))
    }
}

pub type IntegrationResult<T> = Result<T, IntegrationError>;
