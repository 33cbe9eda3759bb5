// ==========================================
// 货柜流转系统 - 文件存储 (CDN)
// ==========================================

use crate::integration::error::IntegrationResult;
use std::fs;
use std::path::{Path, PathBuf};

/// 文件存储
pub trait FileStorage: Send + Sync {
    /// 存储文件，返回持久引用
    ///
    /// # 参数
    /// - key: 存储路径（如 marks/{mark_id}.png）
    /// - source: 本地文件
    fn store(&self, key: &str, source: &Path) -> IntegrationResult<String>;
}

/// 本地目录存储
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FileStorage for LocalFileStorage {
    fn store(&self, key: &str, source: &Path) -> IntegrationResult<String> {
        let target = self.root.join(key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, &target)?;
        Ok(key.to_string())
    }
}
