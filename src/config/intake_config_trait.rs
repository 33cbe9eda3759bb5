// ==========================================
// 货柜流转系统 - 录入配置读取 Trait
// ==========================================
// 职责: 定义清单/追溯码录入所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use std::collections::HashMap;
use std::error::Error;

// ==========================================
// IntakeConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
pub trait IntakeConfigReader: Send + Sync {
    /// 清单表头追加别名
    ///
    /// # 返回
    /// - 标准字段名（container / quantity / barcode）→ 额外别名列表
    ///
    /// # 默认值
    /// - 空（只使用内置别名）
    fn get_header_aliases(&self) -> Result<HashMap<String, Vec<String>>, Box<dyn Error>>;

    /// 追溯码图片的存储路径前缀
    ///
    /// # 默认值
    /// - marks
    fn get_mark_image_prefix(&self) -> Result<String, Box<dyn Error>>;
}

// 共享配置管理器（AppState 中以 Arc 持有）
impl<T> IntakeConfigReader for std::sync::Arc<T>
where
    T: IntakeConfigReader + ?Sized,
{
    fn get_header_aliases(&self) -> Result<HashMap<String, Vec<String>>, Box<dyn Error>> {
        (**self).get_header_aliases()
    }

    fn get_mark_image_prefix(&self) -> Result<String, Box<dyn Error>> {
        (**self).get_mark_image_prefix()
    }
}
