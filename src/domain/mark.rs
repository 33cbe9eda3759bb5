// ==========================================
// 货柜流转系统 - 追溯码聚合 (Mark)
// ==========================================
// 红线: supply_id 有值 ⇔ status = SUPPLY
// 红线: 同一时刻最多一个货柜持有某追溯码
// ==========================================

use crate::domain::types::{MarkStatus, Owner, ProductRef};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// 识别失败时写入的占位码前缀，等待人工处理
pub const ERROR_CODE_PREFIX: &str = "ERROR:";

// ==========================================
// MarkCode - 码内容
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkCode {
    pub text: String,
    pub content_hash: String, // 去重依据
    pub image_ref: Option<String>,
    pub is_error: bool,
}

impl MarkCode {
    pub fn decoded(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            content_hash: content_hash(&text),
            text,
            image_ref: None,
            is_error: false,
        }
    }

    /// 识别失败的占位码，哈希基于来源文件，保证每个失败页各自落一条
    pub fn error_placeholder(source: &str) -> Self {
        let text = format!("{}{}", ERROR_CODE_PREFIX, source);
        Self {
            content_hash: content_hash(&text),
            text,
            image_ref: None,
            is_error: true,
        }
    }
}

// ==========================================
// MarkInvariable - 不变元数据
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkInvariable {
    pub product: ProductRef,
    pub part_id: Option<String>,
    pub owner: Owner,
}

// ==========================================
// Mark - 追溯码
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mark {
    pub mark_id: String,
    pub status: MarkStatus,
    pub invariable: MarkInvariable,
    pub code: MarkCode,
    pub supply_id: Option<String>,
    pub reservation_key: Option<String>, // supply:line:unit，一个单位只能占用一个码
    pub comment: Option<String>,
    pub source_file: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Mark {
    /// 新录入的追溯码，状态 UNDEFINED
    pub fn new_undefined(
        code: MarkCode,
        product: ProductRef,
        part_id: Option<String>,
        owner: Owner,
        source_file: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            mark_id: Uuid::new_v4().to_string(),
            status: MarkStatus::Undefined,
            invariable: MarkInvariable {
                product,
                part_id,
                owner,
            },
            code,
            supply_id: None,
            reservation_key: None,
            comment: None,
            source_file,
            created_at: now,
            modified_at: now,
        }
    }

    /// 检查关联不变量
    pub fn link_invariant_holds(&self) -> bool {
        self.supply_id.is_some() == (self.status == MarkStatus::Supply)
    }
}

/// 预留键: 货柜 + 行 + 单位序号
pub fn reservation_key(supply_id: &str, line_id: &str, unit: u32) -> String {
    format!("{}:{}:{}", supply_id, line_id, unit)
}

/// 码内容哈希（SHA-256 十六进制）
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// 批次号: GTIN + 扫描日期
pub fn part_id(gtin: &str, scanned_on: NaiveDate) -> String {
    format!("{}-{}", gtin, scanned_on.format("%Y%m%d"))
}

/// 按状态统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkStatusCounts {
    pub undefined: i64,
    pub supply: i64,
    pub new: i64,
    pub errors: i64,
}
