// ==========================================
// 货柜流转系统 - 货柜聚合 (Supply)
// ==========================================
// 红线: 货柜只追加版本，不删除
// 红线: 任一行关联的追溯码数量不得超过该行需求数量
// ==========================================

use crate::domain::types::{Owner, ProductRef, SupplyStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 对外入库单据使用的货柜引用前缀
pub const SUPPLY_REFERENCE_PREFIX: &str = "SUP-";

/// 追溯码预留期间的锁上下文
pub const LOCK_CONTEXT_ALLOCATION: &str = "allocation";

// ==========================================
// SupplyLine - 货柜行
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyLine {
    pub line_id: String,
    pub product: ProductRef,
    pub barcode: Option<String>, // 清单原始条码（审计用）
    pub quantity: u32,           // 需求数量
    pub received: bool,          // 仓库已确认收货
}

// ==========================================
// SupplyInvariable - 不变元数据
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyInvariable {
    pub container_number: String,
    pub declaration_number: Option<String>, // 报关单号，进入 CLEARANCE 时写入
    pub created_at: DateTime<Utc>,
    pub arrived_at: Option<DateTime<Utc>>,
}

/// 建议性锁：仅作为界面可见性提示，不是互斥原语
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SupplyLock {
    pub locked: bool,
    pub context: String,
}

// ==========================================
// Supply - 货柜
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Supply {
    pub supply_id: String,
    pub status: SupplyStatus,
    pub lines: Vec<SupplyLine>,
    pub invariable: SupplyInvariable,
    pub lock: SupplyLock,
    pub owner: Owner,
    pub revision: i64, // 乐观锁版本号，每次变更 +1
    pub updated_at: DateTime<Utc>,
}

impl Supply {
    /// 新建货柜，状态固定为 NEW
    pub fn new(container_number: impl Into<String>, owner: Owner) -> Self {
        let now = Utc::now();
        Self {
            supply_id: Uuid::new_v4().to_string(),
            status: SupplyStatus::New,
            lines: Vec::new(),
            invariable: SupplyInvariable {
                container_number: container_number.into(),
                declaration_number: None,
                created_at: now,
                arrived_at: None,
            },
            lock: SupplyLock::default(),
            owner,
            revision: 0,
            updated_at: now,
        }
    }

    /// 追加一行；相同商品标识的行合并数量
    ///
    /// 合并保证"按行计数"不会在两行之间重复统计同一批追溯码
    pub fn add_line(&mut self, product: ProductRef, barcode: Option<String>, quantity: u32) -> &SupplyLine {
        if let Some(idx) = self.lines.iter().position(|l| l.product == product) {
            self.lines[idx].quantity += quantity;
            return &self.lines[idx];
        }

        self.lines.push(SupplyLine {
            line_id: Uuid::new_v4().to_string(),
            product,
            barcode,
            quantity,
            received: false,
        });
        &self.lines[self.lines.len() - 1]
    }

    pub fn total_quantity(&self) -> u32 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    pub fn find_line(&self, line_id: &str) -> Option<&SupplyLine> {
        self.lines.iter().find(|l| l.line_id == line_id)
    }

    pub fn find_line_by_product(&self, product: &ProductRef) -> Option<&SupplyLine> {
        self.lines.iter().find(|l| &l.product == product)
    }

    pub fn unresolved_lines(&self) -> Vec<&SupplyLine> {
        self.lines.iter().filter(|l| !l.product.is_known()).collect()
    }

    pub fn all_lines_resolved(&self) -> bool {
        self.lines.iter().all(|l| l.product.is_known())
    }

    pub fn all_lines_received(&self) -> bool {
        !self.lines.is_empty() && self.lines.iter().all(|l| l.received)
    }

    /// 标记行已收货
    ///
    /// # 返回
    /// - true: 状态发生变化
    /// - false: 行不存在或已收货
    pub fn mark_line_received(&mut self, line_id: &str) -> bool {
        match self.lines.iter_mut().find(|l| l.line_id == line_id) {
            Some(line) if !line.received => {
                line.received = true;
                true
            }
            _ => false,
        }
    }

    pub fn lock(&mut self, context: &str) {
        self.lock = SupplyLock {
            locked: true,
            context: context.to_string(),
        };
    }

    pub fn unlock(&mut self) {
        self.lock = SupplyLock::default();
    }

    /// 入库单据上使用的外部引用
    pub fn reference(&self) -> String {
        format!("{}{}", SUPPLY_REFERENCE_PREFIX, self.supply_id)
    }

    /// 从外部引用还原货柜ID
    pub fn parse_reference(reference: &str) -> Option<&str> {
        reference
            .trim()
            .strip_prefix(SUPPLY_REFERENCE_PREFIX)
            .filter(|id| !id.is_empty())
    }
}

// ==========================================
// SupplyVersion - 货柜历史版本
// ==========================================
// 每次变更追加一条，root 标识 supply_id 不变
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplyVersion {
    pub supply_id: String,
    pub revision: i64,
    pub status: SupplyStatus,
    pub actor: String,
    pub snapshot: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
