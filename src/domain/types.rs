// ==========================================
// 货柜流转系统 - 领域类型定义
// ==========================================
// 职责: 货柜状态链、追溯码状态、商品标识三值语义
// 红线: 纯值逻辑，不做 I/O
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ==========================================
// 货柜状态 (Supply Status)
// ==========================================
// 状态链: NEW → CLEARANCE → CLEARED → DELIVERY → COMPLETED
// CANCELED 可由任一非终态进入
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupplyStatus {
    New,        // 新建（追溯码预留中）
    Clearance,  // 报关中
    Cleared,    // 已清关
    Delivery,   // 入库配送中
    Completed,  // 已完成（终态）
    Canceled,   // 已取消（终态）
}

/// 进入某状态所需的前驱
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predecessor {
    /// 初始状态，只能由创建产生
    Initial,
    /// 唯一前驱
    Exactly(SupplyStatus),
    /// 任一非终态
    AnyNonTerminal,
}

impl SupplyStatus {
    pub const ALL: [SupplyStatus; 6] = [
        SupplyStatus::New,
        SupplyStatus::Clearance,
        SupplyStatus::Cleared,
        SupplyStatus::Delivery,
        SupplyStatus::Completed,
        SupplyStatus::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SupplyStatus::New => "NEW",
            SupplyStatus::Clearance => "CLEARANCE",
            SupplyStatus::Cleared => "CLEARED",
            SupplyStatus::Delivery => "DELIVERY",
            SupplyStatus::Completed => "COMPLETED",
            SupplyStatus::Canceled => "CANCELED",
        }
    }

    /// 合法进入本状态所需的前驱状态
    pub fn previous(&self) -> Predecessor {
        match self {
            SupplyStatus::New => Predecessor::Initial,
            SupplyStatus::Clearance => Predecessor::Exactly(SupplyStatus::New),
            SupplyStatus::Cleared => Predecessor::Exactly(SupplyStatus::Clearance),
            SupplyStatus::Delivery => Predecessor::Exactly(SupplyStatus::Cleared),
            SupplyStatus::Completed => Predecessor::Exactly(SupplyStatus::Delivery),
            SupplyStatus::Canceled => Predecessor::AnyNonTerminal,
        }
    }

    /// 终态没有出边
    pub fn is_terminal(&self) -> bool {
        matches!(self, SupplyStatus::Completed | SupplyStatus::Canceled)
    }

    /// 判断 current → self 是否为合法转换
    pub fn accepts_from(&self, current: SupplyStatus) -> bool {
        if current.is_terminal() {
            return false;
        }
        match self.previous() {
            Predecessor::Initial => false,
            Predecessor::Exactly(required) => required == current,
            Predecessor::AnyNonTerminal => true,
        }
    }

    /// COMPLETED 只能由入库回执驱动，不接受人工触发
    pub fn is_user_triggerable(&self) -> bool {
        !matches!(self, SupplyStatus::New | SupplyStatus::Completed)
    }
}

impl fmt::Display for SupplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 状态名解析失败
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("未知状态: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for SupplyStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "NEW" => Ok(SupplyStatus::New),
            "CLEARANCE" => Ok(SupplyStatus::Clearance),
            "CLEARED" => Ok(SupplyStatus::Cleared),
            "DELIVERY" => Ok(SupplyStatus::Delivery),
            "COMPLETED" => Ok(SupplyStatus::Completed),
            "CANCELED" | "CANCELLED" => Ok(SupplyStatus::Canceled),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

// ==========================================
// 追溯码状态 (Mark Status)
// ==========================================
// UNDEFINED → SUPPLY → NEW → …（下游流通状态不在本系统范围）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarkStatus {
    Undefined, // 已录入，未分配
    Supply,    // 已被货柜预留
    New,       // 已投入流通
}

impl MarkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkStatus::Undefined => "UNDEFINED",
            MarkStatus::Supply => "SUPPLY",
            MarkStatus::New => "NEW",
        }
    }
}

impl fmt::Display for MarkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MarkStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "UNDEFINED" => Ok(MarkStatus::Undefined),
            "SUPPLY" => Ok(MarkStatus::Supply),
            "NEW" => Ok(MarkStatus::New),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

// ==========================================
// 三值语义: 未解析 / 已解析
// ==========================================
// "未提供"只存在于输入端；进入领域对象后只有这两种状态，
// Unresolved 是显式的"unknown"，参与匹配（unknown 只匹配 unknown）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Resolved<T> {
    Unresolved,
    Known(T),
}

impl<T> Resolved<T> {
    pub fn is_known(&self) -> bool {
        matches!(self, Resolved::Known(_))
    }

    pub fn known(&self) -> Option<&T> {
        match self {
            Resolved::Known(v) => Some(v),
            Resolved::Unresolved => None,
        }
    }
}

impl<T> From<Option<T>> for Resolved<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Resolved::Known(v),
            None => Resolved::Unresolved,
        }
    }
}

impl<T> Default for Resolved<T> {
    fn default() -> Self {
        Resolved::Unresolved
    }
}

// ==========================================
// 商品标识（复合键）
// ==========================================
/// 商品 + 报价/规格/型号 组成的复合键
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductIdentity {
    pub product_id: i64,
    pub offer_id: Resolved<i64>,
    pub variation_id: Resolved<i64>,
    pub modification_id: Resolved<i64>,
}

impl ProductIdentity {
    /// 只有商品ID的标识
    pub fn product(product_id: i64) -> Self {
        Self {
            product_id,
            offer_id: Resolved::Unresolved,
            variation_id: Resolved::Unresolved,
            modification_id: Resolved::Unresolved,
        }
    }

    pub fn with_offer(mut self, offer_id: i64) -> Self {
        self.offer_id = Resolved::Known(offer_id);
        self
    }

    pub fn with_variation(mut self, variation_id: i64) -> Self {
        self.variation_id = Resolved::Known(variation_id);
        self
    }

    pub fn with_modification(mut self, modification_id: i64) -> Self {
        self.modification_id = Resolved::Known(modification_id);
        self
    }
}

impl fmt::Display for ProductIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn part(v: &Resolved<i64>) -> String {
            match v {
                Resolved::Known(id) => id.to_string(),
                Resolved::Unresolved => "-".to_string(),
            }
        }
        write!(
            f,
            "{}/{}/{}/{}",
            self.product_id,
            part(&self.offer_id),
            part(&self.variation_id),
            part(&self.modification_id)
        )
    }
}

/// 行/追溯码上的商品引用
pub type ProductRef = Resolved<ProductIdentity>;

/// ProductRef 的展示形式（日志字段用）
pub fn product_label(product: &ProductRef) -> String {
    match product {
        Resolved::Known(p) => p.to_string(),
        Resolved::Unresolved => "unknown".to_string(),
    }
}

// ==========================================
// 归属 (Owner)
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Owner {
    pub user_id: String,
    pub profile_id: String,
}

impl Owner {
    pub fn new(user_id: impl Into<String>, profile_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            profile_id: profile_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_chain_predecessors() {
        assert_eq!(SupplyStatus::New.previous(), Predecessor::Initial);
        assert_eq!(
            SupplyStatus::Clearance.previous(),
            Predecessor::Exactly(SupplyStatus::New)
        );
        assert_eq!(
            SupplyStatus::Cleared.previous(),
            Predecessor::Exactly(SupplyStatus::Clearance)
        );
        assert_eq!(
            SupplyStatus::Delivery.previous(),
            Predecessor::Exactly(SupplyStatus::Cleared)
        );
        assert_eq!(
            SupplyStatus::Completed.previous(),
            Predecessor::Exactly(SupplyStatus::Delivery)
        );
    }

    #[test]
    fn test_accepts_only_required_predecessor() {
        for current in SupplyStatus::ALL {
            for target in SupplyStatus::ALL {
                let expected = match target {
                    SupplyStatus::Canceled => !current.is_terminal(),
                    SupplyStatus::New => false,
                    _ => target.previous() == Predecessor::Exactly(current),
                };
                assert_eq!(
                    target.accepts_from(current),
                    expected,
                    "{} -> {}",
                    current,
                    target
                );
            }
        }
    }

    #[test]
    fn test_terminal_statuses_have_no_outgoing() {
        for target in SupplyStatus::ALL {
            assert!(!target.accepts_from(SupplyStatus::Completed));
            assert!(!target.accepts_from(SupplyStatus::Canceled));
        }
    }

    #[test]
    fn test_parse_status_names() {
        assert_eq!("clearance".parse::<SupplyStatus>(), Ok(SupplyStatus::Clearance));
        assert_eq!(" CANCELLED ".parse::<SupplyStatus>(), Ok(SupplyStatus::Canceled));
        assert!("SHIPPED".parse::<SupplyStatus>().is_err());
        assert_eq!("supply".parse::<MarkStatus>(), Ok(MarkStatus::Supply));
    }

    #[test]
    fn test_serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&SupplyStatus::Delivery).unwrap();
        assert_eq!(json, "\"DELIVERY\"");
    }

    #[test]
    fn test_unresolved_matches_only_unresolved() {
        let unknown: ProductRef = Resolved::Unresolved;
        let known: ProductRef = Resolved::Known(ProductIdentity::product(78));
        assert_eq!(unknown, Resolved::Unresolved);
        assert_ne!(unknown, known);
        assert_eq!(product_label(&known), "78/-/-/-");
        assert_eq!(product_label(&unknown), "unknown");
    }
}
