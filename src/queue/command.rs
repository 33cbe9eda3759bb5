// ==========================================
// 货柜流转系统 - 队列命令
// ==========================================
// 职责: 定义所有异步处理单元的消息体
// 说明: 每条命令带幂等键，重复投递由 DedupStore 拦截
// ==========================================

use crate::integration::GoodsReceivedEvent;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==========================================
// 队列通道 (Lane)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Lane {
    Default,     // 默认通道
    LowPriority, // 低优先级（穷举搜索类重试）
}

impl Lane {
    /// 消费顺序: 默认通道先于低优先级
    pub const DRAIN_ORDER: [Lane; 2] = [Lane::Default, Lane::LowPriority];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Default => "DEFAULT",
            Lane::LowPriority => "LOW_PRIORITY",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Lane {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEFAULT" => Ok(Lane::Default),
            "LOW_PRIORITY" => Ok(Lane::LowPriority),
            other => Err(format!("未知队列通道: {}", other)),
        }
    }
}

// ==========================================
// 命令 (Command)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// 为货柜行的一个单位预留一个追溯码
    ReserveMark {
        supply_id: String,
        line_id: String,
        unit: u32,
    },
    /// 核对某行的预留数量
    CheckAllocation { supply_id: String, line_id: String },
    /// 写入追溯码备注（报关单号）
    CommentMark {
        mark_id: String,
        supply_id: String,
        comment: String,
    },
    /// 向仓储系统发起入库申请
    RequestGoodsReceipt { supply_id: String, line_id: String },
    /// 仓储系统回传的收货事件
    GoodsReceived { event: GoodsReceivedEvent },
    /// 全部行收货后推进到 COMPLETED
    CompleteSupply { supply_id: String },
    /// 追溯码释放到流通
    ReleaseMark { mark_id: String, supply_id: String },
    /// 上传追溯码图片
    UploadMarkImage { mark_id: String, image_path: String },
}

impl Command {
    /// 处理器名称（日志字段、队列 kind 列）
    pub fn kind(&self) -> &'static str {
        match self {
            Command::ReserveMark { .. } => "RESERVE_MARK",
            Command::CheckAllocation { .. } => "CHECK_ALLOCATION",
            Command::CommentMark { .. } => "COMMENT_MARK",
            Command::RequestGoodsReceipt { .. } => "REQUEST_GOODS_RECEIPT",
            Command::GoodsReceived { .. } => "GOODS_RECEIVED",
            Command::CompleteSupply { .. } => "COMPLETE_SUPPLY",
            Command::ReleaseMark { .. } => "RELEASE_MARK",
            Command::UploadMarkImage { .. } => "UPLOAD_MARK_IMAGE",
        }
    }

    /// 幂等键：同一逻辑事件只处理一次
    pub fn dedup_key(&self) -> String {
        match self {
            Command::ReserveMark {
                supply_id,
                line_id,
                unit,
            } => format!("reserve:{}:{}:{}", supply_id, line_id, unit),
            Command::CheckAllocation { supply_id, line_id } => {
                format!("check:{}:{}", supply_id, line_id)
            }
            Command::CommentMark {
                mark_id, supply_id, ..
            } => format!("comment:{}:{}", mark_id, supply_id),
            Command::RequestGoodsReceipt { supply_id, line_id } => {
                format!("receipt:{}:{}", supply_id, line_id)
            }
            Command::GoodsReceived { event } => format!("goods-received:{}", event.event_id),
            Command::CompleteSupply { supply_id } => format!("complete:{}", supply_id),
            Command::ReleaseMark { mark_id, supply_id } => {
                format!("release:{}:{}", mark_id, supply_id)
            }
            Command::UploadMarkImage { mark_id, .. } => format!("upload:{}", mark_id),
        }
    }

    /// 关联货柜（日志字段）
    pub fn supply_id(&self) -> Option<&str> {
        match self {
            Command::ReserveMark { supply_id, .. }
            | Command::CheckAllocation { supply_id, .. }
            | Command::CommentMark { supply_id, .. }
            | Command::RequestGoodsReceipt { supply_id, .. }
            | Command::CompleteSupply { supply_id }
            | Command::ReleaseMark { supply_id, .. } => Some(supply_id),
            Command::GoodsReceived { .. } | Command::UploadMarkImage { .. } => None,
        }
    }
}
