// ==========================================
// 货柜流转系统 - 状态变更请求校验器
// ==========================================
// 职责: 原始请求 → 不可变命令对象，校验通过后才进入编排器
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::types::SupplyStatus;
use crate::engine::transition::{TransitionPayload, SYSTEM_ACTOR};
use serde::{Deserialize, Serialize};

// ==========================================
// StatusChangeRequest - 原始请求
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusChangeRequest {
    pub supply_ids: Vec<String>,
    pub target_status: String,
    pub declaration_number: Option<String>,
    pub actor: Option<String>,
}

// ==========================================
// StatusChangeCommand - 校验后的命令
// ==========================================
/// 字段只读，构造只能经过 StatusChangeValidator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChangeCommand {
    supply_ids: Vec<String>,
    target: SupplyStatus,
    payload: TransitionPayload,
}

impl StatusChangeCommand {
    pub fn supply_ids(&self) -> &[String] {
        &self.supply_ids
    }

    pub fn target(&self) -> SupplyStatus {
        self.target
    }

    pub fn payload(&self) -> &TransitionPayload {
        &self.payload
    }
}

pub struct StatusChangeValidator;

impl StatusChangeValidator {
    /// 校验状态变更请求
    ///
    /// # 规则
    /// - 货柜ID非空，去空白、去重（保持顺序）
    /// - 目标状态可解析，且允许人工触发（NEW/COMPLETED 不允许）
    /// - 进入 CLEARANCE 必须提供报关单号
    pub fn validate(request: &StatusChangeRequest) -> ApiResult<StatusChangeCommand> {
        let mut supply_ids: Vec<String> = Vec::with_capacity(request.supply_ids.len());
        for id in &request.supply_ids {
            let id = id.trim();
            if id.is_empty() {
                return Err(ApiError::InvalidInput("货柜ID不能为空".to_string()));
            }
            if !supply_ids.iter().any(|existing| existing == id) {
                supply_ids.push(id.to_string());
            }
        }
        if supply_ids.is_empty() {
            return Err(ApiError::InvalidInput("货柜ID列表不能为空".to_string()));
        }

        let target: SupplyStatus = request
            .target_status
            .parse()
            .map_err(|e: crate::domain::types::UnknownStatus| ApiError::InvalidInput(e.to_string()))?;
        if !target.is_user_triggerable() {
            return Err(ApiError::BusinessRuleViolation(format!(
                "状态 {} 不允许人工触发",
                target
            )));
        }

        let declaration_number = request
            .declaration_number
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        if target == SupplyStatus::Clearance && declaration_number.is_none() {
            return Err(ApiError::ValidationError(
                "进入报关状态必须提供报关单号".to_string(),
            ));
        }

        let actor = request
            .actor
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(SYSTEM_ACTOR)
            .to_string();

        Ok(StatusChangeCommand {
            supply_ids,
            target,
            payload: TransitionPayload {
                declaration_number,
                actor,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(ids: &[&str], target: &str) -> StatusChangeRequest {
        StatusChangeRequest {
            supply_ids: ids.iter().map(|s| s.to_string()).collect(),
            target_status: target.to_string(),
            declaration_number: None,
            actor: Some("alice".to_string()),
        }
    }

    #[test]
    fn test_valid_request_dedups_ids() {
        let cmd = StatusChangeValidator::validate(&request(&["a", " a ", "b"], "delivery")).unwrap();
        assert_eq!(cmd.supply_ids(), &["a".to_string(), "b".to_string()]);
        assert_eq!(cmd.target(), SupplyStatus::Delivery);
        assert_eq!(cmd.payload().actor, "alice");
    }

    #[test]
    fn test_empty_ids_rejected() {
        let result = StatusChangeValidator::validate(&request(&[], "CANCELED"));
        assert!(matches!(result, Err(ApiError::InvalidInput(_))));

        let result = StatusChangeValidator::validate(&request(&["  "], "CANCELED"));
        assert!(matches!(result, Err(ApiError::InvalidInput(_))));
    }

    #[test]
    fn test_completed_is_not_user_triggerable() {
        let result = StatusChangeValidator::validate(&request(&["a"], "COMPLETED"));
        assert!(matches!(result, Err(ApiError::BusinessRuleViolation(_))));
    }

    #[test]
    fn test_unknown_status_rejected() {
        let result = StatusChangeValidator::validate(&request(&["a"], "SHIPPED"));
        assert!(matches!(result, Err(ApiError::InvalidInput(_))));
    }

    #[test]
    fn test_clearance_requires_declaration_number() {
        let mut req = request(&["a"], "CLEARANCE");
        assert!(matches!(
            StatusChangeValidator::validate(&req),
            Err(ApiError::ValidationError(_))
        ));

        req.declaration_number = Some(" 10702020/011024/0001234 ".to_string());
        let cmd = StatusChangeValidator::validate(&req).unwrap();
        assert_eq!(
            cmd.payload().declaration_number.as_deref(),
            Some("10702020/011024/0001234")
        );
    }
}
