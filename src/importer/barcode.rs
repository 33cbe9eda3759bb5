// ==========================================
// 货柜流转系统 - 条码与 GTIN 处理
// ==========================================
// 说明: 清单中的条码常被表格软件吃掉前导零，
//       因此同时尝试原值与去前导零后的值
// ==========================================

use crate::domain::types::ProductIdentity;
use crate::integration::{IntegrationResult, ProductCatalog};
use regex::Regex;
use std::sync::OnceLock;

/// GS1 应用标识 01 + 14 位 GTIN
const GTIN_PATTERN: &str = r"01(\d{14})";

fn gtin_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(GTIN_PATTERN).ok()).as_ref()
}

/// 条码查询候选: 原值 → 去一个前导零 → 去全部前导零（去重、保序）
pub fn barcode_candidates(code: &str) -> Vec<String> {
    let code = code.trim();
    let mut candidates: Vec<String> = Vec::with_capacity(3);
    let mut push = |value: &str| {
        if !value.is_empty() && !candidates.iter().any(|c| c == value) {
            candidates.push(value.to_string());
        }
    };

    push(code);
    if let Some(rest) = code.strip_prefix('0') {
        push(rest);
    }
    push(code.trim_start_matches('0'));
    candidates
}

/// 按候选依次查询商品目录，命中即返回
pub fn resolve_barcode(
    catalog: &dyn ProductCatalog,
    code: &str,
) -> IntegrationResult<Option<ProductIdentity>> {
    for candidate in barcode_candidates(code) {
        if let Some(product) = catalog.resolve_by_barcode(&candidate)? {
            return Ok(Some(product));
        }
    }
    Ok(None)
}

/// 从识别出的码内容中提取 GTIN
pub fn extract_gtin(decoded: &str) -> Option<String> {
    gtin_regex()?
        .captures(decoded)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::InMemoryCatalog;

    #[test]
    fn test_barcode_candidates() {
        assert_eq!(barcode_candidates("0078"), vec!["0078", "078", "78"]);
        assert_eq!(barcode_candidates("78"), vec!["78"]);
        assert_eq!(barcode_candidates(" 04601 "), vec!["04601", "4601"]);
        assert!(barcode_candidates("").is_empty());
    }

    #[test]
    fn test_leading_zero_variants_resolve_to_same_product() {
        let catalog = InMemoryCatalog::new();
        catalog.insert("78", ProductIdentity::product(7));

        let a = resolve_barcode(&catalog, "0078").unwrap();
        let b = resolve_barcode(&catalog, "78").unwrap();
        assert_eq!(a, Some(ProductIdentity::product(7)));
        assert_eq!(a, b);
    }

    #[test]
    fn test_extract_gtin() {
        let payload = "0104601234567890215abcDEF\u{1d}93xyz";
        assert_eq!(extract_gtin(payload).as_deref(), Some("04601234567890"));
        assert_eq!(extract_gtin("no gtin here"), None);
    }
}
