// ==========================================
// 货柜流转系统 - 仓储行编解码辅助
// ==========================================
// 职责: 时间戳、商品复合键与数据库列之间的转换
// ==========================================

use crate::domain::types::{ProductIdentity, ProductRef, Resolved};
use chrono::{DateTime, Utc};

/// 数据库中的时间戳（RFC3339）
pub fn ts_to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// 解析失败时回退为当前时间，与历史数据保持兼容
pub fn ts_from_sql(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub fn opt_ts_from_sql(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// 商品复合键拆为四列；NULL 表示 unknown
pub type ProductColumns = (Option<i64>, Option<i64>, Option<i64>, Option<i64>);

pub fn product_to_columns(product: &ProductRef) -> ProductColumns {
    match product {
        Resolved::Known(p) => (
            Some(p.product_id),
            p.offer_id.known().copied(),
            p.variation_id.known().copied(),
            p.modification_id.known().copied(),
        ),
        Resolved::Unresolved => (None, None, None, None),
    }
}

pub fn product_from_columns(columns: ProductColumns) -> ProductRef {
    let (product_id, offer_id, variation_id, modification_id) = columns;
    match product_id {
        Some(product_id) => Resolved::Known(ProductIdentity {
            product_id,
            offer_id: offer_id.into(),
            variation_id: variation_id.into(),
            modification_id: modification_id.into(),
        }),
        None => Resolved::Unresolved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_columns_preserve_unknown_parts() {
        let product: ProductRef = Resolved::Known(ProductIdentity::product(5).with_variation(9));
        let cols = product_to_columns(&product);
        assert_eq!(cols, (Some(5), None, Some(9), None));
        assert_eq!(product_from_columns(cols), product);

        let unknown: ProductRef = Resolved::Unresolved;
        assert_eq!(product_from_columns(product_to_columns(&unknown)), unknown);
    }
}
