// ==========================================
// 货柜流转系统 - 清单字段映射器
// ==========================================
// 职责: 源列名 → 标准字段（柜号/数量/条码）+ 数量转换
// 别名: 内置别名 + config_kv 中 manifest.header_aliases 追加
// ==========================================

use crate::importer::error::{ImportError, ImportResult};
use crate::importer::intake_trait::{FieldMapper as FieldMapperTrait, RawManifestRow};
use std::collections::HashMap;

pub const FIELD_CONTAINER: &str = "container";
pub const FIELD_QUANTITY: &str = "quantity";
pub const FIELD_BARCODE: &str = "barcode";

pub struct ManifestFieldMapper {
    // 标准字段 → 归一化后的列名别名
    aliases: HashMap<&'static str, Vec<String>>,
}

impl ManifestFieldMapper {
    pub fn new() -> Self {
        let mut aliases: HashMap<&'static str, Vec<String>> = HashMap::new();
        aliases.insert(
            FIELD_CONTAINER,
            ["container", "container_number", "container no", "柜号", "货柜号", "集装箱号"]
                .iter()
                .map(|s| normalize_header(s))
                .collect(),
        );
        aliases.insert(
            FIELD_QUANTITY,
            ["quantity", "qty", "数量"].iter().map(|s| normalize_header(s)).collect(),
        );
        aliases.insert(
            FIELD_BARCODE,
            ["barcode", "ean", "条码", "商品条码"]
                .iter()
                .map(|s| normalize_header(s))
                .collect(),
        );
        Self { aliases }
    }

    /// 追加配置中的别名；未知字段忽略
    pub fn with_extra_aliases(mut self, extra: &HashMap<String, Vec<String>>) -> Self {
        for (field, names) in extra {
            let key = match field.as_str() {
                FIELD_CONTAINER => FIELD_CONTAINER,
                FIELD_QUANTITY => FIELD_QUANTITY,
                FIELD_BARCODE => FIELD_BARCODE,
                other => {
                    tracing::warn!(field = other, "未知的清单字段别名配置，已忽略");
                    continue;
                }
            };
            if let Some(list) = self.aliases.get_mut(key) {
                list.extend(names.iter().map(|n| normalize_header(n)));
            }
        }
        self
    }

    fn get_field(&self, row: &HashMap<String, String>, field: &str) -> Option<String> {
        let aliases = self.aliases.get(field)?;
        row.iter()
            .filter(|(header, _)| aliases.contains(&normalize_header(header)))
            .map(|(_, value)| value.trim())
            .find(|value| !value.is_empty())
            .map(str::to_string)
    }
}

impl Default for ManifestFieldMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldMapperTrait for ManifestFieldMapper {
    fn map_row(&self, row: &HashMap<String, String>, row_number: usize) -> RawManifestRow {
        RawManifestRow {
            row_number,
            container_number: self.get_field(row, FIELD_CONTAINER),
            quantity: self.get_field(row, FIELD_QUANTITY),
            barcode: self.get_field(row, FIELD_BARCODE),
        }
    }
}

/// 列名归一化: 去空白、小写
fn normalize_header(header: &str) -> String {
    header.trim().to_lowercase()
}

/// 解析数量
///
/// Excel 数值单元格可能带 ".0"，只接受正整数
pub fn parse_quantity(raw: Option<&str>, row_number: usize) -> ImportResult<u32> {
    let value = raw.ok_or_else(|| ImportError::TypeConversionError {
        row: row_number,
        field: FIELD_QUANTITY.to_string(),
        message: "数量为空".to_string(),
    })?;

    let conversion_error = || ImportError::TypeConversionError {
        row: row_number,
        field: FIELD_QUANTITY.to_string(),
        message: format!("无法解析为正整数: {}", value),
    };

    let quantity = match value.parse::<u32>() {
        Ok(q) => q,
        Err(_) => {
            let f = value.parse::<f64>().map_err(|_| conversion_error())?;
            if f.fract() != 0.0 || f < 0.0 || f > u32::MAX as f64 {
                return Err(conversion_error());
            }
            f as u32
        }
    };

    if quantity == 0 {
        return Err(conversion_error());
    }
    Ok(quantity)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_map_row_with_builtin_aliases() {
        let mapper = ManifestFieldMapper::new();
        let mapped = mapper.map_row(&row(&[("柜号", " B1 "), ("QTY", "3"), ("条码", "0078")]), 2);

        assert_eq!(mapped.container_number.as_deref(), Some("B1"));
        assert_eq!(mapped.quantity.as_deref(), Some("3"));
        assert_eq!(mapped.barcode.as_deref(), Some("0078"));
    }

    #[test]
    fn test_blank_cells_are_absent() {
        let mapper = ManifestFieldMapper::new();
        let mapped = mapper.map_row(&row(&[("container", ""), ("barcode", "X")]), 3);

        assert_eq!(mapped.container_number, None);
        assert_eq!(mapped.barcode.as_deref(), Some("X"));
    }

    #[test]
    fn test_extra_aliases_from_config() {
        let mut extra = HashMap::new();
        extra.insert("container".to_string(), vec!["Box".to_string()]);
        let mapper = ManifestFieldMapper::new().with_extra_aliases(&extra);

        let mapped = mapper.map_row(&row(&[("box", "C7")]), 2);
        assert_eq!(mapped.container_number.as_deref(), Some("C7"));
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity(Some("3"), 2).unwrap(), 3);
        assert_eq!(parse_quantity(Some("4.0"), 2).unwrap(), 4);
        assert!(parse_quantity(Some("0"), 2).is_err());
        assert!(parse_quantity(Some("2.5"), 2).is_err());
        assert!(parse_quantity(Some("abc"), 2).is_err());
        assert!(parse_quantity(None, 2).is_err());
    }
}
