// ==========================================
// 货柜流转系统 - 商品目录
// ==========================================
// 职责: 条码 → 商品标识
// 说明: 目录本身只做精确匹配，去前导零的候选由调用方生成
// ==========================================

use crate::domain::types::ProductIdentity;
use crate::integration::error::{IntegrationError, IntegrationResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

/// 商品目录
pub trait ProductCatalog: Send + Sync {
    /// 按条码精确查找商品，找不到返回 None
    fn resolve_by_barcode(&self, code: &str) -> IntegrationResult<Option<ProductIdentity>>;
}

// ==========================================
// InMemoryCatalog - 内存目录
// ==========================================
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    entries: RwLock<HashMap<String, ProductIdentity>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, barcode: impl Into<String>, product: ProductIdentity) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(barcode.into(), product);
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProductCatalog for InMemoryCatalog {
    fn resolve_by_barcode(&self, code: &str) -> IntegrationResult<Option<ProductIdentity>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(code).cloned())
    }
}

// ==========================================
// CsvProductCatalog - CSV 目录文件
// ==========================================
// 列: barcode, product_id, offer_id, variation_id, modification_id
// 后三列可空
#[derive(Debug, Deserialize)]
struct CatalogRow {
    barcode: String,
    product_id: i64,
    offer_id: Option<i64>,
    variation_id: Option<i64>,
    modification_id: Option<i64>,
}

pub struct CsvProductCatalog {
    inner: InMemoryCatalog,
}

impl CsvProductCatalog {
    pub fn load<P: AsRef<Path>>(path: P) -> IntegrationResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path.as_ref())
            .map_err(|e| IntegrationError::InvalidData(e.to_string()))?;

        let inner = InMemoryCatalog::new();
        for (idx, record) in reader.deserialize::<CatalogRow>().enumerate() {
            let row = record.map_err(|e| {
                IntegrationError::InvalidData(format!("商品目录第 {} 行: {}", idx + 2, e))
            })?;
            let mut product = ProductIdentity::product(row.product_id);
            if let Some(offer_id) = row.offer_id {
                product = product.with_offer(offer_id);
            }
            if let Some(variation_id) = row.variation_id {
                product = product.with_variation(variation_id);
            }
            if let Some(modification_id) = row.modification_id {
                product = product.with_modification(modification_id);
            }
            inner.insert(row.barcode, product);
        }

        tracing::info!(path = %path.as_ref().display(), entries = inner.len(), "商品目录已加载");
        Ok(Self { inner })
    }
}

impl ProductCatalog for CsvProductCatalog {
    fn resolve_by_barcode(&self, code: &str) -> IntegrationResult<Option<ProductIdentity>> {
        self.inner.resolve_by_barcode(code)
    }
}
