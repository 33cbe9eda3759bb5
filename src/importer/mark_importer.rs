// ==========================================
// 货柜流转系统 - 追溯码录入器实现
// ==========================================
// 流程: 拆页 → 裁边（失败保留原页）→ 栅格化 + 识别（各页并发）
//       → 按页序去重落库 → 图片上传入队
// 识别失败: 落一条错误占位码等待人工处理，源页改名加 _error 后缀留档
// ==========================================

use crate::domain::mark::{part_id, Mark, MarkCode};
use crate::domain::types::{Owner, ProductRef, Resolved};
use crate::i18n::t_with_args;
use crate::importer::barcode::{extract_gtin, resolve_barcode};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::intake_trait::MarkImporter;
use crate::importer::report::{MarkImportReport, PageError};
use crate::integration::{CodeDecoder, DocumentToolkit, ProductCatalog};
use crate::queue::{Command, Lane, MessageQueue};
use crate::repository::error::RepositoryError;
use crate::repository::MarkRepository;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// 单页处理结果
#[derive(Debug)]
struct PageScan {
    page_no: usize,
    page: PathBuf,
    image: Option<PathBuf>,
    crop_failed: bool,
    // Ok(码内容) / Err(失败原因)
    decoded: Result<String, String>,
}

// ==========================================
// MarkImporterImpl
// ==========================================
pub struct MarkImporterImpl {
    toolkit: Arc<dyn DocumentToolkit>,
    decoder: Arc<dyn CodeDecoder>,
    catalog: Arc<dyn ProductCatalog>,
    mark_repo: Arc<MarkRepository>,
    queue: Arc<MessageQueue>,
    work_root: PathBuf, // 拆页产物目录，图片上传前需保留
}

impl MarkImporterImpl {
    pub fn new(
        toolkit: Arc<dyn DocumentToolkit>,
        decoder: Arc<dyn CodeDecoder>,
        catalog: Arc<dyn ProductCatalog>,
        mark_repo: Arc<MarkRepository>,
        queue: Arc<MessageQueue>,
        work_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            toolkit,
            decoder,
            catalog,
            mark_repo,
            queue,
            work_root: work_root.into(),
        }
    }

    /// 阶段 2 + 3（识别部分），在阻塞线程中执行
    fn scan_page(
        toolkit: &dyn DocumentToolkit,
        decoder: &dyn CodeDecoder,
        page_no: usize,
        page: PathBuf,
    ) -> PageScan {
        let (cropped, crop_failed) = match toolkit.crop(&page) {
            Ok(cropped) => (cropped, false),
            Err(e) => {
                warn!(page_no, error = %e, "裁边失败，使用原页继续");
                (page.clone(), true)
            }
        };

        let image = match toolkit.rasterize(&cropped) {
            Ok(image) => image,
            Err(e) => {
                return PageScan {
                    page_no,
                    page,
                    image: None,
                    crop_failed,
                    decoded: Err(format!("栅格化失败: {}", e)),
                }
            }
        };

        let decoded = match decoder.decode(&image) {
            Ok(out) if !out.is_error => Ok(out.text),
            Ok(out) => Err(out.text),
            Err(e) => Err(e.to_string()),
        };

        PageScan {
            page_no,
            page,
            image: Some(image),
            crop_failed,
            decoded,
        }
    }

    /// 按 GTIN 解析商品；目录不可用时记为 unknown
    fn resolve_product(&self, gtin: Option<&str>) -> ProductRef {
        let Some(gtin) = gtin else {
            return Resolved::Unresolved;
        };
        match resolve_barcode(self.catalog.as_ref(), gtin) {
            Ok(found) => Resolved::from(found),
            Err(e) => {
                warn!(gtin, error = %e, "商品目录查询失败，追溯码商品记为 unknown");
                Resolved::Unresolved
            }
        }
    }

    /// 识别失败页: 改名留档 + 落错误占位码
    fn record_error_page(
        &self,
        scan: &PageScan,
        reason: &str,
        owner: &Owner,
    ) -> ImportResult<PageError> {
        let renamed = error_path(&scan.page);
        // 改名失败不影响整批，占位码指向原文件
        let (archived, rename_error) = match fs::rename(&scan.page, &renamed) {
            Ok(()) => (renamed, None),
            Err(e) => {
                warn!(page_no = scan.page_no, page = %scan.page.display(), error = %e, "识别失败页改名失败");
                (scan.page.clone(), Some(e.to_string()))
            }
        };
        let renamed_str = archived.display().to_string();

        let mark = Mark::new_undefined(
            MarkCode::error_placeholder(&renamed_str),
            Resolved::Unresolved,
            None,
            owner.clone(),
            Some(renamed_str.clone()),
        );
        self.mark_repo.insert(&mark)?;

        warn!(page_no = scan.page_no, mark_id = %mark.mark_id, reason, "识别失败，已生成占位码");
        Ok(PageError {
            page: scan.page_no,
            mark_id: mark.mark_id,
            renamed_to: renamed_str,
            message: reason.to_string(),
            rename_error,
        })
    }
}

#[async_trait]
impl MarkImporter for MarkImporterImpl {
    #[instrument(skip(self, source, owner), fields(user_id = %owner.user_id))]
    async fn import_marks<P: AsRef<Path> + Send>(
        &self,
        source: P,
        owner: &Owner,
    ) -> ImportResult<MarkImportReport> {
        let start = Utc::now();
        let source = source.as_ref().to_path_buf();
        if !source.exists() {
            return Err(ImportError::FileNotFound(source.display().to_string()));
        }

        let batch_id = Uuid::new_v4().to_string();
        let work_dir = self.work_root.join(&batch_id);
        info!(source = %source.display(), batch_id = %batch_id, "开始录入追溯码");

        // === 阶段 1: 拆页 ===
        let toolkit = Arc::clone(&self.toolkit);
        let split_source = source.clone();
        let split_dir = work_dir.clone();
        let pages = tokio::task::spawn_blocking(move || toolkit.split(&split_source, &split_dir))
            .await
            .map_err(|e| ImportError::InternalError(format!("拆页任务异常: {}", e)))??;
        debug!(pages = pages.len(), "拆页完成");

        // === 阶段 2 + 3: 各页并发裁边、识别 ===
        let tasks = pages.into_iter().enumerate().map(|(idx, page)| {
            let toolkit = Arc::clone(&self.toolkit);
            let decoder = Arc::clone(&self.decoder);
            tokio::task::spawn_blocking(move || {
                Self::scan_page(toolkit.as_ref(), decoder.as_ref(), idx + 1, page)
            })
        });
        let mut scans = Vec::new();
        for joined in join_all(tasks).await {
            scans.push(joined.map_err(|e| ImportError::InternalError(format!("识别任务异常: {}", e)))?);
        }
        scans.sort_by_key(|s| s.page_no);

        // === 落库（按页序，保证去重结果稳定）===
        let mut report = MarkImportReport {
            batch_id,
            source: source.display().to_string(),
            pages: scans.len(),
            crop_failures: scans.iter().filter(|s| s.crop_failed).count(),
            ..Default::default()
        };
        let scanned_on = Utc::now().date_naive();

        for scan in &scans {
            let (text, image) = match (&scan.decoded, &scan.image) {
                (Ok(text), Some(image)) => (text, image),
                (Err(reason), _) => {
                    report.errors.push(self.record_error_page(scan, reason, owner)?);
                    continue;
                }
                (Ok(_), None) => {
                    report.errors.push(self.record_error_page(scan, "缺少图片", owner)?);
                    continue;
                }
            };

            let code = MarkCode::decoded(text.as_str());
            if self.mark_repo.exists_by_hash(&code.content_hash)? {
                info!(page_no = scan.page_no, "追溯码重复扫描，已丢弃");
                report.duplicates += 1;
                continue;
            }

            let gtin = extract_gtin(text);
            let product = self.resolve_product(gtin.as_deref());
            if !product.is_known() {
                report.unresolved_products += 1;
            }
            let part = gtin.as_deref().map(|g| part_id(g, scanned_on));

            let source_file = scan
                .page
                .file_name()
                .map(|n| n.to_string_lossy().to_string());
            let mark = Mark::new_undefined(code, product, part, owner.clone(), source_file);

            match self.mark_repo.insert(&mark) {
                Ok(()) => {}
                Err(RepositoryError::UniqueConstraintViolation(_)) => {
                    info!(page_no = scan.page_no, "追溯码已被并发录入，已丢弃");
                    report.duplicates += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            if let Err(e) = self.queue.enqueue(
                Command::UploadMarkImage {
                    mark_id: mark.mark_id.clone(),
                    image_path: image.display().to_string(),
                },
                Lane::Default,
                Duration::ZERO,
            ) {
                warn!(mark_id = %mark.mark_id, error = %e, "图片上传入队失败");
            }

            debug!(mark_id = %mark.mark_id, page_no = scan.page_no, "追溯码已录入");
            report.created.push(mark.mark_id);
        }

        report.message = t_with_args(
            "import.marks_summary",
            &[
                ("created", &report.created.len().to_string()),
                ("duplicates", &report.duplicates.to_string()),
                ("errors", &report.errors.len().to_string()),
            ],
        );
        report.elapsed_ms = (Utc::now() - start).num_milliseconds();
        info!(
            batch_id = %report.batch_id,
            created = report.created.len(),
            duplicates = report.duplicates,
            errors = report.errors.len(),
            "追溯码录入完成"
        );
        Ok(report)
    }
}

/// page-003.png → page-003_error.png
fn error_path(page: &Path) -> PathBuf {
    let stem = page
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match page.extension() {
        Some(ext) => format!("{}_error.{}", stem, ext.to_string_lossy()),
        None => format!("{}_error", stem),
    };
    page.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use crate::integration::{InMemoryCatalog, IntegrationResult, SidecarDecoder};
    use rusqlite::Connection;
    use std::sync::Mutex;

    /// 拆页结果固定，裁边与栅格化原样返回
    struct FixedPages(Vec<PathBuf>);

    impl DocumentToolkit for FixedPages {
        fn split(&self, _source: &Path, _work_dir: &Path) -> IntegrationResult<Vec<PathBuf>> {
            Ok(self.0.clone())
        }

        fn crop(&self, page: &Path) -> IntegrationResult<PathBuf> {
            Ok(page.to_path_buf())
        }

        fn rasterize(&self, page: &Path) -> IntegrationResult<PathBuf> {
            Ok(page.to_path_buf())
        }
    }

    #[tokio::test]
    async fn test_rename_failure_is_recorded_and_batch_continues() {
        let dir = tempfile::tempdir().unwrap();
        let vanished = dir.path().join("page-001.png");
        let good = dir.path().join("page-002.png");
        fs::write(&good, b"png").unwrap();
        fs::write(format!("{}.txt", good.display()), "0104600000000017215abc").unwrap();

        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let mark_repo = Arc::new(MarkRepository::from_connection(conn.clone()));
        let importer = MarkImporterImpl::new(
            Arc::new(FixedPages(vec![vanished.clone(), good])),
            Arc::new(SidecarDecoder),
            Arc::new(InMemoryCatalog::new()),
            mark_repo.clone(),
            Arc::new(MessageQueue::new(conn)),
            dir.path().join("work"),
        );

        let report = importer
            .import_marks(dir.path(), &Owner::new("u1", "p1"))
            .await
            .unwrap();

        assert_eq!(report.created.len(), 1);
        assert_eq!(report.errors.len(), 1);
        let error = &report.errors[0];
        assert_eq!(error.page, 1);
        assert!(error.rename_error.is_some());
        assert_eq!(error.renamed_to, vanished.display().to_string());
        assert!(mark_repo.find_by_id(&error.mark_id).unwrap().unwrap().code.is_error);
    }

    #[test]
    fn test_error_path() {
        assert_eq!(
            error_path(Path::new("/tmp/b/page-003.png")),
            PathBuf::from("/tmp/b/page-003_error.png")
        );
        assert_eq!(error_path(Path::new("page")), PathBuf::from("page_error"));
    }
}
