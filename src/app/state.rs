// ==========================================
// 货柜流转系统 - 应用状态
// ==========================================
// 职责: 组装仓储、引擎、队列与 API 实例
// ==========================================

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::api::{ImportApi, MarkApi, SupplyApi};
use crate::config::{ConfigManager, WorkflowSettings};
use crate::engine::{
    GoodsReceiptRequester, MarkAllocationEngine, MarkLifecycleService, OptionalSupplyNotifier,
    ReceivedProductHandler, StatusTransitionOrchestrator, WorkflowDispatcher,
};
use crate::importer::{ManifestImporterImpl, MarkImporterImpl};
use crate::integration::{
    CodeDecoder, DocumentToolkit, FileDocumentToolkit, FileStorage, InMemoryCatalog,
    InventoryGateway, LocalFileStorage, LoggingInventoryGateway, ProductCatalog, SidecarDecoder,
};
use crate::queue::{Clock, DedupStore, MessageQueue, QueueWorker, SystemClock};
use crate::repository::{MarkRepository, SupplyRepository};

// ==========================================
// Collaborators - 外部协作方
// ==========================================
/// 外部协作方集合，测试时可逐个替换为假实现
pub struct Collaborators {
    pub catalog: Arc<dyn ProductCatalog>,
    pub gateway: Arc<dyn InventoryGateway>,
    pub storage: Arc<dyn FileStorage>,
    pub toolkit: Arc<dyn DocumentToolkit>,
    pub decoder: Arc<dyn CodeDecoder>,
    pub notifier: OptionalSupplyNotifier,
    pub clock: Arc<dyn Clock>,
    /// 扫描件拆页产物目录
    pub work_root: PathBuf,
}

impl Collaborators {
    /// 本地离线运行的默认协作方
    ///
    /// - 商品目录为空（可用 with_catalog 替换）
    /// - 入库申请只记日志
    /// - 图片存到 data_dir/cdn
    pub fn local(data_dir: &Path) -> Self {
        Self {
            catalog: Arc::new(InMemoryCatalog::new()),
            gateway: Arc::new(LoggingInventoryGateway),
            storage: Arc::new(LocalFileStorage::new(data_dir.join("cdn"))),
            toolkit: Arc::new(FileDocumentToolkit::new()),
            decoder: Arc::new(SidecarDecoder),
            notifier: OptionalSupplyNotifier::none(),
            clock: Arc::new(SystemClock),
            work_root: data_dir.join("intake"),
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn ProductCatalog>) -> Self {
        self.catalog = catalog;
        self
    }
}

/// 应用状态
///
/// 包含所有API实例和共享资源
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    pub conn: Arc<Mutex<Connection>>,
    pub config_manager: Arc<ConfigManager>,
    pub settings: WorkflowSettings,

    pub supply_repo: Arc<SupplyRepository>,
    pub mark_repo: Arc<MarkRepository>,
    pub queue: Arc<MessageQueue>,

    pub allocation: Arc<MarkAllocationEngine>,
    pub transitions: Arc<StatusTransitionOrchestrator>,
    pub received_handler: Arc<ReceivedProductHandler>,

    /// 队列消费者
    pub worker: Arc<QueueWorker>,

    pub supply_api: Arc<SupplyApi>,
    pub mark_api: Arc<MarkApi>,
    pub import_api: Arc<ImportApi<Arc<ConfigManager>>>,
}

impl AppState {
    /// 使用本地默认协作方创建 AppState
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    ///
    /// # 返回
    /// - Ok(AppState): 初始化成功
    /// - Err(String): 初始化错误
    pub fn new(db_path: String) -> Result<Self, String> {
        let data_dir = Path::new(&db_path)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::with_collaborators(db_path, Collaborators::local(&data_dir))
    }

    /// 使用指定协作方创建 AppState
    ///
    /// # 说明
    /// 该方法会：
    /// 1. 打开共享连接并建表
    /// 2. 加载配置
    /// 3. 初始化所有Repository / Engine
    /// 4. 创建队列消费者与 API 实例
    pub fn with_collaborators(db_path: String, collab: Collaborators) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = crate::db::open_shared_connection(&db_path)
            .map_err(|e| format!("无法打开数据库: {}", e))?;

        // ==========================================
        // 配置
        // ==========================================
        let config_manager = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );
        let settings = WorkflowSettings::load(&config_manager)
            .map_err(|e| format!("无法加载配置: {}", e))?;

        // ==========================================
        // 初始化Repository层
        // ==========================================
        let supply_repo = Arc::new(SupplyRepository::from_connection(conn.clone()));
        let mark_repo = Arc::new(MarkRepository::from_connection(conn.clone()));
        let queue = Arc::new(MessageQueue::with_clock(conn.clone(), collab.clock.clone()));
        let dedup = Arc::new(DedupStore::new(conn.clone()));

        // ==========================================
        // 初始化Engine层
        // ==========================================
        let notifier = Arc::new(collab.notifier);

        let allocation = Arc::new(MarkAllocationEngine::new(
            supply_repo.clone(),
            mark_repo.clone(),
            queue.clone(),
            notifier.clone(),
            settings.clone(),
        ));
        let transitions = Arc::new(StatusTransitionOrchestrator::new(
            supply_repo.clone(),
            mark_repo.clone(),
            queue.clone(),
            notifier.clone(),
        ));
        let receipt_requester = Arc::new(GoodsReceiptRequester::new(
            supply_repo.clone(),
            collab.gateway.clone(),
        ));
        let received_handler = Arc::new(ReceivedProductHandler::new(
            supply_repo.clone(),
            queue.clone(),
        ));
        let mark_lifecycle = Arc::new(MarkLifecycleService::new(
            mark_repo.clone(),
            collab.storage.clone(),
            settings.mark_image_prefix.clone(),
        ));

        let dispatcher = Arc::new(WorkflowDispatcher::new(
            allocation.clone(),
            transitions.clone(),
            receipt_requester,
            received_handler.clone(),
            mark_lifecycle,
            settings.clone(),
        ));
        let worker = Arc::new(QueueWorker::new(
            queue.clone(),
            dedup,
            dispatcher,
            settings.retry_policy(),
            settings.batch_size,
        ));

        // ==========================================
        // 初始化API层
        // ==========================================
        let supply_api = Arc::new(SupplyApi::new(
            supply_repo.clone(),
            collab.catalog.clone(),
            allocation.clone(),
            transitions.clone(),
            queue.clone(),
        ));
        let mark_api = Arc::new(MarkApi::new(mark_repo.clone(), collab.catalog.clone()));

        let manifest_importer = Arc::new(ManifestImporterImpl::new(
            config_manager.clone(),
            collab.catalog.clone(),
            supply_repo.clone(),
            allocation.clone(),
        ));
        let mark_importer = Arc::new(MarkImporterImpl::new(
            collab.toolkit.clone(),
            collab.decoder.clone(),
            collab.catalog.clone(),
            mark_repo.clone(),
            queue.clone(),
            collab.work_root.clone(),
        ));
        let import_api = Arc::new(ImportApi::new(manifest_importer, mark_importer));

        tracing::info!("AppState初始化完成");

        Ok(Self {
            db_path,
            conn,
            config_manager,
            settings,
            supply_repo,
            mark_repo,
            queue,
            allocation,
            transitions,
            received_handler,
            worker,
            supply_api,
            mark_api,
            import_api,
        })
    }
}

/// 获取默认数据库路径
///
/// 优先使用环境变量 SUPPLY_TRACE_DB_PATH，否则放在用户数据目录
pub fn get_default_db_path() -> String {
    // 允许通过环境变量显式指定 DB 路径（便于调试/测试/CI）
    if let Ok(path) = std::env::var("SUPPLY_TRACE_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./supply_trace.db");

    if let Some(data_dir) = dirs::data_dir() {
        #[cfg(debug_assertions)]
        let dir = data_dir.join("supply-trace-dev");

        #[cfg(not(debug_assertions))]
        let dir = data_dir.join("supply-trace");

        // 目录创建失败时退回当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("supply_trace.db");
        }
    }

    path.to_string_lossy().to_string()
}
