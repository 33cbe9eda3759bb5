// ==========================================
// 货柜流转系统 - 命令行入口
// ==========================================
// 子命令: init-db / import-manifest / import-marks / status / worker
// ==========================================

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use supply_trace::api::StatusChangeRequest;
use supply_trace::app::{get_default_db_path, AppState, Collaborators};
use supply_trace::domain::types::Owner;
use supply_trace::integration::{CommandDecoder, CsvProductCatalog, FileDocumentToolkit};

/// 进口货柜流转与追溯码分配
#[derive(Parser, Debug)]
#[command(name = "supply-trace", version, about)]
struct Cli {
    /// 数据库文件路径（默认: SUPPLY_TRACE_DB_PATH 或用户数据目录）
    #[arg(long, global = true)]
    db: Option<String>,

    /// 商品目录 CSV（barcode,product_id,offer_id,variation_id,modification_id）
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// 界面语言（zh-CN / en）
    #[arg(long, global = true, default_value = "zh-CN")]
    locale: String,

    /// JSON 格式日志
    #[arg(long, global = true)]
    json_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 创建数据库与全部表结构
    InitDb,

    /// 录入清单文件（.xlsx/.xls/.csv）
    ImportManifest {
        file: PathBuf,
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "default")]
        profile: String,
        #[arg(long, default_value = "cli")]
        actor: String,
    },

    /// 录入扫描件（目录或单页文件）
    ImportMarks {
        source: PathBuf,
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "default")]
        profile: String,
        /// 外部识别命令，例如 "dmtxread -n {input}"；不给时读取 <图片>.txt
        #[arg(long)]
        decoder: Option<String>,
        /// 外部裁边命令，例如 "convert {input} -trim {output}"
        #[arg(long)]
        crop: Option<String>,
    },

    /// 批量变更货柜状态
    Status {
        /// 目标状态（CLEARANCE / CLEARED / DELIVERY / CANCELED）
        target: String,
        /// 货柜ID
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long)]
        declaration: Option<String>,
        #[arg(long, default_value = "cli")]
        actor: String,
        /// 走通用入口（已记录过的状态按重放处理）
        #[arg(long)]
        by_name: bool,
    },

    /// 运行队列消费者
    Worker {
        /// 只处理当前到期的消息后退出
        #[arg(long)]
        once: bool,
    },
}

fn split_command(template: &str) -> Vec<String> {
    template.split_whitespace().map(str::to_string).collect()
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn build_state(cli: &Cli, collab_override: Option<Collaborators>) -> anyhow::Result<AppState> {
    let db_path = cli.db.clone().unwrap_or_else(get_default_db_path);
    let data_dir = Path::new(&db_path)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut collab = collab_override.unwrap_or_else(|| Collaborators::local(&data_dir));
    if let Some(catalog_path) = &cli.catalog {
        let catalog = CsvProductCatalog::load(catalog_path)
            .with_context(|| format!("无法加载商品目录 {}", catalog_path.display()))?;
        collab = collab.with_catalog(Arc::new(catalog));
    }

    AppState::with_collaborators(db_path, collab).map_err(|e| anyhow!(e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.json_log {
        supply_trace::logging::init_json();
    } else {
        supply_trace::logging::init();
    }
    supply_trace::i18n::set_locale(&cli.locale);

    tracing::info!("{} v{}", supply_trace::APP_NAME, supply_trace::VERSION);

    match &cli.command {
        Commands::InitDb => {
            let state = build_state(&cli, None)?;
            tracing::info!(db_path = %state.db_path, "数据库已就绪");
            println!("{}", state.db_path);
        }

        Commands::ImportManifest {
            file,
            user,
            profile,
            actor,
        } => {
            let state = build_state(&cli, None)?;
            let owner = Owner::new(user, profile);
            let report = state
                .import_api
                .import_manifest(&file.to_string_lossy(), &owner, actor)
                .await?;
            print_json(&report)?;
        }

        Commands::ImportMarks {
            source,
            user,
            profile,
            decoder,
            crop,
        } => {
            let db_path = cli.db.clone().unwrap_or_else(get_default_db_path);
            let data_dir = Path::new(&db_path)
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            let mut collab = Collaborators::local(&data_dir);
            if let Some(template) = decoder {
                collab.decoder = Arc::new(CommandDecoder::new(split_command(template)));
            }
            if let Some(template) = crop {
                collab.toolkit = Arc::new(FileDocumentToolkit {
                    crop_command: Some(split_command(template)),
                    rasterize_command: None,
                });
            }

            let state = build_state(&cli, Some(collab))?;
            let owner = Owner::new(user, profile);
            let report = state
                .import_api
                .import_marks(&source.to_string_lossy(), &owner)
                .await?;
            print_json(&report)?;
        }

        Commands::Status {
            target,
            ids,
            declaration,
            actor,
            by_name,
        } => {
            let state = build_state(&cli, None)?;
            let request = StatusChangeRequest {
                supply_ids: ids.clone(),
                target_status: target.clone(),
                declaration_number: declaration.clone(),
                actor: Some(actor.clone()),
            };
            let response = if *by_name {
                state.supply_api.change_status_by_name(&request)?
            } else {
                state.supply_api.change_status(&request)?
            };
            print_json(&response)?;
        }

        Commands::Worker { once } => {
            let state = build_state(&cli, None)?;
            if *once {
                state.queue.recover_interrupted()?;
                let stats = state.worker.drain()?;
                print_json(&stats)?;
            } else {
                state
                    .worker
                    .clone()
                    .run(state.settings.poll_interval())
                    .await?;
            }
        }
    }

    Ok(())
}
