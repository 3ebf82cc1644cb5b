//! PACS归档浏览命令行程序

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use pacs_archive::{ArchiveClient, ArchiveConfig};
use pacs_core::utils::is_valid_dicom_uid;
use pacs_hierarchy::{ArchiveSession, Availability, ViewState};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};

/// 归档浏览命令行参数
#[derive(Parser, Debug)]
#[command(name = "pacs-browser")]
#[command(about = "浏览影像归档中的患者、检查、序列和实例")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 归档基础地址，覆盖配置文件
    #[arg(short, long)]
    base_url: Option<String>,

    /// 日志级别
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 检查归档是否可达
    Status,
    /// 按患者分组列出所有检查
    Studies,
    /// 列出检查下的序列
    Series { study_id: String },
    /// 列出序列下的实例
    Instances { series_id: String },
    /// 生成实例的文件和预览地址
    Urls { instance_id: String },
    /// 生成WADO-URI地址
    Wado {
        study_uid: String,
        series_uid: String,
        object_uid: String,
    },
    /// 上传DICOM文件
    Upload { path: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 初始化日志，标准输出只保留JSON结果
    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .with_writer(std::io::stderr)
        .init();

    let mut config =
        ArchiveConfig::load(args.config.as_deref()).context("Failed to load archive configuration")?;
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
        config.validate()?;
    }
    info!("Using archive at {}", config.base_url);

    match args.command {
        Command::Urls { instance_id } => {
            let session = offline_session(&config)?;
            print_json(&json!({
                "file": session.file_url(&instance_id),
                "preview": session.preview_url(&instance_id),
            }))
        }
        Command::Wado {
            study_uid,
            series_uid,
            object_uid,
        } => {
            for uid in [&study_uid, &series_uid, &object_uid] {
                if !is_valid_dicom_uid(uid) {
                    warn!("{} does not look like a DICOM UID", uid);
                }
            }
            let session = offline_session(&config)?;
            print_json(&json!({
                "wado": session.wado_url(&study_uid, &series_uid, &object_uid),
            }))
        }
        Command::Status => {
            let session = ArchiveSession::from_config(&config).await?;
            if session.availability() != Availability::Available {
                return print_json(&json!({ "available": false }));
            }
            let system = session.system_info().await?;
            print_json(&json!({ "available": true, "system": system }))
        }
        Command::Studies => {
            let session = connected_session(&config).await?;
            match session.refresh().await {
                ViewState::Loaded { group_count } => {
                    info!("Loaded {} patient groups", group_count);
                    let snapshot = session
                        .snapshot()
                        .context("Loaded session has no snapshot")?;
                    print_json(&snapshot.groups)
                }
                ViewState::Failed { message } => bail!(message),
                other => bail!("Unexpected session state: {:?}", other),
            }
        }
        Command::Series { study_id } => {
            let session = connected_session(&config).await?;
            print_json(&session.list_series(&study_id).await?)
        }
        Command::Instances { series_id } => {
            let session = connected_session(&config).await?;
            print_json(&session.list_instances(&series_id).await?)
        }
        Command::Upload { path } => {
            let payload = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Could not read {}", path.display()))?;
            let session = connected_session(&config).await?;
            let instance_id = session.upload_binary(payload).await?;
            print_json(&json!({
                "id": instance_id,
                "file": session.file_url(&instance_id),
            }))
        }
    }
}

/// 只生成地址，不探测归档
fn offline_session(config: &ArchiveConfig) -> anyhow::Result<ArchiveSession> {
    let client = ArchiveClient::from_config(config)?;
    Ok(ArchiveSession::new(client, config.max_concurrency))
}

async fn connected_session(config: &ArchiveConfig) -> anyhow::Result<ArchiveSession> {
    let session = ArchiveSession::from_config(config).await?;
    if matches!(session.view_state(), ViewState::Unreachable) {
        bail!("Archive at {} is unreachable", config.base_url);
    }
    Ok(session)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
