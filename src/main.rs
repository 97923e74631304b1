// src/main.rs
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cagedb::{config, db::DbManager, server};

#[derive(Parser)]
#[command(name = "cagedb")]
#[command(about = "Sharded in-memory KV store with an append-only log")]
struct Args {
    /// JSON 配置文件，不存在时写入默认配置
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// 覆盖配置里的监听地址
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut cfg = config::load(&args.config)?;
    if let Some(bind) = args.bind {
        cfg.bind = bind;
    }

    // 打开所有库（含日志重放）是阻塞操作
    let open_cfg = cfg.clone();
    let mgr = Arc::new(tokio::task::spawn_blocking(move || DbManager::open(&open_cfg)).await??);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    // 返回时连接任务已经全部退出
    server::run(&cfg.bind, mgr.clone(), shutdown).await?;

    info!("closing databases");
    tokio::task::spawn_blocking(move || mgr.close()).await?;
    Ok(())
}
