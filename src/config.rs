// src/config.rs

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};
use tracing::info;

/// 进程启动后读到的全局配置
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// 日志文件所在目录，每个库一个 `db_<name>`
    pub data_dir: PathBuf,
    /// 监听地址
    pub bind: String,
    /// 可 SELECT 的数据库个数
    pub databases: usize,
    /// 每个库的分片数
    pub shards: usize,
    /// 是否打开 AOF 日志
    pub aof: bool,
    /// 追加多少条记录后触发一次重写，0 表示不自动重写
    pub rewrite_threshold: u64,
    /// 写线程队列长度，满了之后执行命令会阻塞
    pub log_queue_capacity: usize,
    /// 后台清理过期 key 的周期（秒）
    pub ttl_check_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("data"),
            bind: "127.0.0.1:6380".to_string(),
            databases: 16,
            shards: 256,
            aof: true,
            rewrite_threshold: 1000,
            log_queue_capacity: 256,
            ttl_check_interval_secs: 5,
        }
    }
}

/// 从指定路径读取并反序列化 JSON 配置
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path_ref = path.as_ref();

    // 如果配置文件不存在，创建默认配置
    if !path_ref.exists() {
        let default_cfg = Config::default();
        let default_json = serde_json::to_string_pretty(&default_cfg)?;
        fs::write(path_ref, default_json)
            .with_context(|| format!("Failed to write default config {path_ref:?}"))?;
        info!(path = ?path_ref, "default config created");
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path_ref)
        .with_context(|| format!("Failed to read config file {path_ref:?}"))?;
    let cfg: Config = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse {path_ref:?}"))?;
    Ok(cfg)
}
