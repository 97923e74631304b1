// src/db.rs

//! 一个数据库 = 一个引擎 + 一份追加日志 + 一个过期清理线程。
//! [`DbManager`] 持有固定数量的库，连接通过 `SELECT` 在它们之间切换。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::Config;
use crate::engine::{Command, Engine, Reply};
use crate::error::KvError;
use crate::expire::Reaper;
use crate::persistence::{Aof, LogCodec};

pub struct Db {
    name: String,
    engine: Engine,
    aof: Option<Arc<Aof>>,
    reaper: Mutex<Reaper>,
    /// `exec` 持读锁执行，`close` 拿写锁置位；关闭之后的命令一律报错
    closed: RwLock<bool>,
}

impl Db {
    /// 建引擎、重放日志、启动写线程和清理线程
    pub fn open(name: &str, cfg: &Config) -> Result<Db> {
        let engine = Engine::new(cfg.shards);
        let aof = if cfg.aof {
            let path = Aof::path_for(&cfg.data_dir, name);
            match Aof::open(path, cfg, &engine) {
                Ok(aof) => Some(Arc::new(aof)),
                Err(e) => {
                    warn!(db = name, error = %e, "append-only log unavailable, persistence disabled");
                    None
                }
            }
        } else {
            None
        };
        // 重放已经结束，从这里开始的写入才进日志
        if let Some(aof) = &aof {
            engine.store().attach_journal(aof.clone());
        }
        let interval = Duration::from_secs(cfg.ttl_check_interval_secs.max(1));
        let reaper = Reaper::start(engine.store().clone(), interval);
        info!(db = name, keys = engine.store().len(), "database opened");
        Ok(Db {
            name: name.to_string(),
            engine,
            aof,
            reaper: Mutex::new(reaper),
            closed: RwLock::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn aof(&self) -> Option<&Aof> {
        self.aof.as_deref()
    }

    /// 执行一条命令，返回回复的文本行。
    ///
    /// 写命令在释放分片锁之前进入日志队列，所以回复之前记录已经排上队。
    pub fn exec(&self, args: Vec<Vec<u8>>) -> Vec<String> {
        let closed = self.closed.read();
        if *closed {
            return Reply::Error(KvError::Closed).into_lines();
        }
        if args.is_empty() {
            return Reply::Error(KvError::EmptyCommand).into_lines();
        }
        let args: Vec<String> = args
            .into_iter()
            .map(|a| String::from_utf8_lossy(&a).into_owned())
            .collect();
        if self.aof.is_some() && !LogCodec::encodable(&args) {
            let write = Command::parse(&args[0]).is_ok_and(|c| !c.is_read_only());
            if write {
                return Reply::Error(KvError::Unloggable).into_lines();
            }
        }
        self.engine.handle(&args).into_lines()
    }

    /// 拒绝新命令、等在途命令结束，然后排空并刷新日志、等待重写、停掉清理线程。
    /// 可重复调用。
    pub fn close(&self) {
        let mut closed = self.closed.write();
        *closed = true;
        if let Some(aof) = &self.aof {
            aof.close();
        }
        self.reaper.lock().stop();
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        self.close();
    }
}

/// 固定数量的库，名字依次是 "0"、"1"……
pub struct DbManager {
    dbs: Vec<Db>,
}

impl DbManager {
    pub fn open(cfg: &Config) -> Result<DbManager> {
        let dbs = (0..cfg.databases.max(1))
            .map(|i| Db::open(&i.to_string(), cfg))
            .collect::<Result<Vec<_>>>()?;
        Ok(DbManager { dbs })
    }

    pub fn len(&self) -> usize {
        self.dbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dbs.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Db> {
        self.dbs.get(idx)
    }

    pub fn close(&self) {
        for db in &self.dbs {
            db.close();
        }
    }
}
