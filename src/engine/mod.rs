// src/engine/mod.rs

//! # 引擎模块
//!
//! `engine` 是整个数据库的执行核心：
//! - 接收已经解码好的命令（`&[String]`，第 0 个元素为命令名）；
//! - 通过 [`Command`] 枚举把命令名映射到处理函数（编译期确定的分发表）；
//! - 处理函数对 [`Store`] 加锁、读写数据，返回 [`Reply`]。
//!
//! 参数错误、类型错误都是可恢复的，以 `(error) ...` 文本回复；
//! 内部不变式被破坏（锁顺序、树失衡）则直接 panic。

pub mod command;
pub mod reply;
pub mod store;

use std::sync::Arc;

pub use command::Command;
pub use reply::Reply;
pub use store::{Journal, Locked, Mode, Store, Ttl, Value};

use crate::error::KvError;

#[derive(Clone)]
pub struct Engine {
    store: Arc<Store>,
}

impl Engine {
    pub fn new(shards: usize) -> Self {
        Engine {
            store: Arc::new(Store::new(shards)),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Execute one command. `cmd[0]` is the command name.
    pub fn handle<S: AsRef<str>>(&self, cmd: &[S]) -> Reply {
        let Some((name, args)) = cmd.split_first() else {
            return Reply::Error(KvError::EmptyCommand);
        };
        let command = match Command::parse(name.as_ref()) {
            Ok(c) => c,
            Err(e) => return Reply::Error(e),
        };
        let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
        (command.handler())(&self.store, &args).unwrap_or_else(Reply::from)
    }
}
