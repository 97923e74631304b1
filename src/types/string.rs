// src/types/string.rs

//! String 命令：SET / GET / DEL / MSET，以及遍历键空间的 KEYS。
//! DEL 和 MSET 会触及多个 key，统一通过 `Store::locks` 按分片序号加锁。
//! 写命令在释放锁之前调用 `journal`。

use crate::engine::command::arity;
use crate::engine::{Command, Mode, Reply, Store, Value};
use crate::error::{KvError, Result};

/// SET <key> <value>
pub fn set(store: &Store, args: &[String]) -> Result<Reply> {
    arity(args.len() == 2, "set")?;
    let mut g = store.lock(&args[0], Mode::Write);
    g.put(&args[0], Value::String(args[1].clone()));
    g.journal(Command::Set, args);
    Ok(Reply::ok())
}

/// GET <key>
pub fn get(store: &Store, args: &[String]) -> Result<Reply> {
    arity(args.len() == 1, "get")?;
    let g = store.lock(&args[0], Mode::Read);
    match g.string(&args[0]) {
        Ok(s) => Ok(Reply::Bulk(s.to_string())),
        Err(KvError::NotFound) => Ok(Reply::Nil),
        Err(e) => Err(e),
    }
}

/// DEL <key> [key ...]，返回实际删除的个数
pub fn del(store: &Store, args: &[String]) -> Result<Reply> {
    arity(!args.is_empty(), "del")?;
    let mut g = store.locks(args, Mode::Write);
    let deleted = args.iter().filter(|k| g.del(k).is_ok()).count();
    if deleted > 0 {
        g.journal(Command::Del, args);
    }
    Ok(Reply::Integer(deleted as i64))
}

/// MSET <key> <value> [key value ...]
pub fn mset(store: &Store, args: &[String]) -> Result<Reply> {
    arity(!args.is_empty() && args.len() % 2 == 0, "mset")?;
    let keys: Vec<&String> = args.iter().step_by(2).collect();
    let mut g = store.locks(&keys, Mode::Write);
    for pair in args.chunks_exact(2) {
        g.put(&pair[0], Value::String(pair[1].clone()));
    }
    g.journal(Command::Mset, args);
    Ok(Reply::ok())
}

/// KEYS <pattern>
pub fn keys(store: &Store, args: &[String]) -> Result<Reply> {
    arity(args.len() == 1, "keys")?;
    Ok(Reply::Array(store.keys(&args[0])))
}
