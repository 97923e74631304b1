// src/types/zset.rs

//! Sorted Set 命令，底层是 [`SortedSet`](super::avl::SortedSet)。
//!
//! 不存在的 key 读作空集合；成员被删光后 key 一并删除。
//! 按排名取区间时，下标规则与 List 相同（负数从尾部数，越界夹到两端）。

use crate::engine::command::{arity, clamp_index, parse_float, parse_int};
use crate::engine::{Command, Mode, Reply, Store};
use crate::error::{KvError, Result};

/// ZADD <key> <score> <member> [score member ...]
///
/// 先校验全部 score，任意一个不合法则整条命令不生效。
/// 返回处理的 (score, member) 对数，已存在的成员会被移动到新 score。
pub fn zadd(store: &Store, args: &[String]) -> Result<Reply> {
    arity(args.len() >= 3 && args.len() % 2 == 1, "zadd")?;
    let pairs = args[1..]
        .chunks_exact(2)
        .map(|p| Ok((parse_float(&p[0])?, p[1].as_str())))
        .collect::<Result<Vec<(f64, &str)>>>()?;

    let mut g = store.lock(&args[0], Mode::Write);
    let zset = g.zset_mut(&args[0], true)?;
    for (score, member) in &pairs {
        zset.add(*score, member);
    }
    g.journal(Command::Zadd, args);
    Ok(Reply::Integer(pairs.len() as i64))
}

/// ZREM <key> <member> [member ...]，返回实际删除的成员数
pub fn zrem(store: &Store, args: &[String]) -> Result<Reply> {
    arity(args.len() >= 2, "zrem")?;
    let key = &args[0];
    let mut g = store.lock(key, Mode::Write);
    let zset = match g.zset_mut(key, false) {
        Ok(z) => z,
        Err(KvError::NotFound) => return Ok(Reply::Integer(0)),
        Err(e) => return Err(e),
    };
    let removed = args[1..].iter().filter(|m| zset.remove(m).is_ok()).count();
    g.remove_if_empty(key);
    if removed > 0 {
        g.journal(Command::Zrem, args);
    }
    Ok(Reply::Integer(removed as i64))
}

/// ZCARD <key>
pub fn zcard(store: &Store, args: &[String]) -> Result<Reply> {
    arity(args.len() == 1, "zcard")?;
    let g = store.lock(&args[0], Mode::Read);
    let zset = g.zset(&args[0], true)?;
    Ok(Reply::Integer(zset.len() as i64))
}

/// ZRANGE <key> <start> <stop>，按排名闭区间返回成员
pub fn zrange(store: &Store, args: &[String]) -> Result<Reply> {
    arity(args.len() == 3, "zrange")?;
    let start = parse_int(&args[1])?;
    let stop = parse_int(&args[2])?;
    let g = store.lock(&args[0], Mode::Read);
    let zset = g.zset(&args[0], true)?;
    if zset.is_empty() {
        return Ok(Reply::Array(Vec::new()));
    }
    let start = clamp_index(start, zset.len());
    let stop = clamp_index(stop, zset.len());
    let members = zset
        .range_by_rank(start, stop)
        .into_iter()
        .map(|e| e.member)
        .collect();
    Ok(Reply::Array(members))
}

/// ZRANGEBYSCORE <key> <min> <max>，min <= score <= max
pub fn zrangebyscore(store: &Store, args: &[String]) -> Result<Reply> {
    arity(args.len() == 3, "zrangebyscore")?;
    let (min, max) = (parse_float(&args[1])?, parse_float(&args[2])?);
    let g = store.lock(&args[0], Mode::Read);
    let zset = g.zset(&args[0], true)?;
    let members = zset
        .range_by_score(min, max)
        .into_iter()
        .map(|e| e.member)
        .collect();
    // 不在只读名单里，照样记录；重放时是空操作
    g.journal(Command::Zrangebyscore, args);
    Ok(Reply::Array(members))
}

/// ZCOUNT <key> <min> <max>
pub fn zcount(store: &Store, args: &[String]) -> Result<Reply> {
    arity(args.len() == 3, "zcount")?;
    let (min, max) = (parse_float(&args[1])?, parse_float(&args[2])?);
    let g = store.lock(&args[0], Mode::Read);
    let zset = g.zset(&args[0], true)?;
    Ok(Reply::Integer(zset.range_by_score(min, max).len() as i64))
}

/// ZRANK <key> <member>，成员不存在返回 (nil)
pub fn zrank(store: &Store, args: &[String]) -> Result<Reply> {
    arity(args.len() == 2, "zrank")?;
    let g = store.lock(&args[0], Mode::Read);
    let zset = g.zset(&args[0], true)?;
    match zset.rank(&args[1]) {
        Ok(r) => Ok(Reply::Integer(r as i64)),
        Err(KvError::NotFound) => Ok(Reply::Nil),
        Err(e) => Err(e),
    }
}

/// ZSCORE <key> <member>
pub fn zscore(store: &Store, args: &[String]) -> Result<Reply> {
    arity(args.len() == 2, "zscore")?;
    let g = store.lock(&args[0], Mode::Read);
    let zset = g.zset(&args[0], true)?;
    match zset.score(&args[1]) {
        Ok(s) => Ok(Reply::Float(s)),
        Err(KvError::NotFound) => Ok(Reply::Nil),
        Err(e) => Err(e),
    }
}
