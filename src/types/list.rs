// src/types/list.rs

//! # List Type Support
//!
//! Redis-like lists stored in memory as a `VecDeque<String>` under the key's shard.
//! A missing key reads as an empty list, and pushing to a missing key creates one.
//! A list that is popped empty is removed from the key space.
//!
//! Indices are lenient: negative indices count from the tail, and anything still out
//! of range is clamped to the nearest end instead of producing an error.
//!
//! Supported commands:
//! - `LPUSH`
//! - `RPUSH`
//! - `LPOP`
//! - `RPOP`
//! - `LLEN`
//! - `LINDEX`
//! - `LRANGE`

use crate::engine::command::{arity, clamp_index, parse_int};
use crate::engine::{Command, Mode, Reply, Store};
use crate::error::{KvError, Result};

/// Execute LPUSH:
/// Push every value, left to right, onto the head of the list at `key`,
/// so `LPUSH k a b` leaves `b` first.
///
/// # Returns
///
/// The new length of the list.
///
/// # Errors
///
/// `WrongType` if `key` holds a non-list value.
pub fn lpush(store: &Store, args: &[String]) -> Result<Reply> {
    arity(args.len() >= 2, "lpush")?;
    let mut g = store.lock(&args[0], Mode::Write);
    let list = g.list_mut(&args[0], true)?;
    for v in &args[1..] {
        list.push_front(v.clone());
    }
    let len = list.len();
    g.journal(Command::Lpush, args);
    Ok(Reply::Integer(len as i64))
}

/// Execute RPUSH:
/// Append every value to the tail of the list at `key`.
///
/// # Returns
///
/// The new length of the list.
pub fn rpush(store: &Store, args: &[String]) -> Result<Reply> {
    arity(args.len() >= 2, "rpush")?;
    let mut g = store.lock(&args[0], Mode::Write);
    let list = g.list_mut(&args[0], true)?;
    list.extend(args[1..].iter().cloned());
    let len = list.len();
    g.journal(Command::Rpush, args);
    Ok(Reply::Integer(len as i64))
}

/// Execute LPOP:
/// Remove and return the head element, or `(nil)` if the list is empty or missing.
pub fn lpop(store: &Store, args: &[String]) -> Result<Reply> {
    arity(args.len() == 1, "lpop")?;
    pop(store, args, Command::Lpop)
}

/// Execute RPOP:
/// Remove and return the tail element, or `(nil)` if the list is empty or missing.
pub fn rpop(store: &Store, args: &[String]) -> Result<Reply> {
    arity(args.len() == 1, "rpop")?;
    pop(store, args, Command::Rpop)
}

fn pop(store: &Store, args: &[String], cmd: Command) -> Result<Reply> {
    let key = &args[0];
    let mut g = store.lock(key, Mode::Write);
    let list = match g.list_mut(key, false) {
        Ok(l) => l,
        Err(KvError::NotFound) => return Ok(Reply::Nil),
        Err(e) => return Err(e),
    };
    let popped = match cmd {
        Command::Lpop => list.pop_front(),
        _ => list.pop_back(),
    };
    g.remove_if_empty(key);
    if popped.is_some() {
        g.journal(cmd, args);
    }
    Ok(popped.map_or(Reply::Nil, Reply::Bulk))
}

/// Execute LLEN:
/// Length of the list, `0` for a missing key.
pub fn llen(store: &Store, args: &[String]) -> Result<Reply> {
    arity(args.len() == 1, "llen")?;
    let g = store.lock(&args[0], Mode::Read);
    let list = g.list(&args[0], true)?;
    Ok(Reply::Integer(list.len() as i64))
}

/// Execute LINDEX:
/// Element at the (clamped) index, `(nil)` only when the list is empty.
pub fn lindex(store: &Store, args: &[String]) -> Result<Reply> {
    arity(args.len() == 2, "lindex")?;
    let index = parse_int(&args[1])?;
    let g = store.lock(&args[0], Mode::Read);
    let list = g.list(&args[0], true)?;
    if list.is_empty() {
        return Ok(Reply::Nil);
    }
    let i = clamp_index(index, list.len());
    Ok(Reply::Bulk(list[i].clone()))
}

/// Execute LRANGE:
/// Elements from `start` to `stop`, both inclusive after clamping.
///
/// # Arguments
///
/// * `key`   – Name of the list.
/// * `start` – First index, may be negative.
/// * `stop`  – Last index, may be negative.
pub fn lrange(store: &Store, args: &[String]) -> Result<Reply> {
    arity(args.len() == 3, "lrange")?;
    let start = parse_int(&args[1])?;
    let stop = parse_int(&args[2])?;
    let g = store.lock(&args[0], Mode::Read);
    let list = g.list(&args[0], true)?;
    if list.is_empty() {
        return Ok(Reply::Array(Vec::new()));
    }
    let start = clamp_index(start, list.len());
    let stop = clamp_index(stop, list.len());
    if start > stop {
        return Ok(Reply::Array(Vec::new()));
    }
    Ok(Reply::Array(list.range(start..=stop).cloned().collect()))
}
