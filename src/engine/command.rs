// src/engine/command.rs

//! The closed command set and its dispatch table.

use super::reply::Reply;
use super::store::Store;
use crate::error::{KvError, Result};
use crate::expire;
use crate::types::{list, string, zset};

/// Handler signature: arguments exclude the command name.
pub type Handler = fn(&Store, &[String]) -> Result<Reply>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // string
    Set,
    Get,
    Del,
    Mset,
    Expire,
    Persist,
    Ttl,
    Keys,
    // list
    Lpush,
    Rpush,
    Lpop,
    Rpop,
    Llen,
    Lindex,
    Lrange,
    // sorted set
    Zadd,
    Zrem,
    Zcard,
    Zrange,
    Zrangebyscore,
    Zcount,
    Zrank,
    Zscore,
}

impl Command {
    pub const ALL: [Command; 23] = [
        Command::Set,
        Command::Get,
        Command::Del,
        Command::Mset,
        Command::Expire,
        Command::Persist,
        Command::Ttl,
        Command::Keys,
        Command::Lpush,
        Command::Rpush,
        Command::Lpop,
        Command::Rpop,
        Command::Llen,
        Command::Lindex,
        Command::Lrange,
        Command::Zadd,
        Command::Zrem,
        Command::Zcard,
        Command::Zrange,
        Command::Zrangebyscore,
        Command::Zcount,
        Command::Zrank,
        Command::Zscore,
    ];

    /// Case-insensitive name lookup.
    pub fn parse(name: &str) -> Result<Command> {
        let upper = name.to_ascii_uppercase();
        Command::ALL
            .into_iter()
            .find(|c| c.name() == upper)
            .ok_or(KvError::UnknownCommand(name.to_string()))
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::Set => "SET",
            Command::Get => "GET",
            Command::Del => "DEL",
            Command::Mset => "MSET",
            Command::Expire => "EXPIRE",
            Command::Persist => "PERSIST",
            Command::Ttl => "TTL",
            Command::Keys => "KEYS",
            Command::Lpush => "LPUSH",
            Command::Rpush => "RPUSH",
            Command::Lpop => "LPOP",
            Command::Rpop => "RPOP",
            Command::Llen => "LLEN",
            Command::Lindex => "LINDEX",
            Command::Lrange => "LRANGE",
            Command::Zadd => "ZADD",
            Command::Zrem => "ZREM",
            Command::Zcard => "ZCARD",
            Command::Zrange => "ZRANGE",
            Command::Zrangebyscore => "ZRANGEBYSCORE",
            Command::Zcount => "ZCOUNT",
            Command::Zrank => "ZRANK",
            Command::Zscore => "ZSCORE",
        }
    }

    /// Read-only commands are never written to the append-only log.
    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            Command::Get
                | Command::Ttl
                | Command::Keys
                | Command::Llen
                | Command::Lindex
                | Command::Lrange
                | Command::Zcard
                | Command::Zrange
                | Command::Zcount
                | Command::Zrank
                | Command::Zscore
        )
    }

    pub fn handler(self) -> Handler {
        match self {
            Command::Set => string::set,
            Command::Get => string::get,
            Command::Del => string::del,
            Command::Mset => string::mset,
            Command::Expire => expire::expire,
            Command::Persist => expire::persist,
            Command::Ttl => expire::ttl,
            Command::Keys => string::keys,
            Command::Lpush => list::lpush,
            Command::Rpush => list::rpush,
            Command::Lpop => list::lpop,
            Command::Rpop => list::rpop,
            Command::Llen => list::llen,
            Command::Lindex => list::lindex,
            Command::Lrange => list::lrange,
            Command::Zadd => zset::zadd,
            Command::Zrem => zset::zrem,
            Command::Zcard => zset::zcard,
            Command::Zrange => zset::zrange,
            Command::Zrangebyscore => zset::zrangebyscore,
            Command::Zcount => zset::zcount,
            Command::Zrank => zset::zrank,
            Command::Zscore => zset::zscore,
        }
    }
}

/// Argument-count check. Error messages use the lower-case command name.
pub(crate) fn arity(ok: bool, name: &'static str) -> Result<()> {
    if ok { Ok(()) } else { Err(KvError::WrongArity(name)) }
}

pub(crate) fn parse_int(s: &str) -> Result<i64> {
    s.parse::<i64>().map_err(|_| KvError::NotInteger)
}

/// Scores accept anything `f64` parses (including `inf`) except NaN.
pub(crate) fn parse_float(s: &str) -> Result<f64> {
    match s.parse::<f64>() {
        Ok(f) if !f.is_nan() => Ok(f),
        _ => Err(KvError::NotFloat),
    }
}

/// Clamp a possibly negative index into `[0, len)`. Out-of-range values stick to the
/// nearest end instead of failing. Meaningless for `len == 0`.
pub(crate) fn clamp_index(index: i64, len: usize) -> usize {
    let len = len as i64;
    let mut index = if index < 0 { len + index } else { index };
    if index >= len {
        index = len - 1;
    }
    index.max(0) as usize
}
