// src/error.rs

//! 命令层错误：所有可恢复的错误都会被渲染成 `(error) ...` 回复文本，
//! 不会让连接或进程崩溃。

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("ERR empty command")]
    EmptyCommand,

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR value is not a valid float")]
    NotFloat,

    #[error("ERR no such key")]
    NotFound,

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR database is closed")]
    Closed,

    /// 日志一行一条命令、空格分隔，这样的参数写不进去
    #[error("ERR empty arguments or arguments containing spaces or newlines cannot be logged")]
    Unloggable,
}

pub type Result<T> = std::result::Result<T, KvError>;
