// src/lib.rs
//! cagedb 库：engine / types / expire / persistence / db / protocol / server

pub mod config;      // JSON 配置
pub mod db;          // 单个数据库 & 多库管理
pub mod engine;      // 分片存储 + 命令分发
pub mod error;       // 命令级错误
pub mod expire;      // 过期策略
pub mod persistence; // AOF 日志、恢复、重写
pub mod protocol;    // 协议编解码
pub mod server;      // 网络层
pub mod types;       // String / List / SortedSet 数据结构
