// src/server.rs
//! 网络层：
//! - 监听 TCP 连接，每个连接一个 tokio 任务
//! - 用 `protocol::read_frame` 读出一个命令数组
//! - SELECT / PING / QUIT 在连接层处理，其余交给当前选中的 `Db`
//! - 回复同样编码成二进制字符串数组
use anyhow::Result;
use std::future::Future;
use std::sync::Arc;

use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    task::JoinSet,
};
use tracing::{debug, info, warn};

use crate::db::DbManager;
use crate::protocol::{self, ProtocolError};

/// 绑定 `bind` 并一直服务，直到 `shutdown` 完成。
///
/// 返回时所有连接任务都已结束，调用方可以放心关闭数据库。
pub async fn run<F>(bind: &str, mgr: Arc<DbManager>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let listener = TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "cagedb listening");
    serve_until(listener, mgr, shutdown).await
}

/// 不会主动停止的接受循环
pub async fn serve(listener: TcpListener, mgr: Arc<DbManager>) -> Result<()> {
    serve_until(listener, mgr, std::future::pending::<()>()).await
}

/// 接受循环：每个连接 spawn 进 `JoinSet`。
/// `shutdown` 完成后停止 accept，中断所有连接并等它们退出。
pub async fn serve_until<F>(listener: TcpListener, mgr: Arc<DbManager>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let mut conns = JoinSet::new();
    tokio::pin!(shutdown);
    let res = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested");
                break Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(a) => a,
                    Err(e) => break Err(e.into()),
                };
                debug!(%peer, "accepted connection");
                let mgr = mgr.clone();
                conns.spawn(async move {
                    if let Err(err) = handle_connection(stream, mgr).await {
                        warn!(%peer, error = %err, "connection error");
                    }
                });
            }
            // 回收已经结束的连接
            Some(_) = conns.join_next(), if !conns.is_empty() => {}
        }
    };
    // 正在 spawn_blocking 里执行的命令会跑完；回复发不出去，但写入已经排进日志
    let open = conns.len();
    conns.shutdown().await;
    if open > 0 {
        info!(connections = open, "connections closed");
    }
    res
}

/// 连接层命令的结果
enum Local {
    Reply(Vec<String>),
    Quit,
}

/// SELECT / PING / QUIT；其它命令返回 `None`
fn connection_command(args: &[Vec<u8>], selected: &mut usize, dbs: usize) -> Option<Local> {
    let name = String::from_utf8_lossy(args.first()?).to_ascii_uppercase();
    let reply = match name.as_str() {
        "PING" => vec!["PONG".to_string()],
        "QUIT" => return Some(Local::Quit),
        "SELECT" => {
            if args.len() != 2 {
                vec!["(error) ERR wrong number of arguments for 'select' command".to_string()]
            } else {
                match String::from_utf8_lossy(&args[1]).parse::<usize>() {
                    Ok(idx) if idx < dbs => {
                        *selected = idx;
                        vec![idx.to_string()]
                    }
                    _ => vec!["(error) ERR DB index is out of range".to_string()],
                }
            }
        }
        _ => return None,
    };
    Some(Local::Reply(reply))
}

async fn handle_connection(stream: TcpStream, mgr: Arc<DbManager>) -> Result<()> {
    let peer = stream.peer_addr()?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut selected = 0usize;

    loop {
        let args = match protocol::read_frame(&mut reader).await {
            Ok(Some(args)) => args,
            Ok(None) => {
                debug!(%peer, "disconnected");
                break;
            }
            Err(ProtocolError::Io(e)) => return Err(e.into()),
            Err(e) => {
                // 帧已经错位，回一条错误后断开
                let reply = vec![format!("(error) ERR protocol error: {e}")];
                writer.write_all(&protocol::encode(&reply)).await?;
                break;
            }
        };

        let lines = match connection_command(&args, &mut selected, mgr.len()) {
            Some(Local::Reply(lines)) => lines,
            Some(Local::Quit) => {
                writer.write_all(&protocol::encode(&["OK"])).await?;
                break;
            }
            None => {
                // 可能阻塞在分片锁或日志队列上，放到阻塞线程池里执行
                let mgr = mgr.clone();
                tokio::task::spawn_blocking(move || match mgr.get(selected) {
                    Some(db) => db.exec(args),
                    None => vec!["(error) ERR DB index is out of range".to_string()],
                })
                .await?
            }
        };
        writer.write_all(&protocol::encode(&lines)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a(line: &str) -> Vec<Vec<u8>> {
        line.split_whitespace().map(|t| t.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_connection_commands() {
        let mut sel = 0;
        assert!(matches!(
            connection_command(&a("ping"), &mut sel, 16),
            Some(Local::Reply(r)) if r == vec!["PONG"]
        ));
        assert!(matches!(
            connection_command(&a("SELECT 3"), &mut sel, 16),
            Some(Local::Reply(r)) if r == vec!["3"]
        ));
        assert_eq!(sel, 3);
        assert!(matches!(
            connection_command(&a("SELECT 16"), &mut sel, 16),
            Some(Local::Reply(r)) if r[0].starts_with("(error)")
        ));
        assert_eq!(sel, 3);
        assert!(matches!(connection_command(&a("quit"), &mut sel, 16), Some(Local::Quit)));
        assert!(connection_command(&a("GET k"), &mut sel, 16).is_none());
        assert!(connection_command(&[], &mut sel, 16).is_none());
    }
}
