// src/expire.rs

//! 过期策略：EXPIRE / TTL / PERSIST 三个命令，加上后台定期清理线程 [`Reaper`]。
//!
//! 过期是惰性 + 定期两条路：读路径看到过期条目就当作不存在，
//! `Reaper` 每隔一段时间把所有分片里已过期的条目真正删掉。

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, bounded, select, tick};
use tracing::{debug, warn};

use crate::engine::command::{arity, parse_int};
use crate::engine::{Command, Mode, Reply, Store, Ttl};
use crate::error::{KvError, Result};

/// EXPIRE <key> <seconds>
///
/// 返回 1 表示设置成功，key 不存在返回 0。秒数 <= 0 时 key 立即过期。
pub fn expire(store: &Store, args: &[String]) -> Result<Reply> {
    arity(args.len() == 2, "expire")?;
    let secs = parse_int(&args[1])?;
    let mut g = store.lock(&args[0], Mode::Write);
    match g.set_ttl(&args[0], secs) {
        Ok(()) => {
            g.journal(Command::Expire, args);
            Ok(Reply::Integer(1))
        }
        Err(KvError::NotFound) => Ok(Reply::Integer(0)),
        Err(e) => Err(e),
    }
}

/// TTL <key>
///
/// 剩余秒数（向上取整）；没有过期时间返回 -1，key 不存在返回 -2。
pub fn ttl(store: &Store, args: &[String]) -> Result<Reply> {
    arity(args.len() == 1, "ttl")?;
    // 过期条目会被顺手删掉，所以这里要拿写锁
    let mut g = store.lock(&args[0], Mode::Write);
    match g.ttl(&args[0]) {
        Ok(Ttl::Forever) => Ok(Reply::Integer(-1)),
        Ok(Ttl::Remaining(left)) => Ok(Reply::Integer(ceil_secs(left) as i64)),
        Err(KvError::NotFound) => Ok(Reply::Integer(-2)),
        Err(e) => Err(e),
    }
}

/// PERSIST <key>，真正移除了过期时间才返回 1
pub fn persist(store: &Store, args: &[String]) -> Result<Reply> {
    arity(args.len() == 1, "persist")?;
    let mut g = store.lock(&args[0], Mode::Write);
    match g.persist(&args[0]) {
        Ok(removed) => {
            if removed {
                g.journal(Command::Persist, args);
            }
            Ok(Reply::Integer(removed as i64))
        }
        Err(KvError::NotFound) => Ok(Reply::Integer(0)),
        Err(e) => Err(e),
    }
}

pub(crate) fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

/// 后台定时清理线程
///
/// 每个 `interval` 调一次 [`Store::purge_expired`]；`stop` 发信号后 join。
pub struct Reaper {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Reaper {
    pub fn start(store: Arc<Store>, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ticker = tick(interval);
        let handle = thread::Builder::new()
            .name("ttl-reaper".into())
            .spawn(move || {
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            let purged = store.purge_expired();
                            if purged > 0 {
                                debug!(purged, "expired keys reclaimed");
                            }
                        }
                        // 收到信号或发送端被 drop 都退出
                        recv(stop_rx) -> _ => break,
                    }
                }
            })
            .ok();
        if handle.is_none() {
            warn!("failed to spawn ttl reaper thread, relying on lazy expiry");
        }
        Reaper {
            stop_tx: Some(stop_tx),
            handle,
        }
    }

    /// 通知线程退出并等待它结束。可重复调用。
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(Duration::from_secs(3)), 3);
        assert_eq!(ceil_secs(Duration::from_millis(2001)), 3);
        assert_eq!(ceil_secs(Duration::from_millis(1)), 1);
        assert_eq!(ceil_secs(Duration::ZERO), 0);
    }

    #[test]
    fn test_expire_and_ttl() {
        let store = Store::new(8);
        store.lock("k", Mode::Write).put("k", crate::engine::Value::String("v".into()));

        let r = expire(&store, &s(&["k", "1"])).unwrap();
        assert!(matches!(r, Reply::Integer(1)));
        let r = ttl(&store, &s(&["k"])).unwrap();
        assert!(matches!(r, Reply::Integer(1)));

        sleep(Duration::from_millis(1200));
        assert!(matches!(ttl(&store, &s(&["k"])).unwrap(), Reply::Integer(-2)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_put_clears_ttl() {
        let store = Store::new(8);
        store.lock("k", Mode::Write).put("k", crate::engine::Value::String("v".into()));
        expire(&store, &s(&["k", "100"])).unwrap();
        store.lock("k", Mode::Write).put("k", crate::engine::Value::String("w".into()));
        assert!(matches!(ttl(&store, &s(&["k"])).unwrap(), Reply::Integer(-1)));
        assert!(matches!(persist(&store, &s(&["k"])).unwrap(), Reply::Integer(0)));
    }

    #[test]
    fn test_reaper_purges_in_background() {
        let store = Arc::new(Store::new(8));
        for k in ["a", "b", "c"] {
            let mut g = store.lock(k, Mode::Write);
            g.put(k, crate::engine::Value::String("v".into()));
            g.set_ttl(k, 0).unwrap();
        }
        store.lock("d", Mode::Write).put("d", crate::engine::Value::String("v".into()));

        let mut reaper = Reaper::start(store.clone(), Duration::from_millis(20));
        sleep(Duration::from_millis(200));
        reaper.stop();
        reaper.stop();

        // 已经被后台线程清理过了
        assert_eq!(store.purge_expired(), 0);
        assert_eq!(store.keys("*"), vec!["d".to_string()]);
    }
}
