// src/persistence.rs

//! # AOF 持久化
//!
//! 每个数据库一个追加日志文件，一行一条写命令（空格拼接 + `\n`）。
//!
//! - **写路径**：写命令在持有分片锁时通过 [`Journal`] 把自己丢进有界队列，
//!   由唯一的写线程序列化后通过 `BufWriter` 追加。只读命令在写线程里被过滤掉。
//!   空参数或带空格、换行的参数无法写成一行，`Db::exec` 会在执行前拒绝它们。
//! - **恢复**：开库时逐行重放日志；最后一行如果没有 `\n`，视为写了一半，
//!   停止重放并把文件截断到最后一条完整记录。
//! - **重写（compaction）**：追加满 `rewrite_threshold` 条后，在独立线程里把日志
//!   压缩成「快照 + 尾巴」，然后原子替换旧文件。同一时刻最多一个重写。
//!
//! 任何 I/O 错误只打 `warn!`，不影响命令执行。

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, bounded, select};
use parking_lot::{Mutex, RwLock};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::{Engine, Journal, Value, reply::format_float};
use crate::expire::ceil_secs;

/// 日志行的编解码
pub struct LogCodec;

impl LogCodec {
    /// 从不写入日志的命令
    pub const READ_ONLY: [&'static str; 11] = [
        "GET", "TTL", "KEYS", "LLEN", "LINDEX", "LRANGE", "ZCARD", "ZRANGE", "ZCOUNT", "ZRANK",
        "ZSCORE",
    ];

    /// 只读命令（或空命令）返回 `None`，否则返回带换行的一行。
    pub fn serialize<S: AsRef<str>>(cmd: &[S]) -> Option<String> {
        let name = cmd.first()?.as_ref();
        if Self::READ_ONLY
            .iter()
            .any(|ro| ro.eq_ignore_ascii_case(name))
        {
            return None;
        }
        let mut line = cmd
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<&str>>()
            .join(" ");
        line.push('\n');
        Some(line)
    }

    /// 每个参数都能原样写进一行并读回来：非空，且不含空格、`\r`、`\n`
    pub fn encodable<S: AsRef<str>>(cmd: &[S]) -> bool {
        cmd.iter().all(|t| {
            let t = t.as_ref();
            !t.is_empty() && !t.contains([' ', '\r', '\n'])
        })
    }

    pub fn deserialize(line: &str) -> Vec<String> {
        line.split([' ', '\n', '\r'])
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// 逐行重放 `reader` 里的记录，最多读 `limit` 字节。
///
/// 返回 `(记录数, 最后一条完整记录之后的偏移)`；两者之后如果还有字节，就是残缺的尾巴。
fn replay<R: Read>(reader: R, limit: u64, engine: &Engine) -> io::Result<(u64, u64)> {
    let mut reader = BufReader::new(reader.take(limit));
    let mut buf = Vec::new();
    let (mut records, mut good) = (0u64, 0u64);
    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 || buf.last() != Some(&b'\n') {
            break;
        }
        good += n as u64;
        let tokens = LogCodec::deserialize(&String::from_utf8_lossy(&buf));
        if tokens.is_empty() {
            continue;
        }
        let reply = engine.handle(&tokens);
        if reply.is_error() {
            debug!(record = records, ?reply, "log record failed on replay");
        }
        records += 1;
    }
    Ok((records, good))
}

/// 启动恢复：重放整个日志，截掉残缺的最后一行。
fn recover(path: &Path, engine: &Engine) -> Result<u64> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("Failed to open log {path:?}"))?;
    let len = file.metadata()?.len();
    let (records, good) = replay(&file, len, engine)?;
    if good < len {
        warn!(
            path = %path.display(),
            dropped = len - good,
            "truncating torn tail of append-only log"
        );
        file.set_len(good)?;
    }
    Ok(records)
}

/// 把 `engine` 的当前状态写成等价的命令序列。
fn write_snapshot<W: Write>(engine: &Engine, out: &mut W) -> io::Result<u64> {
    let mut lines = Vec::new();
    engine.store().for_each(|key, value, expire_at| {
        let cmd: Vec<String> = match value {
            Value::String(s) => vec!["SET".into(), key.into(), s.clone()],
            Value::List(l) => ["RPUSH".to_string(), key.to_string()]
                .into_iter()
                .chain(l.iter().cloned())
                .collect(),
            Value::SortedSet(z) => {
                let mut cmd = vec!["ZADD".to_string(), key.to_string()];
                for e in z.entries() {
                    cmd.push(format_float(e.score));
                    cmd.push(e.member);
                }
                cmd
            }
        };
        lines.extend(LogCodec::serialize(&cmd));
        if let Some(at) = expire_at {
            let left = at.saturating_duration_since(std::time::Instant::now());
            let secs = ceil_secs(left).to_string();
            lines.extend(LogCodec::serialize(&["EXPIRE", key, secs.as_str()]));
        }
    });
    for line in &lines {
        out.write_all(line.as_bytes())?;
    }
    Ok(lines.len() as u64)
}

struct Inner {
    path: PathBuf,
    dir: PathBuf,
    shards: usize,
    rewrite_threshold: u64,
    /// `None` 表示日志已关闭
    file: Mutex<Option<BufWriter<File>>>,
    /// 自上次重写以来追加的记录数
    appended: AtomicU64,
    rewriting: AtomicBool,
    rewrite_handle: Mutex<Option<JoinHandle<()>>>,
    /// 让下一次重写在替换文件之前失败
    #[cfg(test)]
    fail_before_persist: AtomicBool,
}

impl Inner {
    fn write(self: &Arc<Self>, cmd: &[String]) {
        let Some(line) = LogCodec::serialize(cmd) else {
            return;
        };
        {
            let mut file = self.file.lock();
            let Some(w) = file.as_mut() else {
                return;
            };
            if let Err(e) = w.write_all(line.as_bytes()) {
                warn!(path = %self.path.display(), error = %e, "append to log failed");
                return;
            }
        }
        let n = self.appended.fetch_add(1, Ordering::SeqCst) + 1;
        if self.rewrite_threshold > 0 && n >= self.rewrite_threshold {
            self.start_rewrite();
        }
    }

    fn flush(&self) {
        if let Some(w) = self.file.lock().as_mut() {
            if let Err(e) = w.flush().and_then(|_| w.get_ref().sync_data()) {
                warn!(path = %self.path.display(), error = %e, "flush of log failed");
            }
        }
    }

    /// 后台启动一次重写；已经有一个在跑就什么都不做。
    fn start_rewrite(self: &Arc<Self>) -> bool {
        if self.rewriting.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.appended.store(0, Ordering::SeqCst);
        // 上一次的线程已经结束，回收掉
        let mut slot = self.rewrite_handle.lock();
        if let Some(old) = slot.take() {
            let _ = old.join();
        }
        let inner = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("aof-rewrite".into())
            .spawn(move || {
                match inner.rewrite() {
                    Ok(records) => info!(path = %inner.path.display(), records, "log rewritten"),
                    Err(e) => warn!(path = %inner.path.display(), error = %e, "log rewrite aborted"),
                }
                inner.rewriting.store(false, Ordering::SeqCst);
            });
        match spawned {
            Ok(h) => {
                *slot = Some(h);
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to spawn rewrite thread");
                self.rewriting.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// 重写日志，返回新日志里快照部分的记录数。失败时原日志保持不变。
    fn rewrite(&self) -> Result<u64> {
        // 1. 刷盘，记下当前大小
        let size = {
            let mut file = self.file.lock();
            let w = file.as_mut().context("log is closed")?;
            w.flush()?;
            w.get_ref().metadata()?.len()
        };

        // 2. 不持锁：把 [0, size) 重放到一个独立的引擎里
        let scratch = Engine::new(self.shards);
        let log = File::open(&self.path)?;
        replay(&log, size, &scratch)?;

        // 3. 快照写到同目录下的临时文件
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        let records = {
            let mut out = BufWriter::new(tmp.as_file_mut());
            let n = write_snapshot(&scratch, &mut out)?;
            out.flush()?;
            n
        };

        // 4. 重新持锁，把这期间追加的尾巴拷过去
        let mut file = self.file.lock();
        let w = file.as_mut().context("log closed during rewrite")?;
        w.flush()?;
        let mut tail = File::open(&self.path)?;
        tail.seek(SeekFrom::Start(size))?;
        io::copy(&mut tail, tmp.as_file_mut())?;
        tmp.as_file().sync_all()?;

        if self.injected_failure() {
            anyhow::bail!("rename refused");
        }

        // 5. 原子替换，并把写端切到新文件
        tmp.persist(&self.path)?;
        let reopened = OpenOptions::new().append(true).open(&self.path)?;
        *w = BufWriter::new(reopened);
        Ok(records)
    }

    #[cfg(test)]
    fn injected_failure(&self) -> bool {
        self.fail_before_persist.swap(false, Ordering::SeqCst)
    }

    #[cfg(not(test))]
    fn injected_failure(&self) -> bool {
        false
    }

    fn wait_rewrite(&self) {
        let handle = self.rewrite_handle.lock().take();
        if let Some(h) = handle {
            let _ = h.join();
        }
    }
}

/// 一个数据库的追加日志
pub struct Aof {
    inner: Arc<Inner>,
    /// 关闭后置为 `None`；`append` 持读锁发送，`close` 拿写锁就能等到所有在途的发送完成
    tx: RwLock<Option<Sender<Vec<String>>>>,
    stop_tx: Mutex<Option<Sender<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Aof {
    /// 日志文件路径：`<data_dir>/db_<name>`
    pub fn path_for(data_dir: &Path, name: &str) -> PathBuf {
        data_dir.join(format!("db_{name}"))
    }

    /// 打开（必要时创建）日志，把已有记录重放进 `engine`，然后启动写线程。
    pub fn open(path: PathBuf, cfg: &Config, engine: &Engine) -> Result<Aof> {
        let dir = match path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {dir:?}"))?;

        let records = recover(&path, engine)?;
        info!(path = %path.display(), records, "log replayed");

        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log {path:?} for append"))?;

        let inner = Arc::new(Inner {
            path,
            dir,
            shards: engine.store().shard_count(),
            rewrite_threshold: cfg.rewrite_threshold,
            file: Mutex::new(Some(BufWriter::new(file))),
            appended: AtomicU64::new(0),
            rewriting: AtomicBool::new(false),
            rewrite_handle: Mutex::new(None),
            #[cfg(test)]
            fail_before_persist: AtomicBool::new(false),
        });

        let (tx, rx) = bounded(cfg.log_queue_capacity.max(1));
        let (stop_tx, stop_rx) = bounded(1);
        let worker = Arc::clone(&inner);
        let writer = thread::Builder::new()
            .name("aof-writer".into())
            .spawn(move || run_writer(worker, rx, stop_rx))
            .context("Failed to spawn log writer")?;

        Ok(Aof {
            inner,
            tx: RwLock::new(Some(tx)),
            stop_tx: Mutex::new(Some(stop_tx)),
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// 排队一条命令。队列满时阻塞；日志已关闭则丢弃。
    pub fn append(&self, cmd: Vec<String>) {
        let tx = self.tx.read();
        match tx.as_ref() {
            Some(tx) => {
                if tx.send(cmd).is_err() {
                    warn!(path = %self.inner.path.display(), "log writer is gone, record dropped");
                }
            }
            None => warn!(path = %self.inner.path.display(), "log is closed, record dropped"),
        }
    }

    /// 立刻在后台开始一次重写。已有重写在进行时返回 `false`。
    pub fn rewrite(&self) -> bool {
        self.inner.start_rewrite()
    }

    /// 等待进行中的重写结束
    pub fn wait_rewrite(&self) {
        self.inner.wait_rewrite();
    }

    /// 排空队列、刷盘、等待重写结束。可重复调用。
    pub fn close(&self) {
        // 先断开发送端，保证之后不会再有新记录进队
        let had_tx = self.tx.write().take().is_some();
        if let Some(stop) = self.stop_tx.lock().take() {
            let _ = stop.send(());
        }
        if let Some(h) = self.writer.lock().take() {
            if h.join().is_err() {
                warn!(path = %self.inner.path.display(), "log writer panicked");
            }
        }
        self.inner.wait_rewrite();
        self.inner.flush();
        *self.inner.file.lock() = None;
        if had_tx {
            info!(path = %self.inner.path.display(), "log closed");
        }
    }
}

impl Journal for Aof {
    fn record(&self, cmd: Vec<String>) {
        self.append(cmd);
    }
}

impl Drop for Aof {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_writer(inner: Arc<Inner>, rx: Receiver<Vec<String>>, stop_rx: Receiver<()>) {
    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(cmd) => inner.write(&cmd),
                Err(_) => break,
            },
            recv(stop_rx) -> _ => {
                for cmd in rx.try_iter() {
                    inner.write(&cmd);
                }
                break;
            }
        }
    }
    inner.flush();
}
