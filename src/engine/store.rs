// src/engine/store.rs

//! # Sharded key space
//!
//! A fixed number of shards, each a `parking_lot::RwLock` around its own map.
//! Nothing in here locks on a caller's behalf: every read or write goes through a
//! [`Locked`] guard obtained from [`Store::lock`] or [`Store::locks`], and the shard
//! locks are released when that guard is dropped.
//!
//! Deadlock freedom rests on one rule: shards are always acquired in ascending index
//! order, deduplicated. `locks` is the only place that acquires more than one shard.
//!
//! Write handlers hand their command to the attached [`Journal`] before the guard is
//! dropped, so two writes that share a shard reach the journal in the order they
//! changed the store.

use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::command::Command;
use crate::error::{KvError, Result};
use crate::types::avl::SortedSet;

/// Sink for successful writes, called while the writer still holds its shard locks.
pub trait Journal: Send + Sync {
    fn record(&self, cmd: Vec<String>);
}

pub type List = VecDeque<String>;

/// A stored value. The kind is fixed for the lifetime of the key.
#[derive(Debug, Clone)]
pub enum Value {
    String(String),
    List(List),
    SortedSet(SortedSet),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    /// `None` means the key never expires.
    expire_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expire_at.is_some_and(|at| now >= at)
    }
}

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    Forever,
    Remaining(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
}

#[derive(Debug, Default)]
struct Shard {
    kvs: HashMap<String, Entry>,
}

impl Shard {
    fn live(&self, key: &str) -> Option<&Entry> {
        self.kvs.get(key).filter(|e| !e.is_expired(Instant::now()))
    }

    /// Like `live`, but an expired entry is dropped on the way.
    fn live_mut(&mut self, key: &str) -> Option<&mut Entry> {
        if self.kvs.get(key)?.is_expired(Instant::now()) {
            self.kvs.remove(key);
            return None;
        }
        self.kvs.get_mut(key)
    }
}

enum ShardGuard<'a> {
    Read(RwLockReadGuard<'a, Shard>),
    Write(RwLockWriteGuard<'a, Shard>),
}

impl ShardGuard<'_> {
    fn shard(&self) -> &Shard {
        match self {
            ShardGuard::Read(g) => &**g,
            ShardGuard::Write(g) => &**g,
        }
    }

    fn shard_mut(&mut self) -> &mut Shard {
        match self {
            ShardGuard::Write(g) => &mut **g,
            ShardGuard::Read(_) => panic!("write access through a shard read lock"),
        }
    }
}

pub struct Store {
    shards: Vec<RwLock<Shard>>,
    journal: OnceLock<Arc<dyn Journal>>,
}

impl Store {
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Store {
            shards: (0..shard_count).map(|_| RwLock::new(Shard::default())).collect(),
            journal: OnceLock::new(),
        }
    }

    /// Attach the journal. Only the first call takes effect; writes made before it are
    /// not recorded (log replay runs in that window).
    pub fn attach_journal(&self, journal: Arc<dyn Journal>) -> bool {
        self.journal.set(journal).is_ok()
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Deterministic key → shard mapping: `code = code * 31 + byte`, seeded with 1.
    pub fn shard_index(&self, key: &str) -> usize {
        let code = key
            .bytes()
            .fold(1u32, |code, b| code.wrapping_mul(31).wrapping_add(b as u32));
        code as usize % self.shards.len()
    }

    /// Lock the shard holding `key`.
    pub fn lock(&self, key: &str, mode: Mode) -> Locked<'_> {
        self.locks(&[key], mode)
    }

    /// Lock every shard touched by `keys`, each once, in ascending shard order.
    pub fn locks<K: AsRef<str>>(&self, keys: &[K], mode: Mode) -> Locked<'_> {
        let mut idxs: Vec<usize> = keys.iter().map(|k| self.shard_index(k.as_ref())).collect();
        idxs.sort_unstable();
        idxs.dedup();

        let guards = idxs
            .into_iter()
            .map(|idx| {
                let guard = match mode {
                    Mode::Read => ShardGuard::Read(self.shards[idx].read()),
                    Mode::Write => ShardGuard::Write(self.shards[idx].write()),
                };
                (idx, guard)
            })
            .collect();

        Locked { store: self, guards }
    }

    /// Drop expired entries, one shard at a time. Returns how many were reclaimed.
    pub fn purge_expired(&self) -> usize {
        let mut purged = 0;
        for shard in &self.shards {
            let mut shard = shard.write();
            let now = Instant::now();
            let before = shard.kvs.len();
            shard.kvs.retain(|_, e| !e.is_expired(now));
            purged += before - shard.kvs.len();
        }
        purged
    }

    /// Visit every live entry under per-shard read locks.
    /// The visitor must not call back into the store.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&str, &Value, Option<Instant>),
    {
        for shard in &self.shards {
            let shard = shard.read();
            let now = Instant::now();
            for (k, e) in shard.kvs.iter() {
                if e.is_expired(now) {
                    continue;
                }
                visit(k, &e.value, e.expire_at);
            }
        }
    }

    /// Live keys matching a glob pattern.
    pub fn keys(&self, pattern: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.for_each(|k, _, _| {
            if glob_match(pattern.as_bytes(), k.as_bytes()) {
                out.push(k.to_string());
            }
        });
        out.sort();
        out
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let mut n = 0;
        self.for_each(|_, _, _| n += 1);
        n
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shard locks held for a set of keys. Released on drop, in acquisition order.
pub struct Locked<'a> {
    store: &'a Store,
    guards: Vec<(usize, ShardGuard<'a>)>,
}

impl Locked<'_> {
    fn shard(&self, key: &str) -> &Shard {
        let idx = self.store.shard_index(key);
        match self.guards.iter().find(|(i, _)| *i == idx) {
            Some((_, g)) => g.shard(),
            None => panic!("shard {idx} for key {key:?} is not locked"),
        }
    }

    fn shard_mut(&mut self, key: &str) -> &mut Shard {
        let idx = self.store.shard_index(key);
        match self.guards.iter_mut().find(|(i, _)| *i == idx) {
            Some((_, g)) => g.shard_mut(),
            None => panic!("shard {idx} for key {key:?} is not locked"),
        }
    }

    /// Release the locks. Equivalent to dropping the guard.
    pub fn unlock(self) {}

    /// Record a successful write. Must be called before the guard is dropped.
    pub fn journal(&self, cmd: Command, args: &[String]) {
        if let Some(j) = self.store.journal.get() {
            let mut line = Vec::with_capacity(args.len() + 1);
            line.push(cmd.name().to_string());
            line.extend(args.iter().cloned());
            j.record(line);
        }
    }

    pub fn get(&self, key: &str) -> Result<&Value> {
        self.shard(key)
            .live(key)
            .map(|e| &e.value)
            .ok_or(KvError::NotFound)
    }

    /// Insert or replace `key`. Any TTL is cleared.
    pub fn put(&mut self, key: &str, value: Value) {
        self.shard_mut(key).kvs.insert(
            key.to_string(),
            Entry {
                value,
                expire_at: None,
            },
        );
    }

    pub fn del(&mut self, key: &str) -> Result<Value> {
        let now = Instant::now();
        match self.shard_mut(key).kvs.remove(key) {
            Some(e) if !e.is_expired(now) => Ok(e.value),
            _ => Err(KvError::NotFound),
        }
    }

    pub fn string(&self, key: &str) -> Result<&str> {
        match self.get(key)? {
            Value::String(s) => Ok(s),
            _ => Err(KvError::WrongType),
        }
    }

    /// Read a list. With `create`, an absent key reads as an empty list (not stored).
    pub fn list(&self, key: &str, create: bool) -> Result<Cow<'_, List>> {
        match self.get(key) {
            Ok(Value::List(l)) => Ok(Cow::Borrowed(l)),
            Ok(_) => Err(KvError::WrongType),
            Err(KvError::NotFound) if create => Ok(Cow::Owned(List::new())),
            Err(e) => Err(e),
        }
    }

    /// Mutable list access. With `create`, an absent key gets an empty list stored.
    pub fn list_mut(&mut self, key: &str, create: bool) -> Result<&mut List> {
        match self.entry_mut(key, create, || Value::List(List::new()))? {
            Value::List(l) => Ok(l),
            _ => Err(KvError::WrongType),
        }
    }

    pub fn zset(&self, key: &str, create: bool) -> Result<Cow<'_, SortedSet>> {
        match self.get(key) {
            Ok(Value::SortedSet(z)) => Ok(Cow::Borrowed(z)),
            Ok(_) => Err(KvError::WrongType),
            Err(KvError::NotFound) if create => Ok(Cow::Owned(SortedSet::new())),
            Err(e) => Err(e),
        }
    }

    pub fn zset_mut(&mut self, key: &str, create: bool) -> Result<&mut SortedSet> {
        match self.entry_mut(key, create, || Value::SortedSet(SortedSet::new()))? {
            Value::SortedSet(z) => Ok(z),
            _ => Err(KvError::WrongType),
        }
    }

    fn entry_mut(
        &mut self,
        key: &str,
        create: bool,
        empty: impl FnOnce() -> Value,
    ) -> Result<&mut Value> {
        let shard = self.shard_mut(key);
        if shard.live_mut(key).is_none() {
            if !create {
                return Err(KvError::NotFound);
            }
            shard.kvs.insert(
                key.to_string(),
                Entry {
                    value: empty(),
                    expire_at: None,
                },
            );
        }
        shard
            .kvs
            .get_mut(key)
            .map(|e| &mut e.value)
            .ok_or(KvError::NotFound)
    }

    /// Drop `key` if it holds an empty list or sorted set.
    pub fn remove_if_empty(&mut self, key: &str) {
        let shard = self.shard_mut(key);
        let empty = match shard.kvs.get(key).map(|e| &e.value) {
            Some(Value::List(l)) => l.is_empty(),
            Some(Value::SortedSet(z)) => z.is_empty(),
            _ => false,
        };
        if empty {
            shard.kvs.remove(key);
        }
    }

    /// Expire `key` after `secs` seconds (now, if not positive).
    pub fn set_ttl(&mut self, key: &str, secs: i64) -> Result<()> {
        let entry = self.shard_mut(key).live_mut(key).ok_or(KvError::NotFound)?;
        let secs = u64::try_from(secs).unwrap_or(0);
        entry.expire_at = Some(Instant::now() + Duration::from_secs(secs));
        Ok(())
    }

    /// Remaining lifetime. An expired entry is removed, so this needs a write lock.
    pub fn ttl(&mut self, key: &str) -> Result<Ttl> {
        let entry = self.shard_mut(key).live_mut(key).ok_or(KvError::NotFound)?;
        Ok(match entry.expire_at {
            None => Ttl::Forever,
            Some(at) => Ttl::Remaining(at.saturating_duration_since(Instant::now())),
        })
    }

    /// Make `key` persistent. Returns whether a TTL was removed.
    pub fn persist(&mut self, key: &str) -> Result<bool> {
        let entry = self.shard_mut(key).live_mut(key).ok_or(KvError::NotFound)?;
        Ok(entry.expire_at.take().is_some())
    }
}

/// Glob matching with `*`, `?`, `[...]` classes (`^` negation, `a-z` ranges) and `\`
/// escapes.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    // Backtrack point: pattern index after the last `*`, and the text index it matched up to.
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                b'*' => {
                    star = Some((p + 1, t));
                    p += 1;
                    continue;
                }
                b'?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                b'[' => {
                    if let Some((matched, next)) = match_class(pattern, p, text[t]) {
                        if matched {
                            p = next;
                            t += 1;
                            continue;
                        }
                    } else if text[t] == b'[' {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
                b'\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                c => {
                    if c == text[t] {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
            }
        }
        match star {
            Some((sp, st)) => {
                p = sp;
                t = st + 1;
                star = Some((sp, st + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

/// Match one byte against the class starting at `pattern[start] == b'['`.
/// Returns the result and the index after `]`, or `None` for an unterminated class.
fn match_class(pattern: &[u8], start: usize, c: u8) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }
    let mut matched = false;
    let mut first = true;
    while i < pattern.len() {
        let mut lo = pattern[i];
        if lo == b']' && !first {
            return Some((matched != negate, i + 1));
        }
        first = false;
        if lo == b'\\' && i + 1 < pattern.len() {
            i += 1;
            lo = pattern[i];
        }
        if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let hi = pattern[i + 2];
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            if (lo..=hi).contains(&c) {
                matched = true;
            }
            i += 3;
        } else {
            if lo == c {
                matched = true;
            }
            i += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn test_shard_index_is_stable() {
        let store = Store::new(256);
        // 1*31 + 'a' (97) = 128
        assert_eq!(store.shard_index("a"), 128);
        // ((1*31 + 97)*31 + 98) % 256 = 4066 % 256
        assert_eq!(store.shard_index("ab"), 4066 % 256);
        assert_eq!(store.shard_index(""), 1);
        for key in ["x", "user:1", "long key with spaces"] {
            assert_eq!(store.shard_index(key), store.shard_index(key));
            assert!(store.shard_index(key) < 256);
        }
    }

    #[test]
    fn test_put_get_del() {
        let store = Store::new(16);
        let mut g = store.lock("k", Mode::Write);
        g.put("k", Value::String("v".into()));
        assert_eq!(g.string("k").unwrap(), "v");
        g.put("k", Value::String("v2".into()));
        assert_eq!(g.string("k").unwrap(), "v2");
        assert!(matches!(g.del("k"), Ok(Value::String(s)) if s == "v2"));
        assert!(matches!(g.get("k"), Err(KvError::NotFound)));
        assert!(matches!(g.del("k"), Err(KvError::NotFound)));
    }

    #[test]
    fn test_typed_accessors() {
        let store = Store::new(16);
        let mut g = store.lock("s", Mode::Write);
        g.put("s", Value::String("x".into()));
        assert!(matches!(g.list("s", true), Err(KvError::WrongType)));
        assert!(matches!(g.zset_mut("s", true), Err(KvError::WrongType)));
        drop(g);

        let g = store.lock("missing", Mode::Read);
        assert!(g.list("missing", true).unwrap().is_empty());
        assert!(matches!(g.list("missing", false), Err(KvError::NotFound)));
        assert!(g.zset("missing", true).unwrap().is_empty());
        drop(g);
        assert!(store.is_empty(), "read-side create must not store anything");

        let mut g = store.lock("l", Mode::Write);
        g.list_mut("l", true).unwrap().push_back("a".into());
        assert_eq!(g.list("l", false).unwrap().len(), 1);
        g.list_mut("l", false).unwrap().pop_front();
        g.remove_if_empty("l");
        assert!(matches!(g.get("l"), Err(KvError::NotFound)));
    }

    #[test]
    fn test_ttl_and_persist() {
        let store = Store::new(16);
        let mut g = store.lock("k", Mode::Write);
        g.put("k", Value::String("v".into()));
        assert_eq!(g.ttl("k").unwrap(), Ttl::Forever);

        g.set_ttl("k", 100).unwrap();
        match g.ttl("k").unwrap() {
            Ttl::Remaining(d) => assert!(d <= Duration::from_secs(100) && d > Duration::from_secs(98)),
            Ttl::Forever => panic!("expected a ttl"),
        }
        assert!(g.persist("k").unwrap());
        assert!(!g.persist("k").unwrap());
        assert_eq!(g.ttl("k").unwrap(), Ttl::Forever);

        // put clears an existing TTL
        g.set_ttl("k", 100).unwrap();
        g.put("k", Value::String("v".into()));
        assert_eq!(g.ttl("k").unwrap(), Ttl::Forever);

        assert!(matches!(g.set_ttl("nope", 10), Err(KvError::NotFound)));
        assert!(matches!(g.ttl("nope"), Err(KvError::NotFound)));
    }

    #[test]
    fn test_expired_entries() {
        let store = Store::new(4);
        {
            let mut g = store.lock("gone", Mode::Write);
            g.put("gone", Value::String("v".into()));
            g.set_ttl("gone", 0).unwrap();
        }
        {
            let g = store.lock("gone", Mode::Read);
            assert!(matches!(g.get("gone"), Err(KvError::NotFound)));
        }
        // read path leaves it in place; the sweep reclaims it
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.purge_expired(), 0);

        let mut g = store.lock("gone", Mode::Write);
        g.put("gone", Value::String("v".into()));
        g.set_ttl("gone", -5).unwrap();
        assert!(matches!(g.ttl("gone"), Err(KvError::NotFound)));
    }

    #[test]
    fn test_multi_lock_dedups_and_sorts() {
        let store = Store::new(8);
        let keys = ["a", "b", "c", "a", "i"];
        let mut g = store.locks(&keys, Mode::Write);
        let idxs: Vec<usize> = g.guards.iter().map(|(i, _)| *i).collect();
        let mut expected: Vec<usize> = keys.iter().map(|k| store.shard_index(k)).collect();
        expected.sort_unstable();
        expected.dedup();
        assert_eq!(idxs, expected);
        for k in keys {
            g.put(k, Value::String(k.to_string()));
        }
        g.unlock();
        assert_eq!(store.len(), 4);
    }

    #[test]
    #[should_panic(expected = "is not locked")]
    fn test_access_outside_locked_shards_panics() {
        let store = Store::new(256);
        let g = store.lock("a", Mode::Read);
        let _ = g.get("b");
    }

    #[test]
    #[should_panic(expected = "write access through a shard read lock")]
    fn test_write_through_read_lock_panics() {
        let store = Store::new(4);
        let mut g = store.lock("a", Mode::Read);
        g.put("a", Value::String("x".into()));
    }

    #[test]
    fn test_concurrent_locks_do_not_deadlock() {
        let store = Arc::new(Store::new(16));
        let (done_tx, done_rx) = mpsc::channel();
        let threads = 8;

        for _ in 0..threads {
            let store = store.clone();
            let done_tx = done_tx.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..2000 {
                    let n = rng.gen_range(1..6);
                    let keys: Vec<String> =
                        (0..n).map(|_| format!("k{}", rng.gen_range(0..64))).collect();
                    let mode = if rng.gen_bool(0.5) { Mode::Write } else { Mode::Read };
                    let mut g = store.locks(&keys, mode);
                    if mode == Mode::Write {
                        for k in &keys {
                            g.put(k, Value::String("x".into()));
                        }
                    } else {
                        for k in &keys {
                            let _ = g.get(k);
                        }
                    }
                }
                let _ = done_tx.send(());
            });
        }

        for _ in 0..threads {
            done_rx
                .recv_timeout(Duration::from_secs(30))
                .expect("lock acquisition deadlocked");
        }
    }

    struct VecJournal(parking_lot::Mutex<Vec<Vec<String>>>);

    impl Journal for VecJournal {
        fn record(&self, cmd: Vec<String>) {
            self.0.lock().push(cmd);
        }
    }

    #[test]
    fn test_journal_follows_lock_order() {
        let store = Arc::new(Store::new(8));
        let journal = Arc::new(VecJournal(parking_lot::Mutex::new(Vec::new())));
        assert!(store.attach_journal(journal.clone()));
        assert!(!store.attach_journal(journal.clone()));

        let handles: Vec<_> = (0..6)
            .map(|t| {
                let store = store.clone();
                thread::spawn(move || {
                    for i in 0..500 {
                        let args = vec!["k".to_string(), format!("{t}-{i}")];
                        let mut g = store.lock("k", Mode::Write);
                        g.put("k", Value::String(args[1].clone()));
                        g.journal(Command::Set, &args);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let records = journal.0.lock();
        assert_eq!(records.len(), 6 * 500);
        let last = records.last().unwrap();
        assert_eq!(last[0], "SET");
        let g = store.lock("k", Mode::Read);
        assert_eq!(g.string("k").unwrap(), last[2]);
    }

    #[test]
    fn test_for_each_and_keys() {
        let store = Store::new(32);
        let keys = ["user:1", "user:2", "order:1", "user:10"];
        {
            let mut g = store.locks(&keys, Mode::Write);
            for k in keys {
                g.put(k, Value::String(k.to_string()));
            }
            g.set_ttl("order:1", 0).unwrap();
        }
        let mut seen = Vec::new();
        store.for_each(|k, _, _| seen.push(k.to_string()));
        seen.sort();
        assert_eq!(seen, vec!["user:1", "user:10", "user:2"]);

        assert_eq!(store.keys("user:?"), vec!["user:1", "user:2"]);
        assert_eq!(store.keys("*:1*"), vec!["user:1", "user:10"]);
        assert_eq!(store.keys("user:[12]"), vec!["user:1", "user:2"]);
        assert!(store.keys("order*").is_empty());
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match(b"*", b""));
        assert!(glob_match(b"h?llo", b"hello"));
        assert!(glob_match(b"h*o", b"hello"));
        assert!(!glob_match(b"h*x", b"hello"));
        assert!(glob_match(b"h[ae]llo", b"hallo"));
        assert!(!glob_match(b"h[^e]llo", b"hello"));
        assert!(glob_match(b"h[a-c]llo", b"hbllo"));
        assert!(glob_match(b"a\\*b", b"a*b"));
        assert!(!glob_match(b"a\\*b", b"axb"));
        assert!(glob_match(b"*a*b*", b"xxaxxbxx"));
    }
}
