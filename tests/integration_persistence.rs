// tests/integration_persistence.rs

//! 集成测试：验证 AOF 追加、重放、重写
//! 流程：
//! 1. 在临时目录打开 Db（只写 AOF）
//! 2. 执行若干读写命令
//! 3. close() 排空队列并刷盘
//! 4. “重启”：重新 open，同一份日志重放
//! 5. 验证重放结果

use std::fs;
use std::path::Path;
use std::sync::Barrier;

use anyhow::Result;
use rand::{Rng, SeedableRng, rngs::StdRng};
use tempfile::tempdir;

use cagedb::{config::Config, db::Db, persistence::Aof};

fn cmd(line: &str) -> Vec<Vec<u8>> {
    line.split_whitespace().map(|s| s.as_bytes().to_vec()).collect()
}

fn cfg(dir: &Path, rewrite_threshold: u64) -> Config {
    Config {
        data_dir: dir.to_path_buf(),
        shards: 16,
        rewrite_threshold,
        log_queue_capacity: 8,
        ..Config::default()
    }
}

#[test]
fn test_only_writes_are_logged() -> Result<()> {
    let tmp = tempdir()?;
    let db = Db::open("w", &cfg(tmp.path(), 0))?;

    let writes = [
        "SET a 1",
        "RPUSH l x y",
        "ZADD z 1 m",
        "EXPIRE a 100",
        "PERSIST a",
        "LPOP l",
        "MSET b 2 c 3",
        "ZRANGEBYSCORE z 0 1",
        "DEL c",
    ];
    let reads = [
        "GET a", "TTL a", "KEYS *", "LLEN l", "LINDEX l 0", "LRANGE l 0 -1", "ZCARD z",
        "ZRANGE z 0 -1", "ZCOUNT z 0 1", "ZRANK z m", "ZSCORE z m",
    ];
    // 读写交错执行
    for (i, w) in writes.iter().enumerate() {
        db.exec(cmd(reads[i % reads.len()]));
        db.exec(cmd(w));
        db.exec(cmd(reads[(i + 3) % reads.len()]));
    }
    db.close();

    let log = fs::read_to_string(tmp.path().join("db_w"))?;
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines, writes);
    Ok(())
}

#[test]
fn test_replay_after_restart() -> Result<()> {
    let tmp = tempdir()?;
    {
        let db = Db::open("0", &cfg(tmp.path(), 0))?;
        for line in [
            "SET k1 v1",
            "SET k2 v2",
            "DEL k1",
            "LPUSH l a",
            "LPUSH l b",
            "ZADD z 3 c 1 a 2 b",
            "ZREM z b",
            "SET gone x",
            "EXPIRE gone 0",
        ] {
            db.exec(cmd(line));
        }
        db.close();
    }

    let db = Db::open("0", &cfg(tmp.path(), 0))?;
    assert_eq!(db.exec(cmd("GET k1")), vec!["(nil)"]);
    assert_eq!(db.exec(cmd("GET k2")), vec!["v2"]);
    assert_eq!(db.exec(cmd("LRANGE l 0 -1")), vec!["b", "a"]);
    assert_eq!(db.exec(cmd("ZRANGE z 0 -1")), vec!["a", "c"]);
    assert_eq!(db.exec(cmd("GET gone")), vec!["(nil)"]);
    Ok(())
}

#[test]
fn test_torn_tail_is_dropped() -> Result<()> {
    let tmp = tempdir()?;
    let path = Aof::path_for(tmp.path(), "0");
    fs::write(&path, "SET a 1\nRPUSH l x\nSET b hal")?;

    let db = Db::open("0", &cfg(tmp.path(), 0))?;
    assert_eq!(db.exec(cmd("GET a")), vec!["1"]);
    assert_eq!(db.exec(cmd("GET b")), vec!["(nil)"]);
    db.exec(cmd("SET c 3"));
    db.close();

    assert_eq!(fs::read_to_string(&path)?, "SET a 1\nRPUSH l x\nSET c 3\n");
    Ok(())
}

/// 多个线程同时写同一个 key / 同一个 list，重启之后必须和关闭前看到的一样
#[test]
fn test_same_key_writers_replay_to_live_state() -> Result<()> {
    let tmp = tempdir()?;
    let rounds = 50;
    let threads = 6;
    let mut live = Vec::new();
    {
        let db = Db::open("0", &cfg(tmp.path(), 0))?;
        for round in 0..rounds {
            let barrier = Barrier::new(threads);
            std::thread::scope(|s| {
                for t in 0..threads {
                    let (db, barrier) = (&db, &barrier);
                    s.spawn(move || {
                        barrier.wait();
                        db.exec(cmd(&format!("SET k{round} t{t}")));
                        db.exec(cmd(&format!("RPUSH l{round} t{t}")));
                        db.exec(cmd(&format!("ZADD z {t} r{round}")));
                    });
                }
            });
            live.push((
                db.exec(cmd(&format!("GET k{round}"))),
                db.exec(cmd(&format!("LRANGE l{round} 0 -1"))),
                db.exec(cmd(&format!("ZSCORE z r{round}"))),
            ));
        }
        db.close();
    }

    let db = Db::open("0", &cfg(tmp.path(), 0))?;
    for (round, (value, list, score)) in live.into_iter().enumerate() {
        assert_eq!(db.exec(cmd(&format!("GET k{round}"))), value, "round {round}");
        assert_eq!(db.exec(cmd(&format!("LRANGE l{round} 0 -1"))), list, "round {round}");
        assert_eq!(db.exec(cmd(&format!("ZSCORE z r{round}"))), score, "round {round}");
    }
    Ok(())
}

/// 一边写一边触发重写，关掉再打开，内容必须一致
#[test]
fn test_rewrite_under_traffic() -> Result<()> {
    let tmp = tempdir()?;
    let mut rng = StdRng::seed_from_u64(42);
    let mut expected = Vec::new();
    {
        let db = Db::open("0", &cfg(tmp.path(), 25))?;
        std::thread::scope(|s| {
            for t in 0..4 {
                let db = &db;
                s.spawn(move || {
                    for i in 0..300 {
                        db.exec(cmd(&format!("SET t{t}:k{} {i}", i % 10)));
                        db.exec(cmd(&format!("RPUSH t{t}:list {i}")));
                        if i % 7 == 0 {
                            db.exec(cmd(&format!("LPOP t{t}:list")));
                        }
                        db.exec(cmd(&format!("ZADD t{t}:z {} m{}", i % 13, i % 17)));
                    }
                });
            }
        });
        for _ in 0..50 {
            let n: u32 = rng.gen_range(0..1000);
            db.exec(cmd(&format!("SET rand{} {n}", n % 20)));
        }
        if let Some(aof) = db.aof() {
            // 正在跑的那次可能没覆盖到最后的写入，等它结束再来一次
            while !aof.rewrite() {
                aof.wait_rewrite();
            }
            aof.wait_rewrite();
        }

        let mut keys = db.exec(cmd("KEYS *"));
        keys.sort();
        for k in keys {
            let dump = match k.split(':').nth(1) {
                Some("list") => db.exec(cmd(&format!("LRANGE {k} 0 -1"))),
                Some("z") => {
                    let members = db.exec(cmd(&format!("ZRANGE {k} 0 -1")));
                    let scores = members
                        .iter()
                        .flat_map(|m| db.exec(cmd(&format!("ZSCORE {k} {m}"))));
                    members.iter().cloned().chain(scores).collect()
                }
                _ => db.exec(cmd(&format!("GET {k}"))),
            };
            expected.push((k, dump));
        }
        db.close();
    }

    let log = fs::read_to_string(tmp.path().join("db_0"))?;
    // 4 * (300 + 300 + 43 + 300) + 50 条记录，重写之后远少于这个数
    assert!(log.lines().count() < 1000, "log has {} lines", log.lines().count());

    let db = Db::open("0", &cfg(tmp.path(), 25))?;
    for (k, dump) in expected {
        let again = match k.split(':').nth(1) {
            Some("list") => db.exec(cmd(&format!("LRANGE {k} 0 -1"))),
            Some("z") => {
                let members = db.exec(cmd(&format!("ZRANGE {k} 0 -1")));
                let scores = members
                    .iter()
                    .flat_map(|m| db.exec(cmd(&format!("ZSCORE {k} {m}"))));
                members.iter().cloned().chain(scores).collect()
            }
            _ => db.exec(cmd(&format!("GET {k}"))),
        };
        assert_eq!(again, dump, "key {k}");
    }
    Ok(())
}
