// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thin adapter over the shared key-value store.
//!
//! Every cross-task coordination primitive in the dispatcher (queues, slots,
//! locks, timer tokens, the event log) goes through this trait. No cross-key
//! atomicity is assumed; single-key operations are atomic on the store side.
//!
//! Object-safe for use as `Arc<dyn Kv>`; the production implementation is
//! [`RedisKv`], tests swap in `test_support::MemoryKv`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::KvError;

pub type KvFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, KvError>> + Send + 'a>>;

pub trait Kv: Send + Sync + 'static {
    fn get<'a>(&'a self, key: &'a str) -> KvFuture<'a, Option<String>>;

    fn set_ttl<'a>(&'a self, key: &'a str, value: &'a str, ttl: Duration) -> KvFuture<'a, ()>;

    /// `SET NX EX`. Returns true when the key was absent and is now ours.
    fn set_if_absent<'a>(&'a self, key: &'a str, value: &'a str, ttl: Duration)
        -> KvFuture<'a, bool>;

    fn del<'a>(&'a self, key: &'a str) -> KvFuture<'a, ()>;

    fn rpush<'a>(&'a self, key: &'a str, value: &'a str) -> KvFuture<'a, ()>;

    /// Inclusive range; negative indices count from the tail.
    fn lrange<'a>(&'a self, key: &'a str, start: isize, stop: isize) -> KvFuture<'a, Vec<String>>;

    /// Remove up to `count` occurrences of `value`; returns removed count.
    fn lrem<'a>(&'a self, key: &'a str, count: isize, value: &'a str) -> KvFuture<'a, usize>;

    fn lpop<'a>(&'a self, key: &'a str) -> KvFuture<'a, Option<String>>;

    fn ltrim<'a>(&'a self, key: &'a str, start: isize, stop: isize) -> KvFuture<'a, ()>;

    fn llen<'a>(&'a self, key: &'a str) -> KvFuture<'a, usize>;

    /// All keys matching a glob pattern. Cursors are driven to completion
    /// internally; callers see one flat list.
    fn scan<'a>(&'a self, pattern: &'a str) -> KvFuture<'a, Vec<String>>;

    fn expire<'a>(&'a self, key: &'a str, ttl: Duration) -> KvFuture<'a, ()>;
}

// -- Redis implementation -----------------------------------------------------

/// Production adapter over a Redis connection manager.
///
/// `ConnectionManager` clones share one multiplexed connection and reconnect
/// on failure, so each call clones the handle instead of pooling.
#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
}

impl RedisKv {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url).map_err(KvError::from)?;
        let conn = ConnectionManager::new(client).await.map_err(KvError::from)?;
        Ok(Self { conn })
    }
}

impl Kv for RedisKv {
    fn get<'a>(&'a self, key: &'a str) -> KvFuture<'a, Option<String>> {
        let mut conn = self.conn.clone();
        let key = key.to_owned();
        Box::pin(async move {
            let value: Option<String> = conn.get(&key).await?;
            Ok(value)
        })
    }

    fn set_ttl<'a>(&'a self, key: &'a str, value: &'a str, ttl: Duration) -> KvFuture<'a, ()> {
        let mut conn = self.conn.clone();
        let key = key.to_owned();
        let value = value.to_owned();
        Box::pin(async move {
            let () = conn.set_ex(&key, &value, ttl.as_secs().max(1)).await?;
            Ok(())
        })
    }

    fn set_if_absent<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Duration,
    ) -> KvFuture<'a, bool> {
        let mut conn = self.conn.clone();
        let key = key.to_owned();
        let value = value.to_owned();
        Box::pin(async move {
            let mut cmd = redis::cmd("SET");
            cmd.arg(&key).arg(&value).arg("NX").arg("EX").arg(ttl.as_secs().max(1));
            let reply: Option<String> = cmd.query_async(&mut conn).await?;
            Ok(reply.is_some())
        })
    }

    fn del<'a>(&'a self, key: &'a str) -> KvFuture<'a, ()> {
        let mut conn = self.conn.clone();
        let key = key.to_owned();
        Box::pin(async move {
            let _: i64 = conn.del(&key).await?;
            Ok(())
        })
    }

    fn rpush<'a>(&'a self, key: &'a str, value: &'a str) -> KvFuture<'a, ()> {
        let mut conn = self.conn.clone();
        let key = key.to_owned();
        let value = value.to_owned();
        Box::pin(async move {
            let _: i64 = conn.rpush(&key, &value).await?;
            Ok(())
        })
    }

    fn lrange<'a>(&'a self, key: &'a str, start: isize, stop: isize) -> KvFuture<'a, Vec<String>> {
        let mut conn = self.conn.clone();
        let key = key.to_owned();
        Box::pin(async move {
            let items: Vec<String> = conn.lrange(&key, start, stop).await?;
            Ok(items)
        })
    }

    fn lrem<'a>(&'a self, key: &'a str, count: isize, value: &'a str) -> KvFuture<'a, usize> {
        let mut conn = self.conn.clone();
        let key = key.to_owned();
        let value = value.to_owned();
        Box::pin(async move {
            let removed: i64 = conn.lrem(&key, count, &value).await?;
            Ok(removed.max(0) as usize)
        })
    }

    fn lpop<'a>(&'a self, key: &'a str) -> KvFuture<'a, Option<String>> {
        let mut conn = self.conn.clone();
        let key = key.to_owned();
        Box::pin(async move {
            let value: Option<String> = conn.lpop(&key, None).await?;
            Ok(value)
        })
    }

    fn ltrim<'a>(&'a self, key: &'a str, start: isize, stop: isize) -> KvFuture<'a, ()> {
        let mut conn = self.conn.clone();
        let key = key.to_owned();
        Box::pin(async move {
            let () = conn.ltrim(&key, start, stop).await?;
            Ok(())
        })
    }

    fn llen<'a>(&'a self, key: &'a str) -> KvFuture<'a, usize> {
        let mut conn = self.conn.clone();
        let key = key.to_owned();
        Box::pin(async move {
            let len: i64 = conn.llen(&key).await?;
            Ok(len.max(0) as usize)
        })
    }

    fn scan<'a>(&'a self, pattern: &'a str) -> KvFuture<'a, Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = pattern.to_owned();
        Box::pin(async move {
            let mut keys = Vec::new();
            let mut cursor: u64 = 0;
            loop {
                let mut cmd = redis::cmd("SCAN");
                cmd.arg(cursor).arg("MATCH").arg(&pattern).arg("COUNT").arg(100);
                let (next, batch): (u64, Vec<String>) = cmd.query_async(&mut conn).await?;
                keys.extend(batch);
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            Ok(keys)
        })
    }

    fn expire<'a>(&'a self, key: &'a str, ttl: Duration) -> KvFuture<'a, ()> {
        let mut conn = self.conn.clone();
        let key = key.to_owned();
        Box::pin(async move {
            let _: bool = conn.expire(&key, ttl.as_secs().max(1) as i64).await?;
            Ok(())
        })
    }
}
