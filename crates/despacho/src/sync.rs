// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Admin sync handshake and the global sync gate.
//!
//! `/sync` (or `/atualizar_dados`) and `/syncDriver` start a password
//! handshake: a per-chat pending marker records the requested scope, the
//! next message from that chat is the password attempt. While a sync runs,
//! a global in-progress flag makes every non-admin event answer "please
//! wait" and be discarded.
//!
//! The ETL itself (spreadsheet import, table refresh) is an external
//! collaborator behind [`SyncRunner`]; this module owns only the handshake,
//! the gate, and the post-sync session flush.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::KvError;
use crate::kv::Kv;

const SYNC_FLAG_KEY: &str = "sync:in_progress";
/// A sync may legitimately run for many minutes; the flag TTL is the upper
/// bound after which a crashed sync stops gating traffic.
const SYNC_FLAG_TTL: Duration = Duration::from_secs(1800);
const PENDING_TTL: Duration = Duration::from_secs(120);

/// What an admin asked to refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncScope {
    All,
    DriversOnly,
}

impl SyncScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncScope::All => "all",
            SyncScope::DriversOnly => "drivers",
        }
    }

    pub fn parse(raw: &str) -> Option<SyncScope> {
        match raw {
            "all" => Some(SyncScope::All),
            "drivers" => Some(SyncScope::DriversOnly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncSummary {
    pub drivers: u64,
    pub routes: u64,
}

pub type SyncFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<SyncSummary>> + Send + 'a>>;

/// Seam for the external ETL.
pub trait SyncRunner: Send + Sync + 'static {
    fn run(&self, scope: SyncScope) -> SyncFuture<'_>;
}

/// Placeholder runner for deployments where the ETL is triggered out of
/// band; it only logs. The gate semantics are exercised all the same.
pub struct LoggingSyncRunner;

impl SyncRunner for LoggingSyncRunner {
    fn run(&self, scope: SyncScope) -> SyncFuture<'_> {
        Box::pin(async move {
            tracing::info!(scope = scope.as_str(), "sync requested; external ETL owns the refresh");
            Ok(SyncSummary::default())
        })
    }
}

// -- Gate ---------------------------------------------------------------------

#[derive(Clone)]
pub struct SyncGate {
    kv: Arc<dyn Kv>,
}

impl SyncGate {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    pub async fn in_progress(&self) -> Result<bool, KvError> {
        Ok(self.kv.get(SYNC_FLAG_KEY).await?.is_some())
    }

    /// Raise the gate; false when another sync already holds it.
    pub async fn begin(&self) -> Result<bool, KvError> {
        self.kv.set_if_absent(SYNC_FLAG_KEY, "1", SYNC_FLAG_TTL).await
    }

    pub async fn end(&self) -> Result<(), KvError> {
        self.kv.del(SYNC_FLAG_KEY).await
    }

    fn pending_key(chat_id: i64) -> String {
        format!("sync:pending:{chat_id}")
    }

    /// Record that `chat_id` started a handshake for `scope`.
    pub async fn set_pending(&self, chat_id: i64, scope: SyncScope) -> Result<(), KvError> {
        self.kv.set_ttl(&Self::pending_key(chat_id), scope.as_str(), PENDING_TTL).await
    }

    pub async fn take_pending(&self, chat_id: i64) -> Result<Option<SyncScope>, KvError> {
        let key = Self::pending_key(chat_id);
        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(None);
        };
        self.kv.del(&key).await?;
        Ok(SyncScope::parse(&raw))
    }

    /// Drop every cached session after a full refresh: cached driver data
    /// (name, vehicle, score) may no longer match the registry.
    pub async fn flush_sessions(&self) -> Result<usize, KvError> {
        let keys = self.kv.scan("session:*").await?;
        let count = keys.len();
        for key in &keys {
            self.kv.del(key).await?;
        }
        Ok(count)
    }
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;
