// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error classification for the dispatch core.
//!
//! KV failures are split into transient and fatal: transient failures are
//! retried one level up (or dropped, letting the sweeper reconverge), fatal
//! ones are surfaced. Everything else rides on `anyhow` at task boundaries.

use std::fmt;

/// Failure talking to the shared KV store.
#[derive(Debug, Clone)]
pub enum KvError {
    /// Timeouts, dropped connections, refused connections. Safe to retry;
    /// the store's TTLs guarantee reconvergence if the caller gives up.
    Transient(String),
    /// Protocol or type errors. Retrying will not help.
    Fatal(String),
}

impl KvError {
    pub fn is_transient(&self) -> bool {
        matches!(self, KvError::Transient(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KvError::Transient(_) => "TRANSIENT_KV",
            KvError::Fatal(_) => "FATAL_KV",
        }
    }
}

impl fmt::Display for KvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KvError::Transient(msg) => write!(f, "transient kv error: {msg}"),
            KvError::Fatal(msg) => write!(f, "fatal kv error: {msg}"),
        }
    }
}

impl std::error::Error for KvError {}

impl From<redis::RedisError> for KvError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error()
        {
            KvError::Transient(e.to_string())
        } else {
            KvError::Fatal(e.to_string())
        }
    }
}

impl From<serde_json::Error> for KvError {
    fn from(e: serde_json::Error) -> Self {
        KvError::Fatal(format!("serialization: {e}"))
    }
}
