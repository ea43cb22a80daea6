// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only per-day ring of operational events.
//!
//! One right-pushed text line per significant action, trimmed to the last
//! 500 entries. Read by the operator dashboard and dumped by `/logdiario`;
//! never consulted for recovery.

use std::sync::Arc;
use std::time::Duration;

use crate::kv::Kv;

const MAX_ENTRIES: isize = 500;
const KEY_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Maximum characters per outbound dump message.
pub const CHUNK_LIMIT: usize = 3500;

#[derive(Clone)]
pub struct EventLog {
    kv: Arc<dyn Kv>,
}

impl EventLog {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    fn key_for_today() -> String {
        format!("log:{}", chrono::Local::now().format("%Y-%m-%d"))
    }

    /// Append `action` with `k=v` pairs to today's ring. Failures are logged
    /// and swallowed; the log is observability, not state.
    pub async fn append(&self, action: &str, fields: &[(&str, String)]) {
        let mut line = format!("[{}] action={action}", chrono::Local::now().format("%H:%M:%S"));
        for (k, v) in fields {
            line.push(' ');
            line.push_str(k);
            line.push('=');
            line.push_str(v);
        }
        let key = Self::key_for_today();
        if let Err(e) = self.kv.rpush(&key, &line).await {
            tracing::warn!(err = %e, "event log append failed");
            return;
        }
        if let Err(e) = self.kv.ltrim(&key, -MAX_ENTRIES, -1).await {
            tracing::warn!(err = %e, "event log trim failed");
        }
        if let Err(e) = self.kv.expire(&key, KEY_TTL).await {
            tracing::warn!(err = %e, "event log expire failed");
        }
    }

    /// All of today's lines, oldest first.
    pub async fn today(&self) -> Vec<String> {
        match self.kv.lrange(&Self::key_for_today(), 0, -1).await {
            Ok(lines) => lines,
            Err(e) => {
                tracing::warn!(err = %e, "event log read failed");
                Vec::new()
            }
        }
    }
}

/// Split lines into newline-joined chunks of at most `limit` characters.
/// A single oversized line becomes its own chunk rather than being split.
pub fn chunk_lines(lines: &[String], limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in lines {
        let needed = if current.is_empty() { line.len() } else { line.len() + 1 };
        if !current.is_empty() && current.len() + needed > limit {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
#[path = "eventlog_tests.rs"]
mod tests;
