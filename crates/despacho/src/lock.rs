// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Advisory distributed lock over the KV store.
//!
//! `SET NX EX` with a random nonce, bounded retry, and a guarded release
//! that only deletes the key while it still carries our nonce. After retry
//! exhaustion the caller proceeds *without* the lock: the lock is advisory,
//! contention is rare, and the operations inside are idempotent and
//! monotonic. The TTL (5s) must exceed the longest critical section.

use std::sync::Arc;
use std::time::Duration;

use crate::error::KvError;
use crate::kv::Kv;

const LOCK_TTL: Duration = Duration::from_secs(5);
const RETRY_DELAY: Duration = Duration::from_millis(120);
const MAX_ATTEMPTS: u32 = 8;

/// A held (or fallen-through) advisory lock. Release explicitly; there is no
/// async drop, and an unreleased key expires with the TTL anyway.
pub struct AdvisoryLock {
    kv: Arc<dyn Kv>,
    key: String,
    nonce: String,
    held: bool,
}

impl AdvisoryLock {
    /// Acquire `key`, retrying up to 8 times at ~120ms. On exhaustion the
    /// returned lock reports `held() == false` and the caller runs its
    /// critical section anyway.
    pub async fn acquire(kv: Arc<dyn Kv>, key: &str) -> Result<AdvisoryLock, KvError> {
        let nonce = uuid::Uuid::new_v4().to_string();
        for attempt in 0..MAX_ATTEMPTS {
            if kv.set_if_absent(key, &nonce, LOCK_TTL).await? {
                return Ok(AdvisoryLock { kv, key: key.to_owned(), nonce, held: true });
            }
            if attempt + 1 < MAX_ATTEMPTS {
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
        tracing::warn!(key, "lock contention exhausted retries, proceeding unlocked");
        Ok(AdvisoryLock { kv, key: key.to_owned(), nonce, held: false })
    }

    pub fn held(&self) -> bool {
        self.held
    }

    /// Delete the lock key iff it still carries our nonce. A lost TTL race
    /// here means another holder already owns the key; leave it alone.
    pub async fn release(self) {
        if !self.held {
            return;
        }
        match self.kv.get(&self.key).await {
            Ok(Some(current)) if current == self.nonce => {
                if let Err(e) = self.kv.del(&self.key).await {
                    tracing::warn!(key = %self.key, err = %e, "lock release failed");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(key = %self.key, err = %e, "lock release read failed"),
        }
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
