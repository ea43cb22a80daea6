// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cached blocklist lookups.
//!
//! Queue ranking reads the blocklist flag for every member on every
//! mutation, so the repository answer is cached in the KV store for a few
//! minutes. Lookups never block dispatch: a repository failure counts as
//! not-blocked and is logged.

use std::sync::Arc;
use std::time::Duration;

use crate::group::blocklist_cache_key;
use crate::kv::Kv;
use crate::repo::BlocklistRepo;

const CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct Blocklist {
    kv: Arc<dyn Kv>,
    repo: Arc<dyn BlocklistRepo>,
}

impl Blocklist {
    pub fn new(kv: Arc<dyn Kv>, repo: Arc<dyn BlocklistRepo>) -> Self {
        Self { kv, repo }
    }

    pub async fn is_blocked(&self, driver_id: i64) -> bool {
        let key = blocklist_cache_key(driver_id);
        match self.kv.get(&key).await {
            Ok(Some(cached)) => return cached == "1",
            Ok(None) => {}
            Err(e) => tracing::warn!(driver_id, err = %e, "blocklist cache read failed"),
        }
        let blocked = match self.repo.is_active(driver_id).await {
            Ok(blocked) => blocked,
            Err(e) => {
                tracing::warn!(driver_id, err = %e, "blocklist lookup failed, treating as clear");
                return false;
            }
        };
        let value = if blocked { "1" } else { "0" };
        if let Err(e) = self.kv.set_ttl(&key, value, CACHE_TTL).await {
            tracing::warn!(driver_id, err = %e, "blocklist cache write failed");
        }
        blocked
    }
}

#[cfg(test)]
#[path = "blocklist_tests.rs"]
mod tests;
