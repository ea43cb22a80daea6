// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-group fair-priority waiting list with blocklist deferral.
//!
//! The list itself lives in the KV store; ranking data (vehicle type,
//! priority score) is read from each member's session record on every
//! mutation, so the order re-converges as members arrive and leave.
//!
//! Total order on members, stable within one sort:
//! 1. non-blocklisted before blocklisted,
//! 2. Fiorino vans before every other vehicle,
//! 3. higher priority score first,
//! 4. earlier original list index breaks ties (fairness among equals).
//!
//! Blocklisted drivers are never starved: once the queue holds only
//! blocklisted members, a per-group deferral timestamp starts aging and the
//! head is served after the deferral window elapses. The timestamp is global
//! per group, so consecutive blocklisted members do not restart the clock.

use std::sync::Arc;
use std::time::Duration;

use crate::blocklist::Blocklist;
use crate::error::KvError;
use crate::group::{member_key, Group};
use crate::kv::Kv;
use crate::lock::AdvisoryLock;
use crate::session::SessionStore;
use crate::state::epoch_secs;

pub struct QueueEngine {
    kv: Arc<dyn Kv>,
    group: Group,
    sessions: SessionStore,
    blocklist: Blocklist,
    member_ttl: Duration,
    deferral: Duration,
}

/// Ranking data resolved for one queue member.
#[derive(Debug, Clone)]
struct Ranked {
    chat_id: i64,
    raw: String,
    fiorino: bool,
    score: i32,
    original_index: usize,
    blocked: bool,
}

impl QueueEngine {
    pub fn new(
        kv: Arc<dyn Kv>,
        group: Group,
        sessions: SessionStore,
        blocklist: Blocklist,
        member_ttl: Duration,
        deferral: Duration,
    ) -> Self {
        Self { kv, group, sessions, blocklist, member_ttl, deferral }
    }

    pub fn group(&self) -> Group {
        self.group
    }

    /// Insert (or re-rank) `chat_id` and return its 1-based position.
    ///
    /// Re-enqueueing an already-queued chat is idempotent: the existing
    /// occurrence is removed before ranking, so the position only moves if
    /// other members moved it.
    pub async fn enqueue(&self, chat_id: i64) -> Result<usize, KvError> {
        let lock = AdvisoryLock::acquire(Arc::clone(&self.kv), &self.group.lock_key()).await?;
        let result = self.enqueue_locked(chat_id).await;
        lock.release().await;
        result
    }

    async fn enqueue_locked(&self, chat_id: i64) -> Result<usize, KvError> {
        self.evict_from_other_group(chat_id).await?;

        let key = self.group.list_key();
        let candidate = chat_id.to_string();
        let mut raw_members = self.kv.lrange(&key, 0, -1).await?;
        raw_members.retain(|m| m != &candidate);
        raw_members.push(candidate.clone());

        let mut ranked = self.rank(&raw_members).await;
        ranked.sort_by_key(|m| {
            (
                m.blocked,
                std::cmp::Reverse(m.fiorino),
                std::cmp::Reverse(m.score),
                m.original_index,
            )
        });

        self.kv.del(&key).await?;
        for member in &ranked {
            self.kv.rpush(&key, &member.raw).await?;
        }
        self.kv.set_ttl(&member_key(chat_id), self.group.as_str(), self.member_ttl).await?;

        let blocked = ranked.iter().any(|m| m.chat_id == chat_id && m.blocked);
        if !blocked {
            // A non-blocklisted arrival resets the deferral clock.
            self.kv.del(&self.group.empty_since_key()).await?;
        }

        let position = ranked
            .iter()
            .position(|m| m.chat_id == chat_id)
            .map(|i| i + 1)
            .unwrap_or(ranked.len());
        tracing::debug!(group = %self.group, chat_id, position, "enqueued");
        Ok(position)
    }

    /// A chat appears in at most one queue across both groups; if a stale
    /// membership marker points at the other group, evict it there first.
    async fn evict_from_other_group(&self, chat_id: i64) -> Result<(), KvError> {
        let Some(marker) = self.kv.get(&member_key(chat_id)).await? else {
            return Ok(());
        };
        if marker != self.group.as_str() {
            for other in Group::ALL {
                if other.as_str() == marker {
                    self.kv.lrem(&other.list_key(), 0, &chat_id.to_string()).await?;
                }
            }
        }
        Ok(())
    }

    /// Pop the next serviceable member, honoring the blocklist deferral.
    ///
    /// Callers hold the group lock (activation and release paths); this
    /// method does not lock on its own.
    pub async fn pick_next(&self) -> Result<Option<i64>, KvError> {
        let key = self.group.list_key();
        let raw_members = self.kv.lrange(&key, 0, -1).await?;
        let mut ranked = self.rank(&raw_members).await;
        ranked.sort_by_key(|m| {
            (std::cmp::Reverse(m.fiorino), std::cmp::Reverse(m.score), m.original_index)
        });

        let (clear, blocked): (Vec<_>, Vec<_>) = ranked.into_iter().partition(|m| !m.blocked);

        if let Some(head) = clear.first() {
            self.pop(head).await?;
            self.kv.del(&self.group.empty_since_key()).await?;
            return Ok(Some(head.chat_id));
        }

        if let Some(head) = blocked.first() {
            let deferral_key = self.group.empty_since_key();
            let since = self
                .kv
                .get(&deferral_key)
                .await?
                .and_then(|raw| raw.parse::<u64>().ok());
            return match since {
                None => {
                    self.kv
                        .set_ttl(&deferral_key, &epoch_secs().to_string(), self.member_ttl)
                        .await?;
                    Ok(None)
                }
                Some(since) if epoch_secs().saturating_sub(since) < self.deferral.as_secs() => {
                    Ok(None)
                }
                Some(_) => {
                    self.kv.del(&deferral_key).await?;
                    self.pop(head).await?;
                    Ok(Some(head.chat_id))
                }
            };
        }

        self.kv.del(&self.group.empty_since_key()).await?;
        Ok(None)
    }

    async fn pop(&self, member: &Ranked) -> Result<(), KvError> {
        self.kv.lrem(&self.group.list_key(), 1, &member.raw).await?;
        self.kv.del(&member_key(member.chat_id)).await?;
        Ok(())
    }

    /// Remove a chat from the waiting list and clear its membership marker.
    pub async fn remove(&self, chat_id: i64) -> Result<(), KvError> {
        let lock = AdvisoryLock::acquire(Arc::clone(&self.kv), &self.group.lock_key()).await?;
        let result = async {
            self.kv.lrem(&self.group.list_key(), 0, &chat_id.to_string()).await?;
            self.kv.del(&member_key(chat_id)).await
        }
        .await;
        lock.release().await;
        result
    }

    /// 1-based position of a chat, read without mutating.
    pub async fn position(&self, chat_id: i64) -> Result<Option<usize>, KvError> {
        let members = self.kv.lrange(&self.group.list_key(), 0, -1).await?;
        let needle = chat_id.to_string();
        Ok(members.iter().position(|m| m == &needle).map(|i| i + 1))
    }

    pub async fn len(&self) -> Result<usize, KvError> {
        self.kv.llen(&self.group.list_key()).await
    }

    /// Resolve ranking data for every member. Members with unparsable ids
    /// are dropped; missing sessions rank with defaults so a half-expired
    /// chat still drains instead of wedging the list.
    async fn rank(&self, raw_members: &[String]) -> Vec<Ranked> {
        let mut ranked = Vec::with_capacity(raw_members.len());
        for (original_index, raw) in raw_members.iter().enumerate() {
            let Ok(chat_id) = raw.parse::<i64>() else {
                tracing::warn!(group = %self.group, raw = %raw, "dropping unparsable queue member");
                continue;
            };
            let session = match self.sessions.load(chat_id).await {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!(chat_id, err = %e, "session read failed during ranking");
                    None
                }
            };
            let (fiorino, score, driver_id) = session
                .map(|s| (s.is_fiorino(), s.priority_score.unwrap_or(0), s.driver_id))
                .unwrap_or((false, 0, None));
            let blocked = match driver_id {
                Some(driver_id) => self.blocklist.is_blocked(driver_id).await,
                None => false,
            };
            ranked.push(Ranked { chat_id, raw: raw.clone(), fiorino, score, original_index, blocked });
        }
        ranked
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
