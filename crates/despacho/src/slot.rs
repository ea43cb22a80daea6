// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Active-slot controller: at most one chat per group is served at full
//! depth at any instant.
//!
//! Two keys with different TTLs: `queue:active:<group>` (the service
//! window) and `queue:active:meta:<group>` (twice as long) so a crashed
//! process can still be observed to have held the slot and the sweeper can
//! reclaim it without ambiguity.
//!
//! The controller is mechanical: it installs, refreshes, reclaims and
//! clears slots and reports *who* must be notified; sending messages and
//! mutating sessions stays with the dispatcher, outside any lock scope.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::KvError;
use crate::group::Group;
use crate::kv::Kv;
use crate::lock::AdvisoryLock;
use crate::queue::QueueEngine;
use crate::state::epoch_ms;

/// Persisted slot metadata, read by the sweeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotMeta {
    pub chat_id: i64,
    pub started_at_ms: u64,
}

/// Outcome of a `try_acquire`.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct AcquireResult {
    /// The caller now holds the slot.
    pub acquired: bool,
    /// Another chat was activated instead; the caller must notify it.
    pub activated_other: Option<i64>,
    /// An expired holder was reclaimed on the way; the caller must run
    /// inactivity cleanup for it.
    pub reclaimed: Option<i64>,
}

/// What the locked activation step found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activation {
    /// Someone already holds the slot; do not notify them again.
    AlreadyHeld(i64),
    /// A waiter was just installed and needs notification.
    Activated(i64),
    /// Nothing to serve (empty queue or deferral in force).
    Idle,
}

impl Activation {
    fn newly_activated(self) -> Option<i64> {
        match self {
            Activation::Activated(chat_id) => Some(chat_id),
            _ => None,
        }
    }
}

pub struct SlotController {
    kv: Arc<dyn Kv>,
    group: Group,
    queue: Arc<QueueEngine>,
    slot_ttl: Duration,
}

impl SlotController {
    pub fn new(kv: Arc<dyn Kv>, group: Group, queue: Arc<QueueEngine>, slot_ttl: Duration) -> Self {
        Self { kv, group, queue, slot_ttl }
    }

    pub fn group(&self) -> Group {
        self.group
    }

    /// Current slot holder, if any.
    pub async fn holder(&self) -> Result<Option<i64>, KvError> {
        let raw = self.kv.get(&self.group.active_key()).await?;
        Ok(raw.and_then(|raw| raw.parse().ok()))
    }

    async fn install(&self, chat_id: i64) -> Result<(), KvError> {
        self.kv
            .set_ttl(&self.group.active_key(), &chat_id.to_string(), self.slot_ttl)
            .await?;
        let meta = SlotMeta { chat_id, started_at_ms: epoch_ms() };
        self.kv
            .set_ttl(&self.group.active_meta_key(), &serde_json::to_string(&meta)?, self.slot_ttl * 2)
            .await
    }

    async fn clear(&self) -> Result<(), KvError> {
        self.kv.del(&self.group.active_key()).await?;
        self.kv.del(&self.group.active_meta_key()).await
    }

    /// Restart the service window for the current holder. Called every time
    /// the holder is served a routes menu.
    pub async fn refresh_meta(&self, chat_id: i64) -> Result<(), KvError> {
        self.install(chat_id).await
    }

    /// Try to hand the slot to `chat_id`. Idempotent when the chat already
    /// holds it; reclaims an expired holder on the way.
    pub async fn try_acquire(&self, chat_id: i64) -> Result<AcquireResult, KvError> {
        let mut result = AcquireResult::default();

        if let Some(holder) = self.holder().await? {
            if holder == chat_id {
                result.acquired = true;
                return Ok(result);
            }
            result.reclaimed = self.reclaim_expired().await?;
            if result.reclaimed.is_none() {
                return Ok(result);
            }
        }

        let lock = AdvisoryLock::acquire(Arc::clone(&self.kv), &self.group.lock_key()).await?;
        let activation = self.activate_locked().await;
        lock.release().await;

        match activation? {
            Activation::AlreadyHeld(holder) => result.acquired = holder == chat_id,
            Activation::Activated(next) if next == chat_id => result.acquired = true,
            Activation::Activated(next) => result.activated_other = Some(next),
            Activation::Idle => {}
        }
        Ok(result)
    }

    /// Clear the slot and install the next waiter; returns the new holder so
    /// the caller can notify them outside the lock.
    pub async fn release_and_next(&self) -> Result<Option<i64>, KvError> {
        let lock = AdvisoryLock::acquire(Arc::clone(&self.kv), &self.group.lock_key()).await?;
        let result = async {
            self.clear().await?;
            self.activate_locked().await
        }
        .await;
        lock.release().await;
        Ok(result?.newly_activated())
    }

    /// Install the next waiter when the slot is free. Used by the sweeper.
    pub async fn activate_next(&self) -> Result<Option<i64>, KvError> {
        let lock = AdvisoryLock::acquire(Arc::clone(&self.kv), &self.group.lock_key()).await?;
        let result = self.activate_locked().await;
        lock.release().await;
        Ok(result?.newly_activated())
    }

    /// Core activation step; callers hold the group lock. Re-checks the
    /// holder under the lock so two racing activators install at most one.
    async fn activate_locked(&self) -> Result<Activation, KvError> {
        if let Some(holder) = self.holder().await? {
            return Ok(Activation::AlreadyHeld(holder));
        }
        let Some(next) = self.queue.pick_next().await? else {
            return Ok(Activation::Idle);
        };
        self.install(next).await?;
        tracing::debug!(group = %self.group, chat_id = next, "slot activated");
        Ok(Activation::Activated(next))
    }

    /// Reclaim an expired slot under the per-group reclaim lock. Returns the
    /// expired holder, which still needs inactivity cleanup by the caller.
    pub async fn reclaim_expired(&self) -> Result<Option<i64>, KvError> {
        let lock =
            AdvisoryLock::acquire(Arc::clone(&self.kv), &self.group.reclaim_lock_key()).await?;
        let result = self.reclaim_locked().await;
        lock.release().await;
        result
    }

    async fn reclaim_locked(&self) -> Result<Option<i64>, KvError> {
        let Some(raw) = self.kv.get(&self.group.active_meta_key()).await? else {
            return Ok(None);
        };
        let meta: SlotMeta = match serde_json::from_str(&raw) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(group = %self.group, err = %e, "discarding corrupt slot meta");
                self.clear().await?;
                return Ok(None);
            }
        };
        if epoch_ms().saturating_sub(meta.started_at_ms) < self.slot_ttl.as_millis() as u64 {
            return Ok(None);
        }
        self.clear().await?;
        tracing::info!(group = %self.group, chat_id = meta.chat_id, "reclaimed expired slot");
        Ok(Some(meta.chat_id))
    }
}

#[cfg(test)]
#[path = "slot_tests.rs"]
mod tests;
