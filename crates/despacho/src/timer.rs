// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Response timers and the per-group background sweeper.
//!
//! An armed timer is a random token in the KV store plus an in-process
//! deferred task. The task is only a latency optimization: before acting it
//! re-reads token, slot and session, and a mismatch anywhere makes it a
//! no-op. The 5s sweeper is the correctness backstop: it survives process
//! restarts because the token and slot metadata live in the store.

use std::sync::Arc;
use std::time::Duration;

use rand::distr::Alphanumeric;
use rand::Rng;

use crate::dispatch::Dispatcher;
use crate::error::KvError;
use crate::group::{timer_key, Group};
use crate::kv::Kv;
use crate::session::SessionState;
use crate::state::AppState;

#[derive(Clone)]
pub struct TimerWheel {
    kv: Arc<dyn Kv>,
    ttl: Duration,
}

impl TimerWheel {
    pub fn new(kv: Arc<dyn Kv>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Write a fresh token for `chat_id`, invalidating any earlier timer.
    pub async fn arm(&self, chat_id: i64) -> Result<String, KvError> {
        let token: String =
            rand::rng().sample_iter(&Alphanumeric).take(16).map(char::from).collect();
        self.kv.set_ttl(&timer_key(chat_id), &token, self.ttl).await?;
        Ok(token)
    }

    pub async fn disarm(&self, chat_id: i64) -> Result<(), KvError> {
        self.kv.del(&timer_key(chat_id)).await
    }

    pub async fn current(&self, chat_id: i64) -> Result<Option<String>, KvError> {
        self.kv.get(&timer_key(chat_id)).await
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Arm a token and schedule its deferred firing.
pub async fn arm_response_timer(
    state: &Arc<AppState>,
    chat_id: i64,
    group: Group,
) -> Result<(), KvError> {
    let token = state.timers.arm(chat_id).await?;
    let state = Arc::clone(state);
    let delay = state.timers.ttl();
    tokio::spawn(async move {
        tokio::select! {
            _ = state.shutdown.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                fire_response_timer(&state, chat_id, group, &token).await;
            }
        }
    });
    Ok(())
}

/// The deferred task body: token → slot → session validation chain, then
/// timeout handling. Each mismatch is a silent no-op.
pub async fn fire_response_timer(state: &Arc<AppState>, chat_id: i64, group: Group, token: &str) {
    match state.timers.current(chat_id).await {
        Ok(Some(current)) if current == token => {}
        Ok(_) => return,
        Err(e) => {
            tracing::warn!(chat_id, err = %e, "timer token read failed");
            return;
        }
    }

    let holder = state.group(group).slot.holder().await.unwrap_or(None);
    if holder != Some(chat_id) {
        let _ = state.timers.disarm(chat_id).await;
        return;
    }

    let session = state.sessions.load(chat_id).await.unwrap_or(None);
    if session.map(|s| s.state) != Some(SessionState::ChoosingRoute) {
        let _ = state.timers.disarm(chat_id).await;
        return;
    }

    if let Err(e) = state.timers.disarm(chat_id).await {
        tracing::warn!(chat_id, err = %e, "timer disarm failed");
    }
    Dispatcher::new(Arc::clone(state)).handle_timeout(chat_id, group).await;
}

/// One sweeper per group: reclaims expired slots and, when the slot is
/// free, activates the next waiter. Guards against missed in-process timers
/// (e.g. after a restart).
pub fn spawn_sweeper(state: Arc<AppState>, group: Group) {
    let interval = state.config.sweep_interval();
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            sweep_once(&state, group).await;
        }
        tracing::debug!(group = %group, "sweeper stopped");
    });
}

/// One sweep pass, separated out so tests can drive it directly.
pub async fn sweep_once(state: &Arc<AppState>, group: Group) {
    let dispatcher = Dispatcher::new(Arc::clone(state));

    match state.group(group).slot.reclaim_expired().await {
        Ok(Some(expired)) => dispatcher.close_for_inactivity(expired).await,
        Ok(None) => {}
        Err(e) => tracing::warn!(group = %group, err = %e, "sweeper reclaim failed"),
    }

    match state.group(group).slot.holder().await {
        Ok(Some(_)) => {}
        Ok(None) => dispatcher.activate_and_notify(group).await,
        Err(e) => tracing::warn!(group = %group, err = %e, "sweeper holder read failed"),
    }
}

#[cfg(test)]
#[path = "timer_tests.rs"]
mod tests;
