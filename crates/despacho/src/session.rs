// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-chat conversational session, persisted as JSON in the KV store.
//!
//! Sessions are created on the first inbound message from a chat and die on
//! a terminal transition or after the idle TTL. All mutation happens in
//! response to an event for that chat (the webhook layer serializes events
//! per chat), so readers may observe stale state between transitions.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::KvError;
use crate::group::{session_key, Group};
use crate::kv::Kv;

/// Conversational position of a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    WaitingId,
    Menu,
    HelpMenu,
    ChoosingRoute,
}

/// Snapshot of a route offered inside a session. A snapshot, not a live
/// reference: the claim re-validates against the route table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRef {
    pub id: String,
    pub label: String,
}

/// Stateful context for one chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSession {
    pub chat_id: i64,
    pub state: SessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_score: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_group: Option<Group>,
    #[serde(default)]
    pub in_queue: bool,
    /// Present only while CHOOSING_ROUTE.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_routes: Vec<RouteRef>,
}

impl DriverSession {
    pub fn new(chat_id: i64) -> Self {
        Self {
            chat_id,
            state: SessionState::WaitingId,
            driver_id: None,
            driver_name: None,
            vehicle_type: None,
            priority_score: None,
            queue_group: None,
            in_queue: false,
            available_routes: Vec::new(),
        }
    }

    /// Group this session queues in. Defaults to general until identity is
    /// confirmed; group derivation happens once, at identification.
    pub fn group(&self) -> Group {
        self.queue_group.unwrap_or(Group::General)
    }

    pub fn is_fiorino(&self) -> bool {
        self.vehicle_type.as_deref().map(crate::group::is_fiorino).unwrap_or(false)
    }
}

// -- Store --------------------------------------------------------------------

/// KV-backed session repository. Every save refreshes the idle TTL.
#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn Kv>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn Kv>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    pub async fn load(&self, chat_id: i64) -> Result<Option<DriverSession>, KvError> {
        let Some(raw) = self.kv.get(&session_key(chat_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                // Unreadable record: drop it and let the chat start over.
                tracing::warn!(chat_id, err = %e, "discarding corrupt session record");
                self.kv.del(&session_key(chat_id)).await?;
                Ok(None)
            }
        }
    }

    pub async fn save(&self, session: &DriverSession) -> Result<(), KvError> {
        let raw = serde_json::to_string(session)?;
        self.kv.set_ttl(&session_key(session.chat_id), &raw, self.ttl).await
    }

    pub async fn clear(&self, chat_id: i64) -> Result<(), KvError> {
        self.kv.del(&session_key(chat_id)).await
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
