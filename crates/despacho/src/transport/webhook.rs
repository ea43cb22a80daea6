// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound chat-update decoding.
//!
//! The webhook always answers `{"ok":true}` with HTTP 200: the chat
//! platform retries on anything else, and a failed event is better dropped
//! than replayed out of order. Non-text updates are acknowledged and
//! ignored. Unknown fields are ignored by construction.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::dispatch::Dispatcher;
use crate::group::Group;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Serialize)]
pub struct Ack {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub queued_moto: usize,
    pub queued_general: usize,
}

/// `GET /healthz`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let queued_moto = state.group(Group::Moto).queue.len().await.unwrap_or(0);
    let queued_general = state.group(Group::General).queue.len().await.unwrap_or(0);
    Json(HealthResponse { status: "running".to_owned(), queued_moto, queued_general })
}

/// `POST /telegram/webhook`
///
/// Events for the same chat are processed serially: the per-chat mutex is
/// held across the whole state transition. Events for different chats run
/// concurrently on the worker pool.
pub async fn webhook(State(state): State<Arc<AppState>>, Json(update): Json<Update>) -> Json<Ack> {
    let Some(message) = update.message else {
        return Json(Ack { ok: true });
    };
    let Some(text) = message.text else {
        return Json(Ack { ok: true });
    };
    let chat_id = message.chat.id;

    let chat_lock = state.chat_lock(chat_id).await;
    let _serialized = chat_lock.lock().await;
    Dispatcher::new(Arc::clone(&state)).handle_message(chat_id, &text).await;

    Json(Ack { ok: true })
}
