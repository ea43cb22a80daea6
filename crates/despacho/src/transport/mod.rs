// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport: inbound webhook and health probe.

pub mod telegram;
pub mod webhook;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the axum `Router` with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(webhook::health))
        .route("/telegram/webhook", post(webhook::webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
