// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Despacho: chat-driven dispatcher for contested delivery routes.
//!
//! Drivers claim routes through an asynchronous chat channel. Because
//! concurrent self-service would let two drivers take the same route,
//! conversations are serialized through per-group fair-priority queues
//! gated by a single active slot, and claims commit via a conditional
//! update against the route table.

pub mod blocklist;
pub mod claim;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod eventlog;
pub mod group;
pub mod kv;
pub mod lock;
pub mod messages;
pub mod queue;
pub mod repo;
pub mod session;
pub mod slot;
pub mod state;
pub mod sync;
pub mod test_support;
pub mod timer;
pub mod transport;

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::BotConfig;
use crate::group::Group;
use crate::kv::RedisKv;
use crate::repo::{PgBlocklistRepo, PgDriverRepo, PgExportSink, PgRouteRepo};
use crate::state::{Adapters, AppState};
use crate::sync::LoggingSyncRunner;
use crate::timer::spawn_sweeper;
use crate::transport::build_router;
use crate::transport::telegram::TelegramSender;

/// Run the dispatcher until shutdown.
pub async fn run(config: BotConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let kv = Arc::new(RedisKv::connect(&config.redis_url).await?);
    let pool = PgPoolOptions::new().max_connections(8).connect(&config.database_url).await?;

    let adapters = Adapters {
        drivers: Arc::new(PgDriverRepo::new(pool.clone())),
        routes: Arc::new(PgRouteRepo::new(pool.clone())),
        blocklist: Arc::new(PgBlocklistRepo::new(pool.clone())),
        export: Arc::new(PgExportSink::new(pool)),
        sender: Arc::new(TelegramSender::new(
            config.chat_api_base.clone(),
            config.bot_token.clone(),
        )),
        sync_runner: Arc::new(LoggingSyncRunner),
    };
    let state = Arc::new(AppState::new(config, kv, adapters, shutdown.clone()));

    for group in Group::ALL {
        spawn_sweeper(Arc::clone(&state), group);
    }

    // Ctrl-C / SIGTERM flips the token; sweepers and serve drain out.
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            signal_shutdown.cancel();
        }
    });

    tracing::info!("despacho listening on {addr}");
    let router = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}
