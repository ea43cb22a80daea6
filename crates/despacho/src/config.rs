// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

/// Chat-driven dispatcher for contested delivery routes.
#[derive(Debug, Clone, Parser)]
#[command(name = "despacho", version, about)]
pub struct BotConfig {
    /// Host to bind on.
    #[arg(long, default_value = "0.0.0.0", env = "DESPACHO_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9690, env = "DESPACHO_PORT")]
    pub port: u16,

    /// KV store address.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: String,

    /// Route/driver repository address.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Chat API bot token.
    #[arg(long, env = "BOT_TOKEN")]
    pub bot_token: String,

    /// Chat API base URL (overridden in tests).
    #[arg(long, default_value = "https://api.telegram.org", env = "CHAT_API_BASE")]
    pub chat_api_base: String,

    /// Session idle expiry in seconds.
    #[arg(long, default_value_t = 10800, env = "STATE_TTL")]
    pub state_ttl_secs: u64,

    /// Active-slot service window in seconds.
    #[arg(long, default_value_t = 30, env = "QUEUE_TTL")]
    pub queue_ttl_secs: u64,

    /// Deferral before a blocklisted driver is served, in seconds.
    #[arg(long, default_value_t = 120, env = "BLOCKLIST_WAIT_SECONDS")]
    pub blocklist_wait_secs: u64,

    /// Shared secret for the admin sync handshake.
    #[arg(long, env = "SYNC_PASSWORD")]
    pub sync_password: String,

    /// Background sweeper cadence in milliseconds.
    #[arg(long, default_value_t = 5000, env = "DESPACHO_SWEEP_MS")]
    pub sweep_interval_ms: u64,

    /// Chat ids allowed to run admin commands. Empty allows any chat
    /// (development only).
    #[arg(long, value_delimiter = ',', env = "DESPACHO_ADMIN_CHATS")]
    pub admin_chat_ids: Vec<i64>,
}

impl BotConfig {
    pub fn state_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.state_ttl_secs)
    }

    pub fn queue_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.queue_ttl_secs)
    }

    pub fn blocklist_wait(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.blocklist_wait_secs)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn is_admin_chat(&self, chat_id: i64) -> bool {
        self.admin_chat_ids.is_empty() || self.admin_chat_ids.contains(&chat_id)
    }
}
