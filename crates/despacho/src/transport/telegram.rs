// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound chat delivery.
//!
//! Send failures are transient by policy: they are logged and never block a
//! state transition; the driver can resend, and timers guarantee eventual
//! progress.

use std::future::Future;
use std::pin::Pin;

use reqwest::Client;
use serde::Serialize;

pub type SendFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

pub trait ChatSender: Send + Sync + 'static {
    fn send<'a>(&'a self, chat_id: i64, text: &'a str) -> SendFuture<'a>;
}

#[derive(Debug, Serialize)]
struct SendMessageBody<'a> {
    chat_id: i64,
    text: &'a str,
}

/// Telegram Bot API sender.
pub struct TelegramSender {
    client: Client,
    base_url: String,
    token: String,
}

impl TelegramSender {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, base_url: base_url.into(), token: token.into() }
    }

    fn url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.base_url, self.token)
    }
}

impl ChatSender for TelegramSender {
    fn send<'a>(&'a self, chat_id: i64, text: &'a str) -> SendFuture<'a> {
        Box::pin(async move {
            let body = SendMessageBody { chat_id, text };
            self.client
                .post(self.url())
                .json(&body)
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        })
    }
}
