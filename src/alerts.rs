//! # alerts
//!
//! Operator alert sinks. Delivery is best effort: a failed send is logged at
//! warn and swallowed so alerting can never break a trading path.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::config::Config;

/// Telegram rejects messages longer than 4096 chars.
const MAX_MESSAGE_CHARS: usize = 4000;

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, text: &str);
}

// ─── Telegram ─────────────────────────────────────────────────────────────────

pub struct TelegramSink {
    client:  reqwest::Client,
    url:     String,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(token: &str, chat_id: &str) -> Self {
        Self {
            client:  reqwest::Client::new(),
            url:     format!("https://api.telegram.org/bot{token}/sendMessage"),
            chat_id: chat_id.to_string(),
        }
    }
}

#[async_trait]
impl AlertSink for TelegramSink {
    async fn send(&self, text: &str) {
        let body = json!({
            "chat_id":    self.chat_id,
            "text":       truncate(text),
            "parse_mode": "HTML",
        });

        let result = self
            .client
            .post(&self.url)
            .json(&body)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .and_then(|r| r.error_for_status());

        if let Err(e) = result {
            warn!(error = %e, "Telegram alert not delivered");
        }
    }
}

/// Used when no sink is configured. Alerts still reach the log and the
/// dashboard feed through the notifier.
pub struct NullSink;

#[async_trait]
impl AlertSink for NullSink {
    async fn send(&self, _text: &str) {}
}

pub fn sink_from_config(config: &Config) -> Arc<dyn AlertSink> {
    match &config.telegram {
        Some((token, chat)) => {
            info!(chat = %chat, "📨 Telegram alerts enabled");
            Arc::new(TelegramSink::new(token, chat))
        }
        None => {
            warn!("TG_TOKEN / TG_CHAT not set — alerts go to the log only");
            Arc::new(NullSink)
        }
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(MAX_MESSAGE_CHARS).collect()
}
