//! # gateway
//!
//! **Exchange Transport**: one signed REST client plus one private
//! WebSocket connection, shared by every component of the bot.
//!
//! | Call                    | Non-2xx        | `code != "0"` / `sCode != "0"`        |
//! |-------------------------|----------------|----------------------------------------|
//! | `get` / `post`          | `Remote` error | logged as `API_ERROR`, alerted, data returned |
//! | `post_order`            | `Remote` error | `OrderRejected`                        |
//! | `subscribe`             | recovered by the connection task (reconnect + backoff) |

pub mod exchange;
pub mod signer;
pub mod types;
pub mod ws;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE},
    Method, Url,
};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::config::{Config, Credentials};
use crate::error::{AuthError, GatewayError};
use crate::events::{BotEvent, Notifier};

pub use exchange::Exchange;
use signer::Signer;
use types::{item_rejections, ChannelArg, Envelope, CODE_INSUFFICIENT_BALANCE, CODE_ORDER_REJECTED};
use ws::{ConnectionState, PrivateStream, StreamSettings, Subscription};

const REST_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest slice of an error body kept in `GatewayError::Remote`.
const ERROR_BODY_CHARS: usize = 200;

// ─── Gateway ──────────────────────────────────────────────────────────────────

pub struct Gateway {
    creds:    Arc<Credentials>,
    signer:   Arc<Signer>,
    http:     reqwest::Client,
    base_url: String,
    notifier: Notifier,
    stream:   PrivateStream,
}

impl Gateway {
    pub fn new(config: &Config, notifier: Notifier) -> Result<Self, GatewayError> {
        let creds = Arc::new(config.credentials.clone());
        let signer = Arc::new(Signer::new(&creds.secret)?);
        let http = reqwest::Client::builder().timeout(REST_TIMEOUT).build()?;
        let stream = PrivateStream::new(
            StreamSettings::new(config.ws_url.clone()),
            creds.clone(),
            signer.clone(),
        );

        Ok(Self {
            creds,
            signer,
            http,
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            notifier,
            stream,
        })
    }

    // ── Private stream ────────────────────────────────────────────────────────

    /// Subscribe to a private channel. The returned handle keeps yielding
    /// across reconnects; frames for other channels never reach it.
    pub async fn subscribe(&self, channel: &str, inst_id: Option<&str>) -> Subscription {
        self.stream.subscribe(ChannelArg::new(channel, inst_id)).await
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.stream.state()
    }

    /// Close the WebSocket and stop its task.
    pub async fn close(&self) {
        self.stream.close().await;
    }

    // ── REST ──────────────────────────────────────────────────────────────────

    fn auth_headers(&self, method: &str, path: &str, body: &str) -> Result<HeaderMap, GatewayError> {
        let ts = signer::timestamp();
        let sign = self.signer.sign(&ts, method, path, body);

        let mut headers = HeaderMap::new();
        headers.insert("ok-access-key", header_value(&self.creds.key)?);
        headers.insert("ok-access-sign", header_value(&sign)?);
        headers.insert("ok-access-timestamp", header_value(&ts)?);
        headers.insert("ok-access-passphrase", header_value(&self.creds.passphrase)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if self.creds.simulated {
            headers.insert(
                HeaderName::from_static("x-simulated-trading"),
                HeaderValue::from_static("1"),
            );
        }
        Ok(headers)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Envelope, GatewayError> {
        let url = build_url(&self.base_url, path, params)?;
        let signed = signed_path(&url);
        let body_text = match body {
            Some(b) => serde_json::to_string(b)?,
            None => String::new(),
        };
        let headers = self.auth_headers(method.as_str(), &signed, &body_text)?;

        debug!(method = %method, path = %signed, "→ [REST]");

        let mut req = self.http.request(method, url).headers(headers);
        if body.is_some() {
            req = req.body(body_text);
        }

        // ── HTTP POST / GET ───────────────────────────────────────────────────
        let response = req.send().await.map_err(|e| {
            error!(error = %e, path, "Exchange unreachable");
            GatewayError::Transport(e)
        })?;

        // ── HTTP Status ───────────────────────────────────────────────────────
        let status = response.status();
        let raw = response.text().await?;
        if !status.is_success() {
            let body: String = raw.chars().take(ERROR_BODY_CHARS).collect();
            error!(http_status = %status, body = %body, path, "Exchange returned HTTP error");
            return Err(GatewayError::Remote { status: status.as_u16(), body });
        }

        // ── Parse Envelope ────────────────────────────────────────────────────
        serde_json::from_str(&raw).map_err(|e| {
            error!(error = %e, path, "Exchange response parse failed");
            GatewayError::Malformed(e)
        })
    }

    /// Log and alert on application-level rejections without raising.
    async fn report_rejections(&self, path: &str, envelope: &Envelope) {
        if !envelope.is_success() {
            warn!(path, code = %envelope.code, msg = %envelope.msg, "API_ERROR");
        }

        for item in item_rejections(&envelope.data) {
            match item.code.as_str() {
                CODE_ORDER_REJECTED => warn!(path, msg = %item.msg, "ORDER_REJECTED"),
                CODE_INSUFFICIENT_BALANCE => warn!(path, msg = %item.msg, "INSUFFICIENT_BALANCE"),
                _ => {
                    warn!(path, code = %item.code, msg = %item.msg, "Item rejected");
                    continue;
                }
            }
            self.notifier
                .emit(BotEvent::ExchangeRejected {
                    path: path.to_string(),
                    code: item.code,
                    msg:  item.msg,
                })
                .await;
        }
    }
}

#[async_trait]
impl Exchange for Gateway {
    async fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<Vec<Value>, GatewayError> {
        let envelope = self.request(Method::GET, path, params, None).await?;
        self.report_rejections(path, &envelope).await;
        Ok(envelope.data)
    }

    async fn post(&self, path: &str, payload: &Value) -> Result<Vec<Value>, GatewayError> {
        let envelope = self.request(Method::POST, path, &[], Some(payload)).await?;
        self.report_rejections(path, &envelope).await;
        Ok(envelope.data)
    }

    async fn post_order(&self, path: &str, payload: &Value) -> Result<Vec<Value>, GatewayError> {
        let envelope = self.request(Method::POST, path, &[], Some(payload)).await?;
        self.report_rejections(path, &envelope).await;
        check_order_ack(envelope).map_err(|e| {
            warn!(path, error = %e, "❌ [REST] Mutating call rejected");
            e
        })
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn header_value(raw: &str) -> Result<HeaderValue, GatewayError> {
    HeaderValue::from_str(raw)
        .map_err(|_| AuthError::Invalid("credential contains characters not allowed in headers".into()).into())
}

fn build_url(base: &str, path: &str, params: &[(&str, &str)]) -> Result<Url, GatewayError> {
    let raw = format!("{base}{path}");
    let parsed = if params.is_empty() {
        Url::parse(&raw)
    } else {
        Url::parse_with_params(&raw, params)
    };
    parsed.map_err(|e| GatewayError::InvalidRequest(format!("{raw}: {e}")))
}

/// Path plus query exactly as it goes on the wire; this is what gets signed.
fn signed_path(url: &Url) -> String {
    match url.query() {
        Some(q) if !q.is_empty() => format!("{}?{q}", url.path()),
        _ => url.path().to_string(),
    }
}

/// Strict acceptance for mutating calls: success envelope, non-empty `data`,
/// and every item's `sCode` equal to `"0"`.
pub fn check_order_ack(envelope: Envelope) -> Result<Vec<Value>, GatewayError> {
    if let Some(item) = item_rejections(&envelope.data).into_iter().next() {
        return Err(GatewayError::OrderRejected { code: item.code, msg: item.msg });
    }
    if !envelope.is_success() {
        return Err(GatewayError::OrderRejected { code: envelope.code, msg: envelope.msg });
    }
    if envelope.data.is_empty() {
        return Err(GatewayError::OrderRejected {
            code: "EMPTY".into(),
            msg:  "acknowledgement carried no data".into(),
        });
    }
    Ok(envelope.data)
}
