//! # gateway::types
//!
//! Wire shapes shared by REST and the private WebSocket.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `code` / `sCode` value meaning success.
pub const SUCCESS_CODE: &str = "0";
/// Per-item code: order rejected by the matching engine.
pub const CODE_ORDER_REJECTED: &str = "51000";
/// Per-item code: insufficient balance.
pub const CODE_INSUFFICIENT_BALANCE: &str = "51008";

// ─── REST ─────────────────────────────────────────────────────────────────────

/// `{code, msg, data:[...]}` wrapper returned by every REST endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub msg:  String,
    #[serde(default)]
    pub data: Vec<Value>,
}

impl Envelope {
    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }
}

/// A per-item status found inside `data` that is not the success code.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRejection {
    pub code: String,
    pub msg:  String,
}

/// Collect every `data[i].sCode` that is present and not `"0"`.
pub fn item_rejections(data: &[Value]) -> Vec<ItemRejection> {
    data.iter()
        .filter_map(|item| {
            let code = item.get("sCode")?.as_str()?;
            (code != SUCCESS_CODE).then(|| ItemRejection {
                code: code.to_string(),
                msg:  text(item, "sMsg"),
            })
        })
        .collect()
}

// ─── WebSocket ────────────────────────────────────────────────────────────────

/// `{channel, instId?}`: identifies one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelArg {
    pub channel: String,
    #[serde(rename = "instId", default, skip_serializing_if = "Option::is_none")]
    pub inst_id: Option<String>,
}

impl ChannelArg {
    pub fn new(channel: impl Into<String>, inst_id: Option<&str>) -> Self {
        Self {
            channel: channel.into(),
            inst_id: inst_id.map(str::to_string),
        }
    }

    /// Does a pushed frame's `arg` belong to this subscription?
    /// A subscription without an instrument accepts every instrument on its channel.
    pub fn matches(&self, pushed: &ChannelArg) -> bool {
        self.channel == pushed.channel
            && match (&self.inst_id, &pushed.inst_id) {
                (Some(want), Some(got)) => want == got,
                (Some(_), None) | (None, _) => true,
            }
    }
}

/// Outbound `{op, args}` frame.
#[derive(Debug, Serialize)]
pub struct OpFrame<T: Serialize> {
    pub op:   &'static str,
    pub args: Vec<T>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginArg {
    pub api_key:    String,
    pub passphrase: String,
    pub timestamp:  String,
    pub sign:       String,
}

/// Server acknowledgement / error: `{event, code?, msg?, arg?}`.
#[derive(Debug, Clone, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default)]
    pub code:  Option<String>,
    #[serde(default)]
    pub msg:   Option<String>,
    #[serde(default)]
    pub arg:   Option<ChannelArg>,
}

/// Subscribed data push: `{arg:{channel,...}, data:[...]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct PushFrame {
    pub arg:  ChannelArg,
    #[serde(default)]
    pub data: Vec<Value>,
}

#[derive(Debug, Clone)]
pub enum Inbound {
    Event(EventFrame),
    Push(PushFrame),
    /// Keep-alive reply to our text `ping`.
    Pong,
}

/// Classify one inbound text frame.
pub fn parse_inbound(raw: &str) -> Result<Inbound, serde_json::Error> {
    if raw == "pong" {
        return Ok(Inbound::Pong);
    }
    let value: Value = serde_json::from_str(raw)?;
    if value.get("event").is_some() {
        serde_json::from_value(value).map(Inbound::Event)
    } else {
        serde_json::from_value(value).map(Inbound::Push)
    }
}

// ─── Field helpers ────────────────────────────────────────────────────────────

/// OKX sends numbers as strings, sometimes blank. `None` when missing or unparseable.
pub fn opt_num(item: &Value, key: &str) -> Option<Decimal> {
    match item.get(key)? {
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Decimal::from_str(s.trim())
            .or_else(|_| Decimal::from_scientific(s.trim()))
            .ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        _ => None,
    }
}

/// Lenient variant of [`opt_num`]: blank / missing / garbage → zero.
pub fn num(item: &Value, key: &str) -> Decimal {
    opt_num(item, key).unwrap_or_default()
}

pub fn text(item: &Value, key: &str) -> String {
    item.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn channel_without_instrument_matches_any_instrument() {
        let sub = ChannelArg::new("account", None);
        assert!(sub.matches(&ChannelArg::new("account", Some("BTC-USDT"))));
        assert!(sub.matches(&ChannelArg::new("account", None)));
        assert!(!sub.matches(&ChannelArg::new("positions", None)));
    }

    #[test]
    fn channel_with_instrument_filters_other_instruments() {
        let sub = ChannelArg::new("positions", Some("DOGE-USDT-SWAP"));
        assert!(sub.matches(&ChannelArg::new("positions", Some("DOGE-USDT-SWAP"))));
        assert!(!sub.matches(&ChannelArg::new("positions", Some("BTC-USDT-SWAP"))));
    }

    #[test]
    fn subscribe_frame_serializes_inst_id_only_when_present() {
        let frame = OpFrame {
            op:   "subscribe",
            args: vec![
                ChannelArg::new("account", None),
                ChannelArg::new("funding-rate", Some("DOGE-USDT-SWAP")),
            ],
        };
        let out = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            out,
            json!({"op":"subscribe","args":[
                {"channel":"account"},
                {"channel":"funding-rate","instId":"DOGE-USDT-SWAP"}
            ]})
        );
    }

    #[test]
    fn parses_login_ack_push_and_pong() {
        match parse_inbound(r#"{"event":"login","code":"0","msg":""}"#).unwrap() {
            Inbound::Event(ev) => {
                assert_eq!(ev.event, "login");
                assert_eq!(ev.code.as_deref(), Some("0"));
            }
            other => panic!("expected event, got {other:?}"),
        }

        match parse_inbound(
            r#"{"arg":{"channel":"funding-rate","instId":"DOGE-USDT-SWAP"},"data":[{"fundingRate":"0.0001"}]}"#,
        )
        .unwrap()
        {
            Inbound::Push(frame) => {
                assert_eq!(frame.arg.channel, "funding-rate");
                assert_eq!(num(&frame.data[0], "fundingRate"), Decimal::new(1, 4));
            }
            other => panic!("expected push, got {other:?}"),
        }

        assert!(matches!(parse_inbound("pong").unwrap(), Inbound::Pong));
        assert!(parse_inbound("not json").is_err());
    }

    #[test]
    fn lenient_numbers() {
        let item = json!({"a":"1.5","b":"","c":"x","d":2,"e":"1e-5"});
        assert_eq!(num(&item, "a"), Decimal::new(15, 1));
        assert_eq!(num(&item, "b"), Decimal::ZERO);
        assert_eq!(num(&item, "c"), Decimal::ZERO);
        assert_eq!(num(&item, "d"), Decimal::TWO);
        assert_eq!(num(&item, "e"), Decimal::new(1, 5));
        assert_eq!(opt_num(&item, "missing"), None);
    }

    #[test]
    fn item_rejections_skip_success_and_missing_codes() {
        let data = vec![
            json!({"sCode":"0","ordId":"1"}),
            json!({"sCode":"51008","sMsg":"Insufficient balance"}),
            json!({"instId":"DOGE-USDT-SWAP"}),
        ];
        assert_eq!(
            item_rejections(&data),
            vec![ItemRejection {
                code: CODE_INSUFFICIENT_BALANCE.into(),
                msg:  "Insufficient balance".into(),
            }]
        );
    }
}
