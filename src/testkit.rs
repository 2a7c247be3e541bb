//! Test doubles shared by the unit tests: a scripted exchange, a recording
//! alert sink and a harness wiring them to an in-memory ledger.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;

use crate::alerts::AlertSink;
use crate::db::{Position, StateStore};
use crate::engine::executor::ExecContext;
use crate::error::GatewayError;
use crate::events::Notifier;
use crate::gateway::Exchange;

// ─── MockExchange ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub method: &'static str,
    pub path:   String,
    pub body:   Value,
}

/// Serves scripted `data` arrays per path and records every call.
/// Unscripted GETs return an empty array; POSTs succeed unless rejected.
#[derive(Default)]
pub struct MockExchange {
    gets:       Mutex<HashMap<String, Value>>,
    rejections: Mutex<HashMap<String, (String, String)>>,
    holds:      Mutex<HashMap<String, Arc<Semaphore>>>,
    calls:      Mutex<Vec<Call>>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_get(self, path: &str, data: Value) -> Self {
        self.set_get(path, data);
        self
    }

    /// Re-script a GET mid-test.
    pub fn set_get(&self, path: &str, data: Value) {
        self.gets.lock().unwrap().insert(path.to_string(), data);
    }

    pub fn reject(self, path: &str, code: &str, msg: &str) -> Self {
        self.rejections
            .lock()
            .unwrap()
            .insert(path.to_string(), (code.to_string(), msg.to_string()));
        self
    }

    /// Orders to `path` are recorded at once but only acknowledged after a
    /// permit is added to the returned semaphore.
    pub fn hold(&self, path: &str) -> Arc<Semaphore> {
        let acks = Arc::new(Semaphore::new(0));
        self.holds.lock().unwrap().insert(path.to_string(), acks.clone());
        acks
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Mutating calls only.
    pub fn posts(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.method == "POST").collect()
    }

    pub fn posts_to(&self, path: &str) -> Vec<Call> {
        self.posts().into_iter().filter(|c| c.path == path).collect()
    }

    fn record(&self, method: &'static str, path: &str, body: Value) {
        self.calls.lock().unwrap().push(Call { method, path: path.to_string(), body });
    }

    fn rejection(&self, path: &str) -> Option<(String, String)> {
        self.rejections.lock().unwrap().get(path).cloned()
    }

    async fn await_ack(&self, path: &str) {
        let held = self.holds.lock().unwrap().get(path).cloned();
        if let Some(acks) = held {
            if let Ok(permit) = acks.acquire().await {
                permit.forget();
            }
        }
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<Vec<Value>, GatewayError> {
        let query: Map<String, Value> = params
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        self.record("GET", path, Value::Object(query));

        let scripted = self.gets.lock().unwrap().get(path).cloned();
        Ok(match scripted {
            Some(Value::Array(items)) => items,
            Some(other) => vec![other],
            None => Vec::new(),
        })
    }

    async fn post(&self, path: &str, payload: &Value) -> Result<Vec<Value>, GatewayError> {
        self.record("POST", path, payload.clone());
        tokio::task::yield_now().await;
        Ok(match self.rejection(path) {
            Some((code, msg)) => vec![json!({"sCode": code, "sMsg": msg})],
            None => vec![json!({"sCode": "0", "ordId": "1"})],
        })
    }

    async fn post_order(&self, path: &str, payload: &Value) -> Result<Vec<Value>, GatewayError> {
        self.record("POST", path, payload.clone());
        tokio::task::yield_now().await;
        self.await_ack(path).await;
        match self.rejection(path) {
            Some((code, msg)) => Err(GatewayError::OrderRejected { code, msg }),
            None => Ok(vec![json!({"sCode": "0", "ordId": "1"})]),
        }
    }
}

// ─── RecordingAlerts ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingAlerts {
    messages: Mutex<Vec<String>>,
}

impl RecordingAlerts {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.contains(needle))
    }
}

#[async_trait]
impl AlertSink for RecordingAlerts {
    async fn send(&self, text: &str) {
        self.messages.lock().unwrap().push(text.to_string());
    }
}

// ─── Harness ──────────────────────────────────────────────────────────────────

pub struct Harness {
    pub exchange: Arc<MockExchange>,
    pub store:    Arc<StateStore>,
    pub alerts:   Arc<RecordingAlerts>,
    pub ctx:      ExecContext,
}

impl Harness {
    pub async fn new(exchange: MockExchange) -> Self {
        let exchange = Arc::new(exchange);
        let store = Arc::new(StateStore::in_memory().await.unwrap());
        let alerts = Arc::new(RecordingAlerts::default());
        let notifier = Notifier::new(alerts.clone());
        let ctx = ExecContext::new(exchange.clone(), store.clone(), notifier);
        Self { exchange, store, alerts, ctx }
    }

    pub async fn with_position(self, spot: i64, perp: i64, loan: i64) -> Self {
        self.store.save(position(spot, perp, loan)).await.unwrap();
        self
    }

    pub async fn position(&self) -> Position {
        self.store.get().await.unwrap()
    }
}

pub fn position(spot: i64, perp: i64, loan: i64) -> Position {
    Position {
        spot: Decimal::from(spot),
        perp: Decimal::from(perp),
        loan: Decimal::from(loan),
    }
}
