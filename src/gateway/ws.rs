//! # gateway::ws
//!
//! **Private WebSocket**: one background task owns the socket and the
//! reconnect state machine; consumers hold a [`Subscription`] and never see
//! the churn underneath.
//!
//! ```text
//!  DISCONNECTED ─▶ CONNECTING ─▶ AUTHENTICATING ─▶ SUBSCRIBED ─▶ STREAMING
//!        ▲                                                           │
//!        │          read timeout / close / protocol error            │
//!        └──────────── RECOVERING (backoff 1s → 2s → … → 60s) ◀──────┘
//! ```
//!
//! Every reconnect replays login and the full subscription set: the exchange
//! forgets subscriptions when a socket goes away.

use std::{sync::Arc, time::Duration};

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Serialize;
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
    time::{interval_at, sleep, sleep_until, timeout, timeout_at, Instant},
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::signer::{self, Signer, WS_VERIFY_PATH};
use super::types::{parse_inbound, ChannelArg, Inbound, LoginArg, OpFrame, PushFrame, SUCCESS_CODE};
use crate::config::Credentials;
use crate::error::GatewayError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Frames buffered per subscription before new ones are dropped.
const ROUTE_CAPACITY: usize = 256;

// ─── Settings ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub url:             String,
    pub connect_timeout: Duration,
    /// Wait for the login acknowledgement.
    pub login_timeout:   Duration,
    /// Inactivity that declares the connection stale.
    pub read_timeout:    Duration,
    /// Text `ping` keep-alive cadence.
    pub ping_interval:   Duration,
    pub backoff_initial: Duration,
    pub backoff_max:     Duration,
}

impl StreamSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url:             url.into(),
            connect_timeout: Duration::from_secs(10),
            login_timeout:   Duration::from_secs(5),
            read_timeout:    Duration::from_secs(30),
            ping_interval:   Duration::from_secs(15),
            backoff_initial: Duration::from_secs(1),
            backoff_max:     Duration::from_secs(60),
        }
    }
}

// ─── Backoff ──────────────────────────────────────────────────────────────────

/// Exponential reconnect delay: the Nth consecutive failure waits
/// `min(initial · 2^(N-1), max)`; [`reset`](Backoff::reset) after any good frame.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max:     Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max, current: initial }
    }

    /// Delay for this failure; doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

// ─── Connection State ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Disconnected,
    Connecting,
    Authenticating,
    Subscribed,
    Streaming,
    Recovering,
}

/// In-memory only; rebuilt on every reconnect. Published through a `watch`
/// channel for the status route.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionState {
    pub phase:           Phase,
    pub authenticated:   bool,
    /// Delay the next failure will wait.
    pub reconnect_delay: Duration,
    pub reconnects:      u64,
}

// ─── Subscription ─────────────────────────────────────────────────────────────

/// Consumer end of one channel. Yields only frames for its own `arg`.
#[derive(Debug)]
pub struct Subscription {
    arg: ChannelArg,
    rx:  mpsc::Receiver<PushFrame>,
}

impl Subscription {
    pub fn new(arg: ChannelArg, rx: mpsc::Receiver<PushFrame>) -> Self {
        Self { arg, rx }
    }

    pub fn arg(&self) -> &ChannelArg {
        &self.arg
    }

    /// Next frame; `None` only after the stream was shut down.
    pub async fn next(&mut self) -> Option<PushFrame> {
        self.rx.recv().await
    }
}

#[derive(Debug)]
struct Route {
    arg: ChannelArg,
    tx:  mpsc::Sender<PushFrame>,
}

#[derive(Debug)]
enum Command {
    Subscribe(Route),
    Shutdown,
}

enum SessionEnd {
    Shutdown,
}

// ─── Handle ───────────────────────────────────────────────────────────────────

/// Handle to the connection task. The task starts on the first `subscribe`.
pub struct PrivateStream {
    cmd_tx:   mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    pending:  Mutex<Option<Connection>>,
    task:     Mutex<Option<JoinHandle<()>>>,
}

impl PrivateStream {
    pub fn new(settings: StreamSettings, creds: Arc<Credentials>, signer: Arc<Signer>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let backoff = Backoff::new(settings.backoff_initial, settings.backoff_max);
        let (state_tx, state_rx) = watch::channel(ConnectionState {
            phase:           Phase::Disconnected,
            authenticated:   false,
            reconnect_delay: settings.backoff_initial,
            reconnects:      0,
        });

        let connection = Connection {
            settings,
            creds,
            signer,
            routes: Vec::new(),
            cmd_rx,
            state_tx,
            backoff,
        };

        Self {
            cmd_tx,
            state_rx,
            pending: Mutex::new(Some(connection)),
            task: Mutex::new(None),
        }
    }

    /// Register interest in `arg`. The subscription is added to the replay set
    /// and survives every reconnect.
    pub async fn subscribe(&self, arg: ChannelArg) -> Subscription {
        let (tx, rx) = mpsc::channel(ROUTE_CAPACITY);
        if self
            .cmd_tx
            .send(Command::Subscribe(Route { arg: arg.clone(), tx }))
            .is_err()
        {
            warn!(channel = %arg.channel, "WS task already stopped — subscription will stay empty");
        }
        self.ensure_started().await;
        Subscription::new(arg, rx)
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Stop the task and close the socket. Open subscriptions then yield `None`.
    pub async fn close(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "WS task ended abnormally");
            }
        }
        self.pending.lock().await.take();
    }

    async fn ensure_started(&self) {
        let connection = self.pending.lock().await.take();
        if let Some(connection) = connection {
            let handle = tokio::spawn(connection.run());
            *self.task.lock().await = Some(handle);
        }
    }
}

// ─── Connection Task ──────────────────────────────────────────────────────────

struct Connection {
    settings: StreamSettings,
    creds:    Arc<Credentials>,
    signer:   Arc<Signer>,
    routes:   Vec<Route>,
    cmd_rx:   mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    backoff:  Backoff,
}

impl Connection {
    async fn run(mut self) {
        loop {
            if self.drain_commands() {
                break;
            }

            match self.session().await {
                Ok(SessionEnd::Shutdown) => break,
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    self.state_tx.send_modify(|s| {
                        s.phase = Phase::Recovering;
                        s.authenticated = false;
                        s.reconnect_delay = self.backoff.current;
                        s.reconnects += 1;
                    });
                    warn!(error = %e, delay_ms = delay.as_millis() as u64, "⚠️ [WS] Stream failed — reconnecting");

                    if self.wait_recovering(delay).await {
                        break;
                    }
                }
            }
        }

        self.state_tx.send_modify(|s| {
            s.phase = Phase::Disconnected;
            s.authenticated = false;
        });
        info!("🔌 [WS] Private stream stopped");
    }

    /// Absorb queued subscribe commands. `true` when shutdown was requested.
    fn drain_commands(&mut self) -> bool {
        loop {
            match self.cmd_rx.try_recv() {
                Ok(Command::Subscribe(route)) => self.routes.push(route),
                Ok(Command::Shutdown) => return true,
                Err(mpsc::error::TryRecvError::Empty) => return false,
                Err(mpsc::error::TryRecvError::Disconnected) => return true,
            }
        }
    }

    /// Sleep out the backoff while still accepting commands.
    async fn wait_recovering(&mut self, delay: Duration) -> bool {
        let wake = sleep(delay);
        tokio::pin!(wake);
        loop {
            tokio::select! {
                _ = &mut wake => return false,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Subscribe(route)) => self.routes.push(route),
                    Some(Command::Shutdown) | None => return true,
                },
            }
        }
    }

    fn set_phase(&self, phase: Phase) {
        self.state_tx.send_modify(|s| s.phase = phase);
    }

    async fn session(&mut self) -> Result<SessionEnd, GatewayError> {
        // ── CONNECTING ───────────────────────────────────────────────────────
        self.set_phase(Phase::Connecting);
        let (socket, _) = timeout(
            self.settings.connect_timeout,
            connect_async(self.settings.url.as_str()),
        )
        .await
        .map_err(|_| GatewayError::StaleConnection("connect timed out"))??;
        info!(url = %self.settings.url, "🔌 [WS] Connected");
        let (mut sink, mut source) = socket.split();

        // ── AUTHENTICATING ───────────────────────────────────────────────────
        self.set_phase(Phase::Authenticating);
        self.login(&mut sink, &mut source).await?;
        self.state_tx.send_modify(|s| s.authenticated = true);

        // ── SUBSCRIBED ───────────────────────────────────────────────────────
        self.routes.retain(|r| !r.tx.is_closed());
        let replay = distinct_args(&self.routes);
        if !replay.is_empty() {
            send_json(&mut sink, &OpFrame { op: "subscribe", args: replay.clone() }).await?;
            info!(channels = ?replay.iter().map(|a| a.channel.as_str()).collect::<Vec<_>>(), "📡 [WS] Subscriptions replayed");
        }
        self.set_phase(Phase::Subscribed);

        // ── STREAMING ────────────────────────────────────────────────────────
        self.set_phase(Phase::Streaming);
        let mut last_activity = Instant::now();
        let mut ping = interval_at(
            Instant::now() + self.settings.ping_interval,
            self.settings.ping_interval,
        );

        loop {
            tokio::select! {
                frame = source.next() => {
                    let msg = match frame {
                        Some(Ok(msg)) => msg,
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(GatewayError::StaleConnection("socket closed")),
                    };
                    last_activity = Instant::now();
                    self.backoff.reset();
                    self.handle_message(msg)?;
                }

                _ = sleep_until(last_activity + self.settings.read_timeout) => {
                    return Err(GatewayError::StaleConnection("read timeout"));
                }

                _ = ping.tick() => {
                    sink.send(Message::Text("ping".to_string())).await?;
                }

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Subscribe(route)) => {
                        let fresh = !self.routes.iter().any(|r| r.arg == route.arg);
                        if fresh {
                            send_json(&mut sink, &OpFrame { op: "subscribe", args: vec![route.arg.clone()] }).await?;
                            info!(channel = %route.arg.channel, inst = ?route.arg.inst_id, "📡 [WS] Subscribed");
                        }
                        self.routes.push(route);
                    }
                    Some(Command::Shutdown) | None => {
                        let _ = sink.close().await;
                        return Ok(SessionEnd::Shutdown);
                    }
                },
            }
        }
    }

    async fn login(&self, sink: &mut WsSink, source: &mut WsSource) -> Result<(), GatewayError> {
        let frame = login_frame(&self.creds, &self.signer, &signer::timestamp());
        send_json(sink, &frame).await?;

        let deadline = Instant::now() + self.settings.login_timeout;
        loop {
            let next = timeout_at(deadline, source.next())
                .await
                .map_err(|_| GatewayError::LoginFailed("no login acknowledgement".into()))?;

            let text = match next {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => {
                    return Err(GatewayError::StaleConnection("closed during login"))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            };

            match parse_inbound(&text) {
                Ok(Inbound::Event(ev)) if ev.event == "login" => {
                    if ev.code.as_deref() == Some(SUCCESS_CODE) {
                        info!("🔐 [WS] Logged in");
                        return Ok(());
                    }
                    error!(code = ?ev.code, msg = ?ev.msg, "❌ [WS] Login refused");
                    return Err(GatewayError::LoginFailed(ev.msg.unwrap_or_default()));
                }
                Ok(Inbound::Event(ev)) if ev.event == "error" => {
                    error!(code = ?ev.code, msg = ?ev.msg, "❌ [WS] Login error");
                    return Err(GatewayError::LoginFailed(ev.msg.unwrap_or_default()));
                }
                _ => debug!(frame = %text, "Ignoring frame while authenticating"),
            }
        }
    }

    fn handle_message(&mut self, msg: Message) -> Result<(), GatewayError> {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => return Err(GatewayError::StaleConnection("server closed")),
            _ => return Ok(()),
        };

        match parse_inbound(&text) {
            Ok(Inbound::Push(frame)) => dispatch(&mut self.routes, &frame),
            Ok(Inbound::Event(ev)) if ev.event == "error" => {
                error!(code = ?ev.code, msg = ?ev.msg, "❌ [WS] Server error event");
            }
            Ok(Inbound::Event(ev)) => {
                debug!(event = %ev.event, arg = ?ev.arg, "WS event");
            }
            Ok(Inbound::Pong) => {}
            Err(e) => {
                let head: String = text.chars().take(100).collect();
                error!(error = %e, raw = %head, "WS frame is not valid JSON — skipped");
            }
        }
        Ok(())
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn login_frame(creds: &Credentials, signer: &Signer, timestamp: &str) -> OpFrame<LoginArg> {
    OpFrame {
        op:   "login",
        args: vec![LoginArg {
            api_key:    creds.key.clone(),
            passphrase: creds.passphrase.clone(),
            timestamp:  timestamp.to_string(),
            sign:       signer.sign(timestamp, "GET", WS_VERIFY_PATH, ""),
        }],
    }
}

async fn send_json<T: Serialize>(sink: &mut WsSink, frame: &T) -> Result<(), GatewayError> {
    let text = serde_json::to_string(frame)?;
    sink.send(Message::Text(text)).await?;
    Ok(())
}

fn distinct_args(routes: &[Route]) -> Vec<ChannelArg> {
    let mut args: Vec<ChannelArg> = Vec::new();
    for route in routes {
        if !args.contains(&route.arg) {
            args.push(route.arg.clone());
        }
    }
    args
}

/// Fan a pushed frame out to every matching subscription. Closed consumers are
/// pruned; a full buffer drops the frame for that consumer only.
fn dispatch(routes: &mut Vec<Route>, frame: &PushFrame) {
    routes.retain(|route| {
        if !route.arg.matches(&frame.arg) {
            return !route.tx.is_closed();
        }
        match route.tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(channel = %route.arg.channel, "Subscriber lagging — frame dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use tokio::net::TcpListener;

    #[test]
    fn backoff_doubles_to_the_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        let delays: Vec<u64> = (0..9).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60, 60]);
    }

    #[test]
    fn nth_delay_matches_closed_form() {
        for n in 1..=10u32 {
            let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
            let mut nth = Duration::ZERO;
            for _ in 0..n {
                nth = backoff.next_delay();
            }
            let expected = 2u64.pow(n - 1).min(60);
            assert_eq!(nth.as_secs(), expected, "failure #{n}");
        }
    }

    #[test]
    fn success_resets_backoff() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn login_frame_is_signed_over_verify_path() {
        let creds = Credentials {
            key:        "k".into(),
            secret:     "secret".into(),
            passphrase: "p".into(),
            simulated:  true,
        };
        let signer = Signer::new(&creds.secret).unwrap();
        let frame = login_frame(&creds, &signer, "2020-12-08T09:08:57.715Z");
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({"op":"login","args":[{
                "apiKey":"k",
                "passphrase":"p",
                "timestamp":"2020-12-08T09:08:57.715Z",
                "sign":"LSLbxnPWM7dl4oMFFC9S1qW7yJS7ab8VgnW7y7FoEiQ="
            }]})
        );
    }

    #[tokio::test]
    async fn dispatch_routes_by_channel_and_prunes_closed() {
        let (funding_tx, mut funding_rx) = mpsc::channel(4);
        let (account_tx, mut account_rx) = mpsc::channel(4);
        let (gone_tx, gone_rx) = mpsc::channel(4);
        drop(gone_rx);

        let mut routes = vec![
            Route { arg: ChannelArg::new("funding-rate", Some("DOGE-USDT-SWAP")), tx: funding_tx },
            Route { arg: ChannelArg::new("account", None), tx: account_tx },
            Route { arg: ChannelArg::new("account", None), tx: gone_tx },
        ];

        let frame: PushFrame = serde_json::from_value(json!({
            "arg": {"channel":"account"},
            "data": [{"riskRatio":"0.3"}]
        }))
        .unwrap();
        dispatch(&mut routes, &frame);

        assert_eq!(routes.len(), 2);
        assert_eq!(account_rx.recv().await.unwrap().data[0]["riskRatio"], "0.3");
        assert!(funding_rx.try_recv().is_err());
    }

    #[test]
    fn replay_set_is_deduplicated() {
        let (tx, _rx) = mpsc::channel(1);
        let routes = vec![
            Route { arg: ChannelArg::new("account", None), tx: tx.clone() },
            Route { arg: ChannelArg::new("account", None), tx: tx.clone() },
            Route { arg: ChannelArg::new("positions", Some("X")), tx },
        ];
        assert_eq!(distinct_args(&routes).len(), 2);
    }

    // ── Reconnect against a local server ─────────────────────────────────────

    async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> String {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(t))) if t != "ping" => return t,
                Some(Ok(_)) => continue,
                other => panic!("server expected a text frame, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn reconnect_replays_login_and_subscriptions() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let mut seen = Vec::new();
            let mut keep_alive = None;
            for round in 0..2 {
                let (tcp, _) = listener.accept().await.unwrap();
                let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

                let login: serde_json::Value = serde_json::from_str(&next_text(&mut ws).await).unwrap();
                ws.send(Message::Text(r#"{"event":"login","code":"0","msg":""}"#.into()))
                    .await
                    .unwrap();
                let subscribe: serde_json::Value = serde_json::from_str(&next_text(&mut ws).await).unwrap();
                seen.push((login, subscribe));

                let push = format!(
                    r#"{{"arg":{{"channel":"account"}},"data":[{{"riskRatio":"0.{round}"}}]}}"#
                );
                ws.send(Message::Text(push)).await.unwrap();

                if round == 0 {
                    drop(ws);
                } else {
                    keep_alive = Some(ws);
                }
            }
            (seen, keep_alive)
        });

        let creds = Arc::new(Credentials {
            key:        "k".into(),
            secret:     "s".into(),
            passphrase: "p".into(),
            simulated:  true,
        });
        let signer = Arc::new(Signer::new("s").unwrap());
        let mut settings = StreamSettings::new(format!("ws://{addr}"));
        settings.backoff_initial = Duration::from_millis(10);
        settings.backoff_max = Duration::from_millis(50);
        settings.ping_interval = Duration::from_secs(60);

        let stream = PrivateStream::new(settings, creds, signer);
        let mut sub = stream.subscribe(ChannelArg::new("account", None)).await;

        let first = timeout(Duration::from_secs(5), sub.next()).await.unwrap().unwrap();
        let second = timeout(Duration::from_secs(5), sub.next()).await.unwrap().unwrap();
        assert_eq!(first.data[0]["riskRatio"], "0.0");
        assert_eq!(second.data[0]["riskRatio"], "0.1");
        assert!(stream.state().borrow().reconnects >= 1);

        let (seen, _keep_alive) = server.await.unwrap();
        assert_eq!(seen.len(), 2);
        for (login, subscribe) in &seen {
            assert_eq!(login["op"], "login");
            assert_eq!(login["args"][0]["apiKey"], "k");
            assert_eq!(subscribe["op"], "subscribe");
            assert_eq!(subscribe["args"][0]["channel"], "account");
        }

        stream.close().await;
        assert_eq!(stream.state().borrow().phase, Phase::Disconnected);
        assert!(sub.next().await.is_none());
    }

    // ── Failed sessions are retried ──────────────────────────────────────────

    #[derive(Clone, Copy)]
    enum Script {
        /// Accept the login, then never send another frame.
        GoQuiet,
        RefuseLogin,
        IgnoreLogin,
    }

    /// Accepts any number of connections, playing `script` on each.
    /// Returns the url and a count of accepted connections.
    async fn scripted_server(script: Script) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = accepted.clone();
        tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((tcp, _)) = listener.accept().await {
                let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else { continue };
                counter.fetch_add(1, Ordering::SeqCst);

                let _login = next_text(&mut ws).await;
                let reply = match script {
                    Script::GoQuiet => Some(r#"{"event":"login","code":"0","msg":""}"#),
                    Script::RefuseLogin => Some(r#"{"event":"login","code":"60009","msg":"Login failed."}"#),
                    Script::IgnoreLogin => None,
                };
                if let Some(reply) = reply {
                    let _ = ws.send(Message::Text(reply.into())).await;
                }
                open.push(ws);
            }
        });

        (url, accepted)
    }

    fn quick_settings(url: String) -> StreamSettings {
        let mut settings = StreamSettings::new(url);
        settings.login_timeout = Duration::from_millis(200);
        settings.read_timeout = Duration::from_millis(200);
        settings.ping_interval = Duration::from_secs(60);
        settings.backoff_initial = Duration::from_millis(10);
        settings.backoff_max = Duration::from_millis(50);
        settings
    }

    async fn assert_reconnects(script: Script) {
        let (url, accepted) = scripted_server(script).await;
        let creds = Arc::new(Credentials {
            key:        "k".into(),
            secret:     "s".into(),
            passphrase: "p".into(),
            simulated:  true,
        });
        let signer = Arc::new(Signer::new("s").unwrap());

        let stream = PrivateStream::new(quick_settings(url), creds, signer);
        let _sub = stream.subscribe(ChannelArg::new("account", None)).await;

        timeout(Duration::from_secs(5), async {
            while accepted.load(Ordering::SeqCst) < 2 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("no second connection");

        assert!(stream.state().borrow().reconnects >= 1);
        stream.close().await;
        assert_eq!(stream.state().borrow().phase, Phase::Disconnected);
    }

    #[tokio::test]
    async fn silent_stream_times_out_and_reconnects() {
        assert_reconnects(Script::GoQuiet).await;
    }

    #[tokio::test]
    async fn refused_login_reconnects() {
        assert_reconnects(Script::RefuseLogin).await;
    }

    #[tokio::test]
    async fn unanswered_login_reconnects() {
        assert_reconnects(Script::IgnoreLogin).await;
    }
}
