//! # carrybot: Leveraged Cash-and-Carry Keeper
//!
//! ```text
//!                       ┌──────────────────── Gateway ───────────────────┐
//!   OKX private WS ───▶ │ PrivateStream (login · subscribe · reconnect)  │──▶ funding / account / positions
//!   OKX REST      ◀───▶ │ signed request · post_order                   │
//!                       └───────────────────────┬────────────────────────┘
//!                                               │ Exchange
//!   ┌──────────┐  unwind  ┌──────────┐  apply   ▼
//!   │ Monitors │ ───────▶ │ Executors│ ──────▶ StateStore (SQLite ledger)
//!   └──────────┘          └──────────┘
//!   ┌────────────┐  short / close  ▲
//!   │ Rebalancer │ ────────────────┘
//!   └────────────┘
//!   Notifier ──▶ Telegram · GET /ws/events        GET /metrics · GET /api/status
//! ```
//!
//! ## Environment Variables
//!
//! | Variable        | Default              | Description                    |
//! |-----------------|----------------------|--------------------------------|
//! | `OKX_KEY` / `OKX_SECRET` / `OKX_PASS` | required | API credentials     |
//! | `OKX_SIM`       | `1`                  | simulated-trading header       |
//! | `PAIR_SPOT`     | `DOGE-USDT`          | long leg                       |
//! | `PAIR_SWAP`     | `DOGE-USDT-SWAP`     | short leg                      |
//! | `DATABASE_URL`  | `sqlite://state.db`  | ledger                         |
//! | `BIND_ADDR`     | `0.0.0.0:9090`       | status / metrics server        |
//! | `RUST_LOG`      | `carrybot=debug`     | tracing filter                 |
//!
//! Thresholds and cadences: see [`config`].

use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Router};
use chrono::Utc;
use tokio::task::JoinSet;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod alerts;
mod config;
mod db;
mod engine;
mod error;
mod events;
mod gateway;
mod metrics;
mod routes;
mod state;
#[cfg(test)]
mod testkit;

use config::Config;
use db::StateStore;
use engine::{
    bootstrap::{init_positions, Bootstrap, Legs},
    borrow::BorrowExecutor,
    executor::ExecContext,
    monitors::Monitors,
    perp::PerpExecutor,
    rebalance::Rebalancer,
    spot::SpotExecutor,
    unwind::Unwinder,
};
use events::{BotEvent, Notifier};
use gateway::Gateway;
use metrics::Metrics;
use routes::{monitor::ws_events, status::{get_status, metrics as get_metrics}};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Load .env ──────────────────────────────────────────────────────────
    dotenvy::dotenv().ok();

    // ── 2. Structured logging ─────────────────────────────────────────────────
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("carrybot=debug".parse()?)
                .add_directive("tower_http=info".parse()?)
                .add_directive("reqwest=warn".parse()?),
        )
        .init();

    info!(r#"

  ╔═══════════════════════════════════════════════════════╗
  ║            CARRYBOT — Cash-and-Carry Keeper           ║
  ║   Gateway · Ledger · Monitors · Rebalancer            ║
  ╚═══════════════════════════════════════════════════════╝"#);

    // ── 3. Config + collaborators ─────────────────────────────────────────────
    let config = Config::from_env().context("Configuration incomplete")?;
    info!(
        spot      = %config.pair_spot,
        swap      = %config.pair_swap,
        simulated = config.credentials.simulated,
        "Configuration loaded"
    );

    let notifier = Notifier::new(alerts::sink_from_config(&config));
    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);
    let store = Arc::new(
        StateStore::open(&config.database_url)
            .await
            .context("Failed to open ledger")?,
    );
    let gateway = Arc::new(Gateway::new(&config, notifier.clone()).context("Failed to build gateway")?);

    // ── 4. Executors ──────────────────────────────────────────────────────────
    let ctx = ExecContext::new(gateway.clone(), store.clone(), notifier.clone());
    let spot = Arc::new(SpotExecutor::new(ctx.clone(), config.pair_spot.clone()));
    let perp = Arc::new(PerpExecutor::new(ctx.clone(), config.pair_swap.clone()));
    let borrow = Arc::new(BorrowExecutor::new(ctx.clone()));
    let unwinder = Arc::new(Unwinder::new(perp.clone(), borrow.clone()));

    // ── 5. Open or restore the carry ──────────────────────────────────────────
    let legs = Legs { spot: &spot, perp: &perp, borrow: &borrow };
    match init_positions(&ctx, legs, &config.pair_spot, config.leverage).await {
        Ok(Bootstrap::Restored(position)) => info!(?position, "Carry restored from ledger"),
        Ok(Bootstrap::Opened { qty, loan }) => info!(qty = %qty, loan = %loan, "Carry opened"),
        Err(e) => {
            error!(error = %e, "❌ INIT_FAILED");
            notifier.emit(BotEvent::InitFailed { error: e.to_string() }).await;
            gateway.close().await;
            store.close().await;
            return Err(e).context("Initial position setup failed");
        }
    }

    // ── 6. Monitors + rebalancer ──────────────────────────────────────────────
    let monitors = Arc::new(Monitors::new(
        ctx.clone(),
        metrics.clone(),
        config.thresholds.clone(),
        config.pair_swap.clone(),
        unwinder,
        spot.clone(),
    ));
    let rebalancer = Arc::new(Rebalancer::new(
        ctx.clone(),
        perp.clone(),
        metrics.clone(),
        config.thresholds.rebalance,
    ));

    let funding = gateway.subscribe("funding-rate", Some(&config.pair_swap)).await;
    let account = gateway.subscribe("account", None).await;
    let positions = gateway.subscribe("positions", Some(&config.pair_swap)).await;

    // ── 7. Status server ──────────────────────────────────────────────────────
    let state = Arc::new(AppState {
        store:      store.clone(),
        metrics:    metrics.clone(),
        connection: gateway.connection_state(),
        notifier:   notifier.clone(),
        thresholds: config.thresholds.clone(),
        started_at: Utc::now(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/metrics",    get(get_metrics))
        .route("/api/status", get(get_status))
        .route("/ws/events",  get(ws_events))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "🚀 Status server listening");

    // ── 8. Launch ─────────────────────────────────────────────────────────────
    let mut tasks: JoinSet<&'static str> = JoinSet::new();
    {
        let m = monitors.clone();
        tasks.spawn(async move { m.run_funding(funding).await; "funding monitor" });
    }
    {
        let m = monitors.clone();
        tasks.spawn(async move { m.run_risk(account).await; "risk monitor" });
    }
    {
        let m = monitors.clone();
        tasks.spawn(async move { m.run_liquidation(positions).await; "liquidation monitor" });
    }
    {
        let m = monitors.clone();
        let every = config.apr_poll;
        tasks.spawn(async move { m.run_apr(every).await; "APR monitor" });
    }
    {
        let m = monitors.clone();
        let every = config.equity_poll;
        tasks.spawn(async move { m.run_equity_guard(every).await; "equity guard" });
    }
    {
        let r = rebalancer.clone();
        let every = config.rebalance_every;
        tasks.spawn(async move { r.run(every).await; "rebalancer" });
    }
    tasks.spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Status server failed");
        }
        "status server"
    });

    notifier
        .emit(BotEvent::Started {
            spot_inst: config.pair_spot.clone(),
            swap_inst: config.pair_swap.clone(),
            simulated: config.credentials.simulated,
        })
        .await;

    // ── 9. Run until Ctrl-C or a task dies ────────────────────────────────────
    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            Ok(())
        }
        Some(joined) = tasks.join_next() => {
            let (task, reason) = match joined {
                Ok(task) => (task.to_string(), "exited unexpectedly".to_string()),
                Err(e) => ("task".to_string(), e.to_string()),
            };
            error!(task = %task, reason = %reason, "❌ MAIN_ERROR");
            notifier
                .emit(BotEvent::Crashed { task: task.clone(), error: reason.clone() })
                .await;
            Err(anyhow::anyhow!("{task}: {reason}"))
        }
    };

    // ── 10. Cleanup ───────────────────────────────────────────────────────────
    tasks.shutdown().await;
    gateway.close().await;
    store.close().await;
    info!("CLEANUP_COMPLETE");

    outcome
}
