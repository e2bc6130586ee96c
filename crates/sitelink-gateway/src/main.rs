use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::Router;
use clap::Parser;
use sitelink_dispatch::{CommandPublisher, CommandTracker, ResponseDispatcher, TenantRegistry};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod mqtt;
mod routes;
mod ws;

use mqtt::MqttSettings;

#[derive(Clone, Debug)]
struct Config {
    addr: String,
    mqtt: MqttSettings,
    command_timeout: Duration,
    history_size: usize,
    sweep_interval: Duration,
    sweep_max_age: Duration,
    write_timeout: Duration,
}

#[derive(Parser, Debug)]
#[command(name = "sitelink-gateway")]
struct Args {
    /// HTTP listen address; falls back to SITELINK_ADDR, then 0.0.0.0:8000.
    #[arg(long, default_value = "")]
    addr: String,
    /// MQTT broker host; falls back to SITELINK_MQTT_HOST, then 127.0.0.1.
    #[arg(long, default_value = "")]
    mqtt_host: String,
    #[arg(long, default_value_t = 1883)]
    mqtt_port: u16,
    #[arg(long, default_value = "sitelink-gateway")]
    mqtt_client_id: String,
    /// Seconds before an unanswered command is marked timed out.
    #[arg(long, default_value_t = 30)]
    command_timeout: u64,
    /// Resolved commands kept in memory for inspection.
    #[arg(long, default_value_t = 100)]
    history_size: usize,
    /// Seconds between defensive sweeps of the pending table.
    #[arg(long, default_value_t = 300)]
    sweep_interval: u64,
    /// Minutes a pending command may linger before the sweep forces a timeout.
    #[arg(long, default_value_t = 60)]
    sweep_max_age_minutes: u64,
    /// Seconds allowed for a single WebSocket write.
    #[arg(long, default_value_t = 2)]
    write_timeout: u64,
}

/// Shared handles injected into every route handler.
pub struct AppState {
    pub registry: Arc<TenantRegistry>,
    pub tracker: Arc<CommandTracker>,
    pub publisher: CommandPublisher,
    pub write_timeout: Duration,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let config = load_config();
    let addr: SocketAddr = config.addr.parse()?;

    let registry = Arc::new(TenantRegistry::new());
    let tracker = Arc::new(CommandTracker::with_max_history(
        registry.clone(),
        config.history_size,
    ));
    let dispatcher = Arc::new(ResponseDispatcher::new(tracker.clone(), registry.clone()));

    let (outbound_tx, outbound_rx) = mpsc::channel(256);
    let publisher = CommandPublisher::new(tracker.clone(), registry.clone(), outbound_tx)
        .with_timeout(config.command_timeout);

    let (mqtt_client, mqtt_eventloop) = mqtt::connect(&config.mqtt);
    tokio::spawn(mqtt::run(
        mqtt_client,
        mqtt_eventloop,
        dispatcher,
        outbound_rx,
    ));

    start_sweeper(
        tracker.clone(),
        config.sweep_interval,
        config.sweep_max_age,
    );

    let state = Arc::new(AppState {
        registry,
        tracker,
        publisher,
        write_timeout: config.write_timeout,
    });

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/ws/:tenant_id", get(ws::ws_handler))
        .route("/api/v1/schedule", put(routes::update_schedule))
        .route("/api/v1/plc-settings", put(routes::update_plc_settings))
        .route("/api/v1/plc-control", put(routes::update_plc_control))
        .route("/api/v1/action", post(routes::trigger_action))
        .route("/api/v1/commands/pending", get(routes::pending_commands))
        .route("/api/v1/commands/history", get(routes::command_history))
        .route("/api/v1/commands/:message_id", get(routes::command_status))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(event = "gateway_start", addr = %config.addr, mqtt_host = %config.mqtt.host);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!(event = "gateway_shutdown");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config() -> Config {
    let args = Args::parse();
    Config {
        addr: resolve_flag(&args.addr, "SITELINK_ADDR", "0.0.0.0:8000"),
        mqtt: MqttSettings {
            host: resolve_flag(&args.mqtt_host, "SITELINK_MQTT_HOST", "127.0.0.1"),
            port: args.mqtt_port,
            client_id: args.mqtt_client_id,
            username: env_opt("SITELINK_MQTT_USERNAME"),
            password: env_opt("SITELINK_MQTT_PASSWORD"),
        },
        command_timeout: Duration::from_secs(args.command_timeout),
        history_size: args.history_size,
        sweep_interval: Duration::from_secs(args.sweep_interval),
        sweep_max_age: Duration::from_secs(args.sweep_max_age_minutes * 60),
        write_timeout: Duration::from_secs(args.write_timeout),
    }
}

fn resolve_flag(flag: &str, env_key: &str, default: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = std::env::var(env_key) {
        if !value.trim().is_empty() {
            return value;
        }
    }
    default.to_string()
}

fn env_opt(env_key: &str) -> Option<String> {
    std::env::var(env_key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Periodic safety net for pending commands whose timers never fired.
fn start_sweeper(tracker: Arc<CommandTracker>, interval: Duration, max_age: Duration) {
    if interval.is_zero() {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let swept = tracker.cleanup_expired_commands(max_age).await;
            if swept > 0 {
                warn!(event = "sweep_forced_timeouts", count = swept);
            }
        }
    });
}
