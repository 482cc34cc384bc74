//! PulseWatch - Monitor Status Evaluation and Alerting Engine
//!
//! Consumes probe results submitted by external probers, classifies target
//! health with hysteresis, manages incident lifecycles, and dispatches
//! alerts through Telegram and webhook channels.

mod config;
mod db;
mod engine;
mod notify;
mod retention;
mod web;

use config::Config;
use db::Store;
use engine::{Engine, EngineConfig};
use notify::{run_alert_worker, AlertChannel, Notifier, TelegramChannel, WebhookChannel};
use retention::RetentionManager;
use web::Server;

use chrono::FixedOffset;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("pulsewatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = Config::load();
    tracing::info!("Starting PulseWatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    // Notification channels
    let mut channels: Vec<Arc<dyn AlertChannel>> = Vec::new();
    if let (Some(token), Some(chat_id)) = (&cfg.telegram_bot_token, &cfg.telegram_chat_id) {
        channels.push(Arc::new(TelegramChannel::new(token.clone(), chat_id.clone())));
        tracing::info!("Telegram channel enabled");
    }
    if let Some(url) = &cfg.webhook_url {
        channels.push(Arc::new(WebhookChannel::new(url.clone())));
        tracing::info!("Webhook channel enabled");
    }

    let tz_offset = FixedOffset::east_opt(cfg.tz_offset_minutes * 60)
        .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
    let notifier = Notifier::new(
        channels,
        cfg.cooldown_minutes,
        Duration::from_secs(cfg.notify_timeout_secs),
        tz_offset,
    );

    // Alert queue decouples evaluation from notification delivery.
    let (alert_tx, alert_rx) = mpsc::channel(1000);
    tokio::spawn(run_alert_worker(alert_rx, notifier));

    // Evaluation engine
    let engine = Arc::new(Engine::new(
        store.clone(),
        EngineConfig {
            confirmations: cfg.confirmations,
            ssl_alert_days: cfg.ssl_alert_days.clone(),
        },
        alert_tx,
    ));

    // Background cleanup
    let retention = RetentionManager::new(
        store.clone(),
        cfg.retention_days,
        cfg.incident_retention_days,
    );
    retention.start();

    // Start API server
    let server = Server::new(cfg, store, engine);
    server.start().await?;

    retention.stop().await;
    Ok(())
}
