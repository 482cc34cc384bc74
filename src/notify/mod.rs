//! Alert notification dispatch.
//!
//! Incident events are queued by the engine and delivered here by a worker
//! task, decoupled from the evaluation pipeline: a slow or failed channel
//! call never delays classification. Each event gets a single bounded-time
//! attempt per channel; repeat open alerts for the same (target, kind)
//! inside the cooldown window are suppressed. Recovery and test alerts
//! always go out.

mod telegram;
mod webhook;

pub use telegram::TelegramChannel;
pub use webhook::WebhookChannel;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::db::IncidentKind;

/// Notification transport errors.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("send timed out after {0:?}")]
    Timeout(StdDuration),
}

/// Rendered alert handed to a channel.
#[derive(Debug, Clone, Serialize)]
pub struct AlertMessage {
    pub title: String,
    pub body: String,
    pub severity: &'static str,
}

/// A notification sink.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, message: &AlertMessage) -> Result<(), NotifyError>;
}

/// Minimal target identity carried with an alert.
#[derive(Debug, Clone)]
pub struct TargetBrief {
    pub id: i64,
    pub name: String,
    pub url: String,
}

/// An event worth alerting on.
#[derive(Debug, Clone)]
pub enum AlertEvent {
    Opened {
        target: TargetBrief,
        kind: IncidentKind,
        at: DateTime<Utc>,
        latency_ms: Option<f64>,
        tls_days_remaining: Option<i64>,
    },
    Closed {
        target: TargetBrief,
        kind: IncidentKind,
        at: DateTime<Utc>,
        duration_secs: i64,
    },
    /// Operator-initiated test message; bypasses the cooldown.
    Test { at: DateTime<Utc> },
}

impl AlertEvent {
    fn cooldown_key(&self) -> Option<(i64, IncidentKind)> {
        match self {
            AlertEvent::Opened { target, kind, .. } => Some((target.id, *kind)),
            // A recovery is always worth delivering; suppressing it would
            // leave the operator seeing an outage that already ended.
            AlertEvent::Closed { .. } | AlertEvent::Test { .. } => None,
        }
    }

    fn at(&self) -> DateTime<Utc> {
        match self {
            AlertEvent::Opened { at, .. }
            | AlertEvent::Closed { at, .. }
            | AlertEvent::Test { at } => *at,
        }
    }
}

/// Outcome of a single notify call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    Suppressed,
    Failed,
}

/// Dispatches alerts through the configured channels with per-(target, kind)
/// cooldown. Owns the cooldown map; single attempt per invocation, no
/// internal retries.
pub struct Notifier {
    channels: Vec<Arc<dyn AlertChannel>>,
    cooldown: Duration,
    send_timeout: StdDuration,
    tz_offset: FixedOffset,
    cooldowns: HashMap<(i64, IncidentKind), DateTime<Utc>>,
}

impl Notifier {
    pub fn new(
        channels: Vec<Arc<dyn AlertChannel>>,
        cooldown_minutes: i64,
        send_timeout: StdDuration,
        tz_offset: FixedOffset,
    ) -> Self {
        if channels.is_empty() {
            tracing::warn!("No notification channels configured; alerts will not be delivered");
        }
        Self {
            channels,
            cooldown: Duration::minutes(cooldown_minutes),
            send_timeout,
            tz_offset,
            cooldowns: HashMap::new(),
        }
    }

    pub async fn notify(&mut self, event: &AlertEvent) -> NotifyOutcome {
        if self.channels.is_empty() {
            return NotifyOutcome::Suppressed;
        }

        let at = event.at();
        let key = event.cooldown_key();

        if let Some(key) = key {
            if let Some(last) = self.cooldowns.get(&key) {
                if at - *last < self.cooldown {
                    tracing::debug!(
                        target_id = key.0,
                        kind = key.1.as_str(),
                        "Alert suppressed by cooldown"
                    );
                    return NotifyOutcome::Suppressed;
                }
            }
        }

        let message = format_message(event, self.tz_offset);
        let mut delivered = 0usize;

        for channel in &self.channels {
            let attempt = tokio::time::timeout(self.send_timeout, channel.send(&message))
                .await
                .unwrap_or(Err(NotifyError::Timeout(self.send_timeout)));
            match attempt {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::error!(channel = channel.name(), "Alert send failed: {}", e);
                }
            }
        }

        if delivered == 0 {
            return NotifyOutcome::Failed;
        }

        if let Some(key) = key {
            self.cooldowns.insert(key, at);
        }
        // Expired entries are useless; dropping them here keeps the map
        // bounded across target churn.
        self.cooldowns.retain(|_, last| at - *last < self.cooldown);
        NotifyOutcome::Sent
    }
}

/// Render an alert event into a channel-agnostic message.
///
/// Timestamps are kept in UTC everywhere inside the engine and formatted
/// into the operator's offset only here, at the notification boundary.
pub fn format_message(event: &AlertEvent, tz_offset: FixedOffset) -> AlertMessage {
    match event {
        AlertEvent::Opened {
            target,
            kind,
            at,
            latency_ms,
            tls_days_remaining,
        } => {
            let (emoji, status, severity) = match kind {
                IncidentKind::Down => ("\u{1F534}", "DOWN", "critical"),
                IncidentKind::Slow => ("\u{1F7E1}", "SLOW", "warning"),
                IncidentKind::SslExpiring => ("\u{1F512}", "SSL EXPIRING", "warning"),
            };
            let mut body = format!("<b>Site:</b> {}\n<b>URL:</b> {}\n", target.name, target.url);
            if let Some(latency) = latency_ms {
                body.push_str(&format!("<b>Response Time:</b> {:.0}ms\n", latency));
            }
            if let Some(days) = tls_days_remaining {
                body.push_str(&format!("<b>Certificate expires in:</b> {} days\n", days));
            }
            body.push_str(&format!("<b>Time:</b> {}\n", fmt_local(*at, tz_offset)));
            AlertMessage {
                title: format!("{} {}", emoji, status),
                body,
                severity,
            }
        }
        AlertEvent::Closed {
            target,
            kind,
            at,
            duration_secs,
        } => {
            let status = match kind {
                IncidentKind::SslExpiring => "SSL RENEWED",
                _ => "RECOVERED",
            };
            let body = format!(
                "<b>Site:</b> {}\n<b>URL:</b> {}\n<b>Duration:</b> {}\n<b>Time:</b> {}\n",
                target.name,
                target.url,
                fmt_duration(*duration_secs),
                fmt_local(*at, tz_offset),
            );
            AlertMessage {
                title: format!("\u{1F7E2} {}", status),
                body,
                severity: "info",
            }
        }
        AlertEvent::Test { at } => AlertMessage {
            title: "\u{2705} Test notification".to_string(),
            body: format!(
                "PulseWatch alerting is configured correctly.\n<b>Time:</b> {}\n",
                fmt_local(*at, tz_offset)
            ),
            severity: "info",
        },
    }
}

fn fmt_local(at: DateTime<Utc>, offset: FixedOffset) -> String {
    at.with_timezone(&offset)
        .format("%Y-%m-%d %H:%M:%S %:z")
        .to_string()
}

fn fmt_duration(secs: i64) -> String {
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

/// Consume queued alert events and dispatch them until the queue closes.
pub async fn run_alert_worker(mut rx: mpsc::Receiver<AlertEvent>, mut notifier: Notifier) {
    while let Some(event) = rx.recv().await {
        let outcome = notifier.notify(&event).await;
        tracing::info!(?outcome, "Alert dispatched");
    }
}
