//! Configuration module for PulseWatch.
//!
//! Loads configuration from environment variables with sensible defaults.
//! The resulting struct is passed into each component at construction; no
//! global state.

use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP port for the API server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "pulsewatch.db")
    pub db_path: String,
    /// Consecutive results required to commit a status flip (default: 2)
    pub confirmations: u32,
    /// Minimum minutes between repeat alerts per (target, kind) (default: 5)
    pub cooldown_minutes: i64,
    /// Per-attempt notification send timeout in seconds (default: 10)
    pub notify_timeout_secs: u64,
    /// Days of probe results to keep (default: 7)
    pub retention_days: i64,
    /// Days of resolved incidents to keep (default: 90)
    pub incident_retention_days: i64,
    /// TLS expiry alert thresholds in days, descending (default: 30,14,7)
    pub ssl_alert_days: Vec<i64>,
    /// Operator timezone offset in minutes for alert timestamps (default: 0)
    pub tz_offset_minutes: i32,
    /// Telegram bot token; channel disabled when unset
    pub telegram_bot_token: Option<String>,
    /// Telegram chat ID; channel disabled when unset
    pub telegram_chat_id: Option<String>,
    /// Generic webhook URL; channel disabled when unset
    pub webhook_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "pulsewatch.db".to_string(),
            confirmations: 2,
            cooldown_minutes: 5,
            notify_timeout_secs: 10,
            retention_days: 7,
            incident_retention_days: 90,
            ssl_alert_days: vec![30, 14, 7],
            tz_offset_minutes: 0,
            telegram_bot_token: None,
            telegram_chat_id: None,
            webhook_url: None,
        }
    }
}

impl Config {
    /// Load configuration from `PULSEWATCH_*` environment variables.
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Some(port) = parse_var("PULSEWATCH_HTTP_PORT") {
            cfg.http_port = port;
        }
        if let Ok(db_path) = env::var("PULSEWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }
        if let Some(n) = parse_var("PULSEWATCH_CONFIRMATIONS") {
            cfg.confirmations = n;
        }
        if let Some(minutes) = parse_var("PULSEWATCH_COOLDOWN_MINUTES") {
            cfg.cooldown_minutes = minutes;
        }
        if let Some(secs) = parse_var("PULSEWATCH_NOTIFY_TIMEOUT_SECS") {
            cfg.notify_timeout_secs = secs;
        }
        if let Some(days) = parse_var("PULSEWATCH_RETENTION_DAYS") {
            cfg.retention_days = days;
        }
        if let Some(days) = parse_var("PULSEWATCH_INCIDENT_RETENTION_DAYS") {
            cfg.incident_retention_days = days;
        }
        if let Ok(days) = env::var("PULSEWATCH_SSL_ALERT_DAYS") {
            let parsed: Vec<i64> = days
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if !parsed.is_empty() {
                cfg.ssl_alert_days = parsed;
            }
        }
        if let Some(minutes) = parse_var("PULSEWATCH_TZ_OFFSET_MINUTES") {
            cfg.tz_offset_minutes = minutes;
        }
        cfg.telegram_bot_token = env::var("PULSEWATCH_TELEGRAM_BOT_TOKEN").ok().filter(|s| !s.is_empty());
        cfg.telegram_chat_id = env::var("PULSEWATCH_TELEGRAM_CHAT_ID").ok().filter(|s| !s.is_empty());
        cfg.webhook_url = env::var("PULSEWATCH_WEBHOOK_URL").ok().filter(|s| !s.is_empty());

        cfg
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "pulsewatch.db");
        assert_eq!(cfg.confirmations, 2);
        assert_eq!(cfg.cooldown_minutes, 5);
        assert_eq!(cfg.ssl_alert_days, vec![30, 14, 7]);
        assert!(cfg.telegram_bot_token.is_none());
    }
}
