//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Probe kinds accepted for target configuration.
///
/// The actual probing is performed by an external prober; the kind is
/// configuration metadata passed through to it.
pub const VALID_PROBE_KINDS: &[&str] = &["http", "https", "tcp", "icmp", "keyword"];

/// A monitored endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub probe_kind: String,
    pub keyword: Option<String>,
    pub port: Option<u16>,
    pub slow_threshold_ms: f64,
    pub down_threshold_ms: f64,
    pub check_interval_secs: i64,
    pub ssl_monitoring: bool,
    pub created_at: DateTime<Utc>,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            url: String::new(),
            probe_kind: "http".to_string(),
            keyword: None,
            port: None,
            slow_threshold_ms: 5_000.0,
            down_threshold_ms: 30_000.0,
            check_interval_secs: 60,
            ssl_monitoring: false,
            created_at: DateTime::<Utc>::MIN_UTC,
        }
    }
}

/// A single probe measurement, as submitted by the external prober.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub target_id: i64,
    pub time: DateTime<Utc>,
    pub success: bool,
    pub latency_ms: Option<f64>,
    pub status_code: Option<u16>,
    pub tls_days_remaining: Option<i64>,
}

/// Committed per-target status, after hysteresis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Unknown,
    Healthy,
    Slow,
    Down,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Unknown => "unknown",
            Status::Healthy => "healthy",
            Status::Slow => "slow",
            Status::Down => "down",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unknown" => Some(Status::Unknown),
            "healthy" => Some(Status::Healthy),
            "slow" => Some(Status::Slow),
            "down" => Some(Status::Down),
            _ => None,
        }
    }
}

/// Persisted row backing a target's committed status.
#[derive(Debug, Clone, Serialize)]
pub struct TargetStateRow {
    pub target_id: i64,
    pub status: Status,
    pub last_change: Option<DateTime<Utc>>,
    pub last_result: Option<DateTime<Utc>>,
}

/// Kind of a recorded incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    Down,
    Slow,
    SslExpiring,
}

impl IncidentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentKind::Down => "down",
            IncidentKind::Slow => "slow",
            IncidentKind::SslExpiring => "ssl_expiring",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "down" => Some(IncidentKind::Down),
            "slow" => Some(IncidentKind::Slow),
            "ssl_expiring" => Some(IncidentKind::SslExpiring),
            _ => None,
        }
    }
}

/// A recorded degraded period for one target.
#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    pub id: i64,
    pub target_id: i64,
    pub kind: IncidentKind,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub resolved: bool,
    pub message: String,
}

impl Incident {
    /// Duration in seconds, if the incident is closed.
    pub fn duration_secs(&self) -> Option<i64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_seconds())
    }
}
