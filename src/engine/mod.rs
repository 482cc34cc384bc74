//! Evaluation engine: classification, hysteresis, incidents, uptime.
//!
//! One `ingest` call runs the whole pipeline for a single probe result,
//! serialized per target behind a per-target mutex. Different targets
//! evaluate concurrently. Incident boundaries are queued for the alert
//! worker after the per-target lock is released, so notification latency
//! never blocks classification.

mod classifier;
mod incident;
mod tracker;
mod uptime;

pub use classifier::{classify, Classification, Thresholds};
pub use incident::{IncidentEvent, IncidentManager, SslWatch};
pub use tracker::{StaleResult, StateTracker, Transition};
pub use uptime::{UptimeAggregator, UptimeStats};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::db::{DbError, IncidentKind, ProbeResult, Status, Store, Target, TargetStateRow};
use crate::notify::{AlertEvent, TargetBrief};

/// Engine error types. Only configuration validation and storage errors
/// surface past the pipeline; everything else is handled locally.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid thresholds: slow {slow_ms}ms must be strictly below down {down_ms}ms")]
    InvalidThresholdConfig { slow_ms: f64, down_ms: f64 },
    #[error("unknown target: {0}")]
    UnknownTarget(i64),
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Evaluation policy knobs, passed in at construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Consecutive results required to commit a status flip.
    pub confirmations: u32,
    /// TLS expiry alert thresholds in days.
    pub ssl_alert_days: Vec<i64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confirmations: 2,
            ssl_alert_days: vec![30, 14, 7],
        }
    }
}

/// Mutable per-target evaluation state. Guarded by a per-target mutex.
struct TargetRuntime {
    tracker: StateTracker,
    ssl: SslWatch,
}

pub struct Engine {
    store: Arc<Store>,
    confirmations: u32,
    incidents: IncidentManager,
    uptime: UptimeAggregator,
    runtimes: RwLock<HashMap<i64, Arc<Mutex<TargetRuntime>>>>,
    alert_tx: mpsc::Sender<AlertEvent>,
}

impl Engine {
    pub fn new(store: Arc<Store>, config: EngineConfig, alert_tx: mpsc::Sender<AlertEvent>) -> Self {
        Self {
            incidents: IncidentManager::new(store.clone(), config.ssl_alert_days),
            uptime: UptimeAggregator::new(store.clone()),
            store,
            confirmations: config.confirmations.max(1),
            runtimes: RwLock::new(HashMap::new()),
            alert_tx,
        }
    }

    /// Run one probe result through the pipeline.
    ///
    /// Stale results are ignored (logged, state untouched); unknown targets
    /// are rejected with `UnknownTarget`. No result for one target can
    /// affect evaluation of another.
    pub async fn ingest(&self, result: ProbeResult) -> Result<(), EngineError> {
        let target = self.get_target(result.target_id)?;
        let thresholds = Thresholds::new(target.slow_threshold_ms, target.down_threshold_ms)?;
        let runtime = self.runtime_for(&target).await?;

        let mut events = Vec::new();
        {
            let mut runtime = runtime.lock().await;

            if result.success && result.latency_ms.is_none() {
                tracing::warn!(
                    target_id = target.id,
                    "Successful result without latency; classifying as down"
                );
            }

            let classification = classify(result.success, result.latency_ms, &thresholds);

            let transition = match runtime.tracker.observe(classification, result.time) {
                Ok(t) => t,
                Err(stale) => {
                    tracing::debug!(target_id = target.id, "Ignoring stale result: {}", stale);
                    return Ok(());
                }
            };

            self.store.add_result(&result)?;
            self.store.upsert_state(&TargetStateRow {
                target_id: target.id,
                status: runtime.tracker.status(),
                last_change: runtime.tracker.last_change(),
                last_result: runtime.tracker.last_result(),
            })?;

            if let Some(transition) = transition {
                tracing::info!(
                    target_id = target.id,
                    from = transition.from.as_str(),
                    to = transition.to.as_str(),
                    "Status transition committed"
                );
                events.extend(self.incidents.on_transition(&target, &transition)?);
            }

            if target.ssl_monitoring {
                if let Some(days) = result.tls_days_remaining {
                    events.extend(self.incidents.observe_tls(
                        &target,
                        &mut runtime.ssl,
                        days,
                        result.time,
                    )?);
                }
            }
        }

        // Per-target lock released; hand incident boundaries to the alert
        // worker without blocking the pipeline.
        for event in events {
            let alert = self.to_alert(&target, event, &result);
            if let Err(e) = self.alert_tx.try_send(alert) {
                tracing::warn!(target_id = target.id, "Alert queue full, dropping event: {}", e);
            }
        }

        Ok(())
    }

    /// Current committed status for a target.
    pub fn current_status(&self, target_id: i64) -> Result<TargetStateRow, EngineError> {
        self.get_target(target_id)?;
        Ok(self
            .store
            .get_state(target_id)?
            .unwrap_or(TargetStateRow {
                target_id,
                status: Status::Unknown,
                last_change: None,
                last_result: None,
            }))
    }

    /// Uptime statistics over the lookback window.
    pub fn uptime_stats(&self, target_id: i64, window_hours: i64) -> Result<UptimeStats, EngineError> {
        self.get_target(target_id)?;
        Ok(self.uptime.compute_stats(target_id, window_hours, Utc::now())?)
    }

    /// Drop a target: evict its runtime, close its incidents, delete its rows.
    pub async fn remove_target(&self, target_id: i64) -> Result<(), EngineError> {
        self.runtimes.write().await.remove(&target_id);
        self.store.delete_target(target_id, Utc::now())?;
        Ok(())
    }

    /// Reset a target's runtime so edited thresholds take effect cleanly.
    /// The committed status survives via the persisted state row.
    pub async fn reset_target(&self, target_id: i64) {
        self.runtimes.write().await.remove(&target_id);
    }

    /// Queue an operator-initiated test alert.
    pub fn queue_test_alert(&self) -> bool {
        self.alert_tx
            .try_send(AlertEvent::Test { at: Utc::now() })
            .is_ok()
    }

    fn get_target(&self, id: i64) -> Result<Target, EngineError> {
        self.store.get_target(id).map_err(|e| match e {
            DbError::NotFound => EngineError::UnknownTarget(id),
            other => EngineError::Db(other),
        })
    }

    async fn runtime_for(&self, target: &Target) -> Result<Arc<Mutex<TargetRuntime>>, EngineError> {
        if let Some(runtime) = self.runtimes.read().await.get(&target.id) {
            return Ok(runtime.clone());
        }

        // Seed from the persisted state row so restarts resume the last
        // committed status instead of re-flipping from unknown.
        let tracker = match self.store.get_state(target.id)? {
            Some(row) => StateTracker::with_status(self.confirmations, row.status, row.last_change),
            None => StateTracker::new(self.confirmations),
        };

        let mut runtimes = self.runtimes.write().await;
        let runtime = runtimes
            .entry(target.id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(TargetRuntime {
                    tracker,
                    ssl: SslWatch::default(),
                }))
            })
            .clone();
        Ok(runtime)
    }

    fn to_alert(&self, target: &Target, event: IncidentEvent, result: &ProbeResult) -> AlertEvent {
        let brief = TargetBrief {
            id: target.id,
            name: target.name.clone(),
            url: target.url.clone(),
        };
        match event {
            IncidentEvent::Opened(incident) => AlertEvent::Opened {
                target: brief,
                kind: incident.kind,
                at: incident.started_at,
                latency_ms: match incident.kind {
                    IncidentKind::SslExpiring => None,
                    _ => result.latency_ms,
                },
                tls_days_remaining: match incident.kind {
                    IncidentKind::SslExpiring => result.tls_days_remaining,
                    _ => None,
                },
            },
            IncidentEvent::Closed(incident) => AlertEvent::Closed {
                target: brief,
                kind: incident.kind,
                at: incident.ended_at.unwrap_or(result.time),
                duration_secs: incident.duration_secs().unwrap_or(0),
            },
        }
    }
}
