//! Incident lifecycle management.
//!
//! Opens an incident when a target commits a transition into a degraded
//! status, closes down/slow incidents on recovery, and tracks TLS
//! certificate expiry independently of the latency pipeline. At most one
//! incident per (target, kind) is ever open.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::db::{DbError, Incident, IncidentKind, Status, Store, Target};

use super::tracker::Transition;

/// An incident boundary produced by the manager, fed to the notifier.
#[derive(Debug, Clone)]
pub enum IncidentEvent {
    Opened(Incident),
    Closed(Incident),
}

/// Per-target TLS expiry tracking state. Held by the engine alongside the
/// state tracker; rebuilt lazily after a restart from the open-incident set.
#[derive(Debug, Default)]
pub struct SslWatch {
    /// Smallest alert threshold the certificate has crossed below, if any.
    pub lowest_crossed: Option<i64>,
}

pub struct IncidentManager {
    store: Arc<Store>,
    /// Alert thresholds in days, strictly descending (e.g. 30, 14, 7).
    ssl_alert_days: Vec<i64>,
}

impl IncidentManager {
    pub fn new(store: Arc<Store>, mut ssl_alert_days: Vec<i64>) -> Self {
        ssl_alert_days.sort_unstable_by(|a, b| b.cmp(a));
        ssl_alert_days.dedup();
        Self {
            store,
            ssl_alert_days,
        }
    }

    /// React to a committed status transition.
    pub fn on_transition(
        &self,
        target: &Target,
        transition: &Transition,
    ) -> Result<Vec<IncidentEvent>, DbError> {
        let mut events = Vec::new();

        match transition.to {
            Status::Down => {
                let message = format!("{} is down", target.name);
                if let Some(e) =
                    self.open_if_absent(target.id, IncidentKind::Down, transition.at, &message)?
                {
                    events.push(e);
                }
            }
            Status::Slow => {
                let message = format!("{} is responding slowly", target.name);
                if let Some(e) =
                    self.open_if_absent(target.id, IncidentKind::Slow, transition.at, &message)?
                {
                    events.push(e);
                }
            }
            Status::Healthy => {
                for kind in [IncidentKind::Down, IncidentKind::Slow] {
                    if let Some(e) = self.close_if_open(target.id, kind, transition.at)? {
                        events.push(e);
                    }
                }
            }
            Status::Unknown => {}
        }

        Ok(events)
    }

    /// Evaluate TLS days-remaining reported by a probe.
    ///
    /// Opens the ssl_expiring incident on the first crossing below an alert
    /// threshold; a deeper crossing updates the open incident's message. The
    /// incident closes once days-remaining rises back above the smallest
    /// crossed threshold (certificate renewed).
    pub fn observe_tls(
        &self,
        target: &Target,
        watch: &mut SslWatch,
        days_remaining: i64,
        at: DateTime<Utc>,
    ) -> Result<Vec<IncidentEvent>, DbError> {
        let mut events = Vec::new();

        if let Some(crossed) = watch.lowest_crossed {
            if days_remaining > crossed {
                watch.lowest_crossed = None;
                if let Some(e) = self.close_if_open(target.id, IncidentKind::SslExpiring, at)? {
                    events.push(e);
                }
                return Ok(events);
            }
        }

        // Smallest configured threshold the certificate is currently below.
        let lowest = self
            .ssl_alert_days
            .iter()
            .copied()
            .filter(|&t| days_remaining < t)
            .min();

        let Some(lowest) = lowest else {
            // Above all thresholds. An incident still open here means the
            // renewal happened while no watch state was held (restart), so
            // close it now.
            watch.lowest_crossed = None;
            if let Some(e) = self.close_if_open(target.id, IncidentKind::SslExpiring, at)? {
                events.push(e);
            }
            return Ok(events);
        };

        let newly_crossed = match watch.lowest_crossed {
            None => true,
            Some(prev) => lowest < prev,
        };
        watch.lowest_crossed = Some(lowest);

        if !newly_crossed {
            return Ok(events);
        }

        let message = format!(
            "TLS certificate for {} expires in {} days (below {}-day threshold)",
            target.name, days_remaining, lowest
        );

        match self
            .store
            .get_open_incident(target.id, IncidentKind::SslExpiring)?
        {
            Some(open) => {
                // Already open (earlier threshold, or rebuilt after restart):
                // record the deeper crossing without a second incident.
                self.store.update_incident_message(open.id, &message)?;
                tracing::info!(
                    target_id = target.id,
                    days_remaining,
                    threshold = lowest,
                    "TLS expiry crossed a lower threshold"
                );
            }
            None => {
                let id = self
                    .store
                    .open_incident(target.id, IncidentKind::SslExpiring, at, &message)?;
                events.push(IncidentEvent::Opened(Incident {
                    id,
                    target_id: target.id,
                    kind: IncidentKind::SslExpiring,
                    started_at: at,
                    ended_at: None,
                    resolved: false,
                    message,
                }));
            }
        }

        Ok(events)
    }

    fn open_if_absent(
        &self,
        target_id: i64,
        kind: IncidentKind,
        at: DateTime<Utc>,
        message: &str,
    ) -> Result<Option<IncidentEvent>, DbError> {
        if self.store.get_open_incident(target_id, kind)?.is_some() {
            return Ok(None);
        }

        let id = self.store.open_incident(target_id, kind, at, message)?;
        Ok(Some(IncidentEvent::Opened(Incident {
            id,
            target_id,
            kind,
            started_at: at,
            ended_at: None,
            resolved: false,
            message: message.to_string(),
        })))
    }

    fn close_if_open(
        &self,
        target_id: i64,
        kind: IncidentKind,
        at: DateTime<Utc>,
    ) -> Result<Option<IncidentEvent>, DbError> {
        let Some(open) = self.store.get_open_incident(target_id, kind)? else {
            return Ok(None);
        };

        // End time can never precede the start time.
        let ended_at = at.max(open.started_at);
        self.store.close_incident(open.id, ended_at)?;

        Ok(Some(IncidentEvent::Closed(Incident {
            ended_at: Some(ended_at),
            resolved: true,
            ..open
        })))
    }
}
