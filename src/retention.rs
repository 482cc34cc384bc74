//! Retention manager for cleaning up old data.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;

use crate::db::Store;

/// Manager for deleting probe results and resolved incidents past their
/// retention periods.
pub struct RetentionManager {
    store: Arc<Store>,
    retention_days: i64,
    incident_retention_days: i64,
    stop: Arc<Mutex<Option<tokio::sync::broadcast::Sender<()>>>>,
}

impl RetentionManager {
    pub fn new(store: Arc<Store>, retention_days: i64, incident_retention_days: i64) -> Self {
        Self {
            store,
            retention_days,
            incident_retention_days,
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the retention manager background task.
    pub fn start(&self) {
        let store = self.store.clone();
        let retention_days = self.retention_days;
        let incident_retention_days = self.incident_retention_days;
        let stop = self.stop.clone();

        tokio::spawn(async move {
            let (tx, _) = tokio::sync::broadcast::channel(1);
            {
                let mut stop_guard = stop.lock().await;
                *stop_guard = Some(tx.clone());
            }

            let mut rx = tx.subscribe();
            let mut interval = tokio::time::interval(Duration::from_secs(600));

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        process_retention(&store, retention_days, incident_retention_days);
                    }
                }
            }
        });
    }

    /// Stop the retention manager.
    pub async fn stop(&self) {
        let stop = self.stop.lock().await;
        if let Some(tx) = stop.as_ref() {
            let _ = tx.send(());
        }
    }
}

fn process_retention(store: &Store, retention_days: i64, incident_retention_days: i64) {
    let targets = match store.get_targets() {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("RetentionManager: Failed to get targets: {}", e);
            return;
        }
    };

    let now = Utc::now();
    let result_cutoff = now - ChronoDuration::days(retention_days);

    for target in targets {
        match store.delete_results_before(target.id, result_cutoff) {
            Ok(n) if n > 0 => {
                tracing::debug!("RetentionManager: Deleted {} old results for {}", n, target.name);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(
                    "RetentionManager: Failed to delete results for {}: {}",
                    target.name,
                    e
                );
            }
        }
    }

    let incident_cutoff = now - ChronoDuration::days(incident_retention_days);
    if let Err(e) = store.delete_resolved_incidents_before(incident_cutoff) {
        tracing::error!("RetentionManager: Failed to delete old incidents: {}", e);
    }
}
