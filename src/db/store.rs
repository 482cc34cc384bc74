//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, Result as SqlResult};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::models::*;

/// Timestamp format used for all stored times (UTC).
const TIME_FMT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    // --- Target CRUD ---

    /// Add a new target and return its ID.
    pub fn add_target(&self, target: &mut Target) -> Result<i64, DbError> {
        if target.check_interval_secs <= 0 {
            target.check_interval_secs = 60;
        }
        if target.created_at == DateTime::<Utc>::MIN_UTC {
            target.created_at = Utc::now();
        }

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO targets (name, url, probe_kind, keyword, port, slow_threshold_ms, down_threshold_ms, check_interval_secs, ssl_monitoring, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                target.name,
                target.url,
                target.probe_kind,
                target.keyword,
                target.port,
                target.slow_threshold_ms,
                target.down_threshold_ms,
                target.check_interval_secs,
                target.ssl_monitoring as i64,
                fmt_db_time(target.created_at),
            ],
        )?;
        let id = conn.last_insert_rowid();
        target.id = id;
        Ok(id)
    }

    /// Update an existing target.
    pub fn update_target(&self, target: &Target) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let interval = if target.check_interval_secs <= 0 {
            60
        } else {
            target.check_interval_secs
        };

        conn.execute(
            "UPDATE targets SET name=?1, url=?2, probe_kind=?3, keyword=?4, port=?5, slow_threshold_ms=?6, down_threshold_ms=?7, check_interval_secs=?8, ssl_monitoring=?9 WHERE id=?10",
            params![
                target.name,
                target.url,
                target.probe_kind,
                target.keyword,
                target.port,
                target.slow_threshold_ms,
                target.down_threshold_ms,
                interval,
                target.ssl_monitoring as i64,
                target.id,
            ],
        )?;
        Ok(())
    }

    /// Get all targets.
    pub fn get_targets(&self) -> Result<Vec<Target>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, url, probe_kind, keyword, port, slow_threshold_ms, down_threshold_ms, check_interval_secs, ssl_monitoring, created_at FROM targets",
        )?;

        let targets = stmt
            .query_map([], target_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(targets)
    }

    /// Get a target by ID.
    pub fn get_target(&self, id: i64) -> Result<Target, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, name, url, probe_kind, keyword, port, slow_threshold_ms, down_threshold_ms, check_interval_secs, ssl_monitoring, created_at FROM targets WHERE id = ?1",
            params![id],
            target_from_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::NotFound,
            other => DbError::Sqlite(other),
        })
    }

    /// Delete a target, its results and state, and close its open incidents.
    pub fn delete_target(&self, id: i64, now: DateTime<Utc>) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE incidents SET ended_at = ?1, resolved = 1, message = message || ' (target removed)'
             WHERE target_id = ?2 AND resolved = 0",
            params![fmt_db_time(now), id],
        )?;
        conn.execute("DELETE FROM probe_results WHERE target_id = ?1", params![id])?;
        conn.execute("DELETE FROM target_states WHERE target_id = ?1", params![id])?;
        conn.execute("DELETE FROM targets WHERE id = ?1", params![id])?;
        Ok(())
    }

    // --- Probe Results ---

    /// Append a single probe result.
    pub fn add_result(&self, result: &ProbeResult) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO probe_results (time, target_id, success, latency_ms, status_code, tls_days_remaining)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                fmt_db_time(result.time),
                result.target_id,
                result.success as i64,
                result.latency_ms,
                result.status_code,
                result.tls_days_remaining,
            ],
        )?;
        Ok(())
    }

    /// Get probe results for a target within a time range, both ends
    /// inclusive.
    pub fn get_results(
        &self,
        target_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i32,
    ) -> Result<Vec<ProbeResult>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT time, target_id, success, latency_ms, status_code, tls_days_remaining FROM probe_results
             WHERE target_id = ?1 AND time >= ?2 AND time <= ?3 ORDER BY time ASC LIMIT ?4",
        )?;

        let results = stmt
            .query_map(
                params![target_id, fmt_db_time(start), fmt_db_time(end), limit],
                |row| {
                    let time_str: String = row.get(0)?;
                    let success: i64 = row.get(2)?;
                    Ok(ProbeResult {
                        time: parse_db_time(&time_str).unwrap_or_else(Utc::now),
                        target_id: row.get(1)?,
                        success: success != 0,
                        latency_ms: row.get(3)?,
                        status_code: row.get(4)?,
                        tls_days_remaining: row.get(5)?,
                    })
                },
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(results)
    }

    /// Delete probe results before a cutoff time.
    pub fn delete_results_before(
        &self,
        target_id: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, DbError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM probe_results WHERE target_id = ?1 AND time < ?2",
            params![target_id, fmt_db_time(cutoff)],
        )?;
        Ok(n)
    }

    // --- Target State ---

    /// Insert or update the committed state row for a target.
    pub fn upsert_state(&self, state: &TargetStateRow) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO target_states (target_id, status, last_change, last_result)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(target_id) DO UPDATE SET
             status=excluded.status, last_change=excluded.last_change, last_result=excluded.last_result",
            params![
                state.target_id,
                state.status.as_str(),
                state.last_change.map(fmt_db_time),
                state.last_result.map(fmt_db_time),
            ],
        )?;
        Ok(())
    }

    /// Get the committed state row for a target, if any.
    pub fn get_state(&self, target_id: i64) -> Result<Option<TargetStateRow>, DbError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT target_id, status, last_change, last_result FROM target_states WHERE target_id = ?1",
                params![target_id],
                |row| {
                    let status_str: String = row.get(1)?;
                    let last_change: Option<String> = row.get(2)?;
                    let last_result: Option<String> = row.get(3)?;
                    Ok(TargetStateRow {
                        target_id: row.get(0)?,
                        status: Status::parse(&status_str).unwrap_or(Status::Unknown),
                        last_change: last_change.as_deref().and_then(parse_db_time),
                        last_result: last_result.as_deref().and_then(parse_db_time),
                    })
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(row)
    }

    // --- Incidents ---

    /// Open a new incident and return its ID.
    pub fn open_incident(
        &self,
        target_id: i64,
        kind: IncidentKind,
        started_at: DateTime<Utc>,
        message: &str,
    ) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO incidents (target_id, kind, started_at, resolved, message)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![target_id, kind.as_str(), fmt_db_time(started_at), message],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get the open incident for a (target, kind) pair, if any.
    pub fn get_open_incident(
        &self,
        target_id: i64,
        kind: IncidentKind,
    ) -> Result<Option<Incident>, DbError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, target_id, kind, started_at, ended_at, resolved, message FROM incidents
                 WHERE target_id = ?1 AND kind = ?2 AND resolved = 0 ORDER BY started_at DESC LIMIT 1",
                params![target_id, kind.as_str()],
                incident_from_row,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(row)
    }

    /// Close an incident, setting its end time and resolved flag.
    pub fn close_incident(&self, id: i64, ended_at: DateTime<Utc>) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE incidents SET ended_at = ?1, resolved = 1 WHERE id = ?2",
            params![fmt_db_time(ended_at), id],
        )?;
        Ok(())
    }

    /// Replace the message on an open incident.
    pub fn update_incident_message(&self, id: i64, message: &str) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE incidents SET message = ?1 WHERE id = ?2",
            params![message, id],
        )?;
        Ok(())
    }

    /// Get an incident by ID.
    pub fn get_incident(&self, id: i64) -> Result<Incident, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, target_id, kind, started_at, ended_at, resolved, message FROM incidents WHERE id = ?1",
            params![id],
            incident_from_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::NotFound,
            other => DbError::Sqlite(other),
        })
    }

    /// Get incidents for a target, newest first.
    pub fn get_incidents_for_target(
        &self,
        target_id: i64,
        limit: i32,
    ) -> Result<Vec<Incident>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, target_id, kind, started_at, ended_at, resolved, message FROM incidents
             WHERE target_id = ?1 ORDER BY started_at DESC LIMIT ?2",
        )?;
        let incidents = stmt
            .query_map(params![target_id, limit], incident_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(incidents)
    }

    /// Get incidents across all targets, newest first.
    pub fn get_incidents(&self, limit: i32) -> Result<Vec<Incident>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, target_id, kind, started_at, ended_at, resolved, message FROM incidents
             ORDER BY started_at DESC LIMIT ?1",
        )?;
        let incidents = stmt
            .query_map(params![limit], incident_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(incidents)
    }

    /// Delete resolved incidents that ended before a cutoff.
    pub fn delete_resolved_incidents_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, DbError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM incidents WHERE resolved = 1 AND ended_at < ?1",
            params![fmt_db_time(cutoff)],
        )?;
        Ok(n)
    }
}

fn target_from_row(row: &rusqlite::Row<'_>) -> SqlResult<Target> {
    let ssl: i64 = row.get(9)?;
    let created_str: String = row.get(10)?;
    Ok(Target {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        probe_kind: row.get(3)?,
        keyword: row.get(4)?,
        port: row.get(5)?,
        slow_threshold_ms: row.get(6)?,
        down_threshold_ms: row.get(7)?,
        check_interval_secs: row.get(8)?,
        ssl_monitoring: ssl != 0,
        created_at: parse_db_time(&created_str).unwrap_or_else(Utc::now),
    })
}

fn incident_from_row(row: &rusqlite::Row<'_>) -> SqlResult<Incident> {
    let kind_str: String = row.get(2)?;
    let kind = IncidentKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown incident kind: {}", kind_str).into(),
        )
    })?;
    let started_str: String = row.get(3)?;
    let ended_str: Option<String> = row.get(4)?;
    let resolved: i64 = row.get(5)?;
    Ok(Incident {
        id: row.get(0)?,
        target_id: row.get(1)?,
        kind,
        started_at: parse_db_time(&started_str).unwrap_or_else(Utc::now),
        ended_at: ended_str.as_deref().and_then(parse_db_time),
        resolved: resolved != 0,
        message: row.get(6)?,
    })
}

/// Format a datetime for storage.
pub fn fmt_db_time(dt: DateTime<Utc>) -> String {
    dt.format(TIME_FMT).to_string()
}

/// Parse a datetime string from the database.
pub fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    // Try various formats
    let formats = [
        "%Y-%m-%d %H:%M:%S%.9f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.9fZ",
        "%Y-%m-%dT%H:%M:%SZ",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    // Try ISO 8601
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::NamedTempFile;

    fn test_store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    #[test]
    fn test_target_crud() {
        let (_tmp, store) = test_store();

        // Create
        let mut target = Target {
            name: "Test".to_string(),
            url: "https://example.com".to_string(),
            probe_kind: "https".to_string(),
            ..Default::default()
        };
        let id = store.add_target(&mut target).unwrap();
        assert!(id > 0);

        // Read
        let fetched = store.get_target(id).unwrap();
        assert_eq!(fetched.name, "Test");
        assert_eq!(fetched.slow_threshold_ms, 5_000.0);

        // Update
        let mut updated = fetched;
        updated.name = "Updated".to_string();
        updated.slow_threshold_ms = 2_000.0;
        store.update_target(&updated).unwrap();

        let fetched2 = store.get_target(id).unwrap();
        assert_eq!(fetched2.name, "Updated");
        assert_eq!(fetched2.slow_threshold_ms, 2_000.0);

        // Delete
        store.delete_target(id, Utc::now()).unwrap();
        assert!(store.get_target(id).is_err());
    }

    #[test]
    fn test_results_range_query() {
        let (_tmp, store) = test_store();

        let mut target = Target {
            name: "api".to_string(),
            url: "https://api.example.com".to_string(),
            ..Default::default()
        };
        let id = store.add_target(&mut target).unwrap();

        let base = Utc::now() - Duration::minutes(10);
        for i in 0..5 {
            store
                .add_result(&ProbeResult {
                    target_id: id,
                    time: base + Duration::minutes(i),
                    success: true,
                    latency_ms: Some(100.0 + i as f64),
                    status_code: Some(200),
                    tls_days_remaining: None,
                })
                .unwrap();
        }

        let all = store
            .get_results(id, base - Duration::minutes(1), Utc::now(), i32::MAX)
            .unwrap();
        assert_eq!(all.len(), 5);

        // Window excludes the first two
        let partial = store
            .get_results(id, base + Duration::minutes(2), Utc::now(), i32::MAX)
            .unwrap();
        assert_eq!(partial.len(), 3);
        assert_eq!(partial[0].latency_ms, Some(102.0));

        // Retention cut
        let deleted = store
            .delete_results_before(id, base + Duration::minutes(3))
            .unwrap();
        assert_eq!(deleted, 3);
    }

    #[test]
    fn test_incident_lifecycle() {
        let (_tmp, store) = test_store();

        let start = Utc::now() - Duration::minutes(5);
        let id = store
            .open_incident(1, IncidentKind::Down, start, "api is down")
            .unwrap();

        let open = store.get_open_incident(1, IncidentKind::Down).unwrap();
        assert!(open.is_some());
        assert!(!open.unwrap().resolved);

        // No open incident of a different kind
        assert!(store.get_open_incident(1, IncidentKind::Slow).unwrap().is_none());

        let end = Utc::now();
        store.close_incident(id, end).unwrap();

        assert!(store.get_open_incident(1, IncidentKind::Down).unwrap().is_none());

        let closed = store.get_incident(id).unwrap();
        assert!(closed.resolved);
        assert!(closed.ended_at.is_some());
        assert!(closed.duration_secs().unwrap() >= 0);
    }

    #[test]
    fn test_delete_target_closes_incidents() {
        let (_tmp, store) = test_store();

        let mut target = Target {
            name: "doomed".to_string(),
            url: "https://doomed.example.com".to_string(),
            ..Default::default()
        };
        let id = store.add_target(&mut target).unwrap();
        store
            .open_incident(id, IncidentKind::Down, Utc::now(), "down")
            .unwrap();

        store.delete_target(id, Utc::now()).unwrap();

        let incidents = store.get_incidents_for_target(id, 10).unwrap();
        assert_eq!(incidents.len(), 1);
        assert!(incidents[0].resolved);
        assert!(incidents[0].message.contains("target removed"));
    }

    #[test]
    fn test_state_upsert() {
        let (_tmp, store) = test_store();

        assert!(store.get_state(7).unwrap().is_none());

        let now = Utc::now();
        store
            .upsert_state(&TargetStateRow {
                target_id: 7,
                status: Status::Healthy,
                last_change: Some(now),
                last_result: Some(now),
            })
            .unwrap();

        let row = store.get_state(7).unwrap().unwrap();
        assert_eq!(row.status, Status::Healthy);

        store
            .upsert_state(&TargetStateRow {
                target_id: 7,
                status: Status::Down,
                last_change: Some(now),
                last_result: Some(now),
            })
            .unwrap();

        let row = store.get_state(7).unwrap().unwrap();
        assert_eq!(row.status, Status::Down);
    }

    #[test]
    fn test_parse_db_time_formats() {
        assert!(parse_db_time("2024-01-01 12:00:00.123456789").is_some());
        assert!(parse_db_time("2024-01-01 12:00:00").is_some());
        assert!(parse_db_time("2024-01-01T12:00:00Z").is_some());
        assert!(parse_db_time("not a time").is_none());
    }
}
