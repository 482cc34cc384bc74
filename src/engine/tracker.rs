//! Per-target state tracking with hysteresis.
//!
//! Converts a stream of per-result classifications into committed status
//! transitions, filtering out single-probe noise: a flip is committed only
//! after N consecutive results agree on the new classification.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::Status;

use super::classifier::Classification;

/// A probe result older than the last observed one for the same target.
/// Rejected so it cannot perturb the streak counter.
#[derive(Debug, Error)]
#[error("stale result: {at} is older than last observed {last}")]
pub struct StaleResult {
    pub at: DateTime<Utc>,
    pub last: DateTime<Utc>,
}

/// A committed status flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Status,
    pub to: Status,
    pub at: DateTime<Utc>,
}

impl From<Classification> for Status {
    fn from(c: Classification) -> Self {
        match c {
            Classification::Healthy => Status::Healthy,
            Classification::Slow => Status::Slow,
            Classification::Down => Status::Down,
        }
    }
}

/// Hysteresis-filtered state machine for one target.
#[derive(Debug)]
pub struct StateTracker {
    stable: Status,
    streak: Option<(Classification, u32)>,
    last_change: Option<DateTime<Utc>>,
    last_result: Option<DateTime<Utc>>,
    confirmations: u32,
}

impl StateTracker {
    pub fn new(confirmations: u32) -> Self {
        Self {
            stable: Status::Unknown,
            streak: None,
            last_change: None,
            last_result: None,
            confirmations: confirmations.max(1),
        }
    }

    /// Resume from a previously committed status, e.g. after a restart.
    pub fn with_status(
        confirmations: u32,
        status: Status,
        last_change: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            stable: status,
            streak: None,
            last_change,
            last_result: None,
            confirmations: confirmations.max(1),
        }
    }

    pub fn status(&self) -> Status {
        self.stable
    }

    pub fn last_change(&self) -> Option<DateTime<Utc>> {
        self.last_change
    }

    pub fn last_result(&self) -> Option<DateTime<Utc>> {
        self.last_result
    }

    /// Feed one classification into the tracker.
    ///
    /// Returns a `Transition` only on the tick that commits a flip.
    pub fn observe(
        &mut self,
        classification: Classification,
        at: DateTime<Utc>,
    ) -> Result<Option<Transition>, StaleResult> {
        if let Some(last) = self.last_result {
            if at < last {
                return Err(StaleResult { at, last });
            }
        }
        self.last_result = Some(at);

        if Status::from(classification) == self.stable {
            // Back in line with the committed status: any competing streak dies.
            self.streak = None;
            return Ok(None);
        }

        let count = match self.streak {
            Some((c, n)) if c == classification => n + 1,
            _ => 1,
        };

        if count >= self.confirmations {
            let from = self.stable;
            self.stable = classification.into();
            self.last_change = Some(at);
            self.streak = None;
            return Ok(Some(Transition {
                from,
                to: self.stable,
                at,
            }));
        }

        self.streak = Some((classification, count));
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(offset_secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + offset_secs, 0).unwrap()
    }

    fn settle_healthy(tracker: &mut StateTracker, base: i64) -> i64 {
        let mut t = base;
        loop {
            let r = tracker.observe(Classification::Healthy, ts(t)).unwrap();
            t += 1;
            if r.is_some() {
                return t;
            }
        }
    }

    #[test]
    fn initial_state_is_unknown() {
        let tracker = StateTracker::new(2);
        assert_eq!(tracker.status(), Status::Unknown);
    }

    #[test]
    fn commits_after_n_consecutive() {
        let mut tracker = StateTracker::new(2);

        assert!(tracker.observe(Classification::Healthy, ts(0)).unwrap().is_none());
        let t = tracker.observe(Classification::Healthy, ts(1)).unwrap();
        assert_eq!(
            t,
            Some(Transition {
                from: Status::Unknown,
                to: Status::Healthy,
                at: ts(1),
            })
        );
        assert_eq!(tracker.status(), Status::Healthy);
        assert_eq!(tracker.last_change(), Some(ts(1)));
    }

    #[test]
    fn single_outlier_never_flips() {
        let mut tracker = StateTracker::new(2);
        let t = settle_healthy(&mut tracker, 0);

        assert!(tracker.observe(Classification::Down, ts(t)).unwrap().is_none());
        assert_eq!(tracker.status(), Status::Healthy);

        // Back to healthy: the down streak is reset, no flip ever happens.
        assert!(tracker.observe(Classification::Healthy, ts(t + 1)).unwrap().is_none());
        assert!(tracker.observe(Classification::Down, ts(t + 2)).unwrap().is_none());
        assert_eq!(tracker.status(), Status::Healthy);
    }

    #[test]
    fn n_consecutive_commits_exactly_one_transition() {
        let mut tracker = StateTracker::new(2);
        let t = settle_healthy(&mut tracker, 0);

        assert!(tracker.observe(Classification::Down, ts(t)).unwrap().is_none());
        let flip = tracker.observe(Classification::Down, ts(t + 1)).unwrap();
        assert_eq!(
            flip,
            Some(Transition {
                from: Status::Healthy,
                to: Status::Down,
                at: ts(t + 1),
            })
        );

        // Further down results produce no additional transitions.
        assert!(tracker.observe(Classification::Down, ts(t + 2)).unwrap().is_none());
        assert!(tracker.observe(Classification::Down, ts(t + 3)).unwrap().is_none());
        assert_eq!(tracker.status(), Status::Down);
    }

    #[test]
    fn competing_streaks_reset_each_other() {
        let mut tracker = StateTracker::new(3);
        let t = settle_healthy(&mut tracker, 0);

        assert!(tracker.observe(Classification::Down, ts(t)).unwrap().is_none());
        assert!(tracker.observe(Classification::Down, ts(t + 1)).unwrap().is_none());
        // A slow result interrupts the down streak; neither reaches 3.
        assert!(tracker.observe(Classification::Slow, ts(t + 2)).unwrap().is_none());
        assert!(tracker.observe(Classification::Down, ts(t + 3)).unwrap().is_none());
        assert!(tracker.observe(Classification::Down, ts(t + 4)).unwrap().is_none());
        assert_eq!(tracker.status(), Status::Healthy);

        let flip = tracker.observe(Classification::Down, ts(t + 5)).unwrap();
        assert!(flip.is_some());
        assert_eq!(tracker.status(), Status::Down);
    }

    #[test]
    fn stale_result_rejected_and_streak_untouched() {
        let mut tracker = StateTracker::new(2);
        let t = settle_healthy(&mut tracker, 0);

        assert!(tracker.observe(Classification::Down, ts(t)).unwrap().is_none());
        // Out-of-order result must not advance or reset the streak.
        assert!(tracker.observe(Classification::Down, ts(t - 10)).is_err());
        assert_eq!(tracker.status(), Status::Healthy);

        let flip = tracker.observe(Classification::Down, ts(t + 1)).unwrap();
        assert!(flip.is_some());
    }

    #[test]
    fn confirmations_of_one_flips_immediately() {
        let mut tracker = StateTracker::new(1);
        let flip = tracker.observe(Classification::Down, ts(0)).unwrap();
        assert_eq!(tracker.status(), Status::Down);
        assert_eq!(flip.unwrap().from, Status::Unknown);
    }

    #[test]
    fn recovery_scenario_duration() {
        // downThreshold-style scenario from the product spec: healthy target
        // goes down for two probes, then recovers after two healthy probes.
        let mut tracker = StateTracker::new(2);
        let t = settle_healthy(&mut tracker, 0);

        tracker.observe(Classification::Down, ts(t)).unwrap();
        let down = tracker.observe(Classification::Down, ts(t + 1)).unwrap().unwrap();
        assert_eq!(down.to, Status::Down);

        tracker.observe(Classification::Healthy, ts(t + 2)).unwrap();
        let up = tracker.observe(Classification::Healthy, ts(t + 3)).unwrap().unwrap();
        assert_eq!(up.from, Status::Down);
        assert_eq!(up.to, Status::Healthy);
        assert_eq!((up.at - down.at).num_seconds(), 2);
    }

    #[test]
    fn resumed_tracker_does_not_reflip_to_same_status() {
        let mut tracker = StateTracker::with_status(2, Status::Down, Some(ts(0)));
        assert!(tracker.observe(Classification::Down, ts(1)).unwrap().is_none());
        assert_eq!(tracker.status(), Status::Down);
    }
}
