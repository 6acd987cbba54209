//! Status-change and arrival detection over successive list snapshots.

use incident_model::{Incident, IncidentStatus};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusChange {
    pub incident_id: String,
    pub from: IncidentStatus,
    pub to: IncidentStatus,
}

/// What changed between two snapshots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransitionDiff {
    pub status_changes: Vec<StatusChange>,
    /// Ids present only in the current snapshot, in snapshot order.
    pub arrivals: Vec<String>,
}

impl TransitionDiff {
    pub fn is_empty(&self) -> bool {
        self.status_changes.is_empty() && self.arrivals.is_empty()
    }
}

/// Compare two snapshots by `incident_id`. Identical statuses are not changes.
pub fn diff(previous: &[Incident], current: &[Incident]) -> TransitionDiff {
    let before: HashMap<&str, IncidentStatus> = previous
        .iter()
        .map(|i| (i.incident_id.as_str(), i.status))
        .collect();

    let mut out = TransitionDiff::default();
    let mut seen = HashSet::new();
    for incident in current {
        let id = incident.incident_id.as_str();
        if !seen.insert(id) {
            continue;
        }
        match before.get(id) {
            Some(from) if *from != incident.status => out.status_changes.push(StatusChange {
                incident_id: id.to_string(),
                from: *from,
                to: incident.status,
            }),
            Some(_) => {}
            None => out.arrivals.push(id.to_string()),
        }
    }
    out
}

/// Published view of the tracker at one instant.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transitions {
    /// Status each incident had before its most recent change.
    pub previous_status: BTreeMap<String, IncidentStatus>,
    pub newly_arrived: BTreeSet<String>,
}

impl Transitions {
    pub fn previous_status(&self, incident_id: &str) -> Option<IncidentStatus> {
        self.previous_status.get(incident_id).copied()
    }

    pub fn is_newly_arrived(&self, incident_id: &str) -> bool {
        self.newly_arrived.contains(incident_id)
    }
}

/// Holds diff results between snapshots and expires arrivals after a window.
#[derive(Clone, Debug)]
pub struct TransitionTracker {
    window: Duration,
    previous_status: HashMap<String, IncidentStatus>,
    arrived_at: HashMap<String, Instant>,
}

impl TransitionTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            previous_status: HashMap::new(),
            arrived_at: HashMap::new(),
        }
    }

    /// Record a diff detected at `now`. A change overwrites the earlier
    /// record for the same incident.
    pub fn record(&mut self, diff: &TransitionDiff, now: Instant) {
        for change in &diff.status_changes {
            self.previous_status
                .insert(change.incident_id.clone(), change.from);
        }
        for id in &diff.arrivals {
            self.arrived_at.insert(id.clone(), now);
        }
    }

    /// Forget status records of incidents that left the held window.
    pub fn retain_present(&mut self, current: &[Incident]) {
        let present: HashSet<&str> = current.iter().map(|i| i.incident_id.as_str()).collect();
        self.previous_status
            .retain(|id, _| present.contains(id.as_str()));
    }

    /// Drop arrivals whose window has elapsed. Returns whether anything was dropped.
    pub fn evict_expired(&mut self, now: Instant) -> bool {
        let window = self.window;
        let before = self.arrived_at.len();
        self.arrived_at
            .retain(|_, detected| now.saturating_duration_since(*detected) < window);
        self.arrived_at.len() != before
    }

    /// Earliest instant at which an arrival expires.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.arrived_at
            .values()
            .map(|detected| *detected + self.window)
            .min()
    }

    pub fn previous_status(&self, incident_id: &str) -> Option<IncidentStatus> {
        self.previous_status.get(incident_id).copied()
    }

    pub fn is_newly_arrived(&self, incident_id: &str, now: Instant) -> bool {
        self.arrived_at
            .get(incident_id)
            .is_some_and(|detected| now.saturating_duration_since(*detected) < self.window)
    }

    pub fn snapshot(&self, now: Instant) -> Transitions {
        Transitions {
            previous_status: self
                .previous_status
                .iter()
                .map(|(id, status)| (id.clone(), *status))
                .collect(),
            newly_arrived: self
                .arrived_at
                .keys()
                .filter(|id| self.is_newly_arrived(id, now))
                .cloned()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use incident_model::testing::incident;
    use IncidentStatus::*;

    const WINDOW: Duration = Duration::from_millis(2000);

    #[test]
    fn status_change_records_previous_status() {
        let prev = vec![incident("1", Triaged)];
        let cur = vec![incident("1", Investigating)];

        let d = diff(&prev, &cur);
        assert_eq!(
            d.status_changes,
            vec![StatusChange {
                incident_id: "1".into(),
                from: Triaged,
                to: Investigating,
            }]
        );
        assert!(d.arrivals.is_empty());

        let now = Instant::now();
        let mut tracker = TransitionTracker::new(WINDOW);
        tracker.record(&d, now);
        assert_eq!(tracker.previous_status("1"), Some(Triaged));
        assert!(!tracker.is_newly_arrived("1", now));
    }

    #[test]
    fn new_incident_is_arrival_until_window_elapses() {
        let d = diff(&[], &[incident("2", Ingested)]);
        assert_eq!(d.arrivals, vec!["2".to_string()]);

        let detected = Instant::now();
        let mut tracker = TransitionTracker::new(WINDOW);
        tracker.record(&d, detected);

        assert!(tracker.is_newly_arrived("2", detected + Duration::from_millis(1999)));
        assert!(!tracker.is_newly_arrived("2", detected + WINDOW));
        assert_eq!(tracker.next_expiry(), Some(detected + WINDOW));

        assert!(!tracker.evict_expired(detected + Duration::from_millis(500)));
        assert!(tracker.evict_expired(detected + WINDOW));
        assert_eq!(tracker.next_expiry(), None);
        assert!(tracker.snapshot(detected + WINDOW).newly_arrived.is_empty());
    }

    #[test]
    fn identical_status_is_a_no_op() {
        let prev = vec![incident("1", Resolved)];
        let d = diff(&prev, &prev.clone());
        assert!(d.is_empty());
    }

    #[test]
    fn record_persists_until_next_change() {
        let now = Instant::now();
        let mut tracker = TransitionTracker::new(WINDOW);

        let a = vec![incident("1", Triaged)];
        let b = vec![incident("1", Investigating)];
        let c = vec![incident("1", WarRoomPosted)];

        tracker.record(&diff(&a, &b), now);
        // same status again: record unchanged
        tracker.record(&diff(&b, &b), now + Duration::from_secs(60));
        assert_eq!(tracker.previous_status("1"), Some(Triaged));

        tracker.record(&diff(&b, &c), now + Duration::from_secs(120));
        assert_eq!(tracker.previous_status("1"), Some(Investigating));
    }

    #[test]
    fn backwards_and_unknown_transitions_are_reported() {
        let d = diff(
            &[incident("1", Resolved), incident("2", Triaged)],
            &[incident("1", Investigating), incident("2", Unknown)],
        );
        assert_eq!(d.status_changes.len(), 2);
        assert_eq!(d.status_changes[0].from, Resolved);
        assert_eq!(d.status_changes[1].to, Unknown);
    }

    #[test]
    fn removed_incidents_are_not_reported() {
        let d = diff(&[incident("1", Triaged), incident("2", Triaged)], &[incident("2", Triaged)]);
        assert!(d.is_empty());
    }

    #[test]
    fn duplicate_ids_in_snapshot_arrive_once() {
        let d = diff(&[], &[incident("7", Ingested), incident("7", Ingested)]);
        assert_eq!(d.arrivals, vec!["7".to_string()]);
    }

    #[test]
    fn retain_present_prunes_departed_records() {
        let now = Instant::now();
        let mut tracker = TransitionTracker::new(WINDOW);
        tracker.record(&diff(&[incident("1", Triaged)], &[incident("1", Resolved)]), now);
        tracker.retain_present(&[incident("9", Ingested)]);
        assert_eq!(tracker.previous_status("1"), None);
    }
}
