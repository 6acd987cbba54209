//! Record builders shared by tests across the workspace.

use crate::incident::Incident;
use crate::status::{IncidentStatus, Severity};
use chrono::{DateTime, Duration, TimeZone, Utc};

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0)
        .single()
        .unwrap_or_default()
}

/// Minimal record with the given id and status.
pub fn incident(id: &str, status: IncidentStatus) -> Incident {
    Incident {
        incident_id: id.to_string(),
        severity: None,
        status,
        created_at: epoch(),
        resolved_at: None,
        estimated_users_affected: 0,
        triage_summary_snippet: None,
        blast_radius: Vec::new(),
        runbook_hits: Vec::new(),
        suspect_commits: Vec::new(),
        actions_log: Vec::new(),
        slack_message_id: None,
        alert_source: None,
    }
}

/// Record created `offset_secs` after a fixed base instant.
pub fn incident_at(id: &str, status: IncidentStatus, offset_secs: i64) -> Incident {
    Incident {
        created_at: epoch() + Duration::seconds(offset_secs),
        ..incident(id, status)
    }
}

pub fn with_impact(mut incident: Incident, severity: Severity, users: u64) -> Incident {
    incident.severity = Some(severity);
    incident.estimated_users_affected = users;
    incident
}
