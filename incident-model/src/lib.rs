//! Incident records as produced by the response pipeline, plus the request and
//! response bodies of its read API.

pub mod incident;
pub mod status;
pub mod testing;
pub mod wire;

pub use incident::{sort_newest_first, ActionRecord, Incident, RunbookHit, SuspectCommit};
pub use status::{IncidentStatus, Severity};
pub use wire::{
    ErrorBody, IncidentPage, Postmortem, ReplayReceipt, ReplayRequest, Repo, RepoPage,
    ResolveRequest, DEFAULT_REPLAY_PAYLOAD,
};

/// Reject records a consumer cannot key on.
pub fn validate_incident(incident: &Incident) -> Result<(), String> {
    if incident.incident_id.trim().is_empty() {
        return Err("incident_id is required".into());
    }
    Ok(())
}
