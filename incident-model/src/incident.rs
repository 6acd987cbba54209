use crate::status::{IncidentStatus, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// One incident record as served by the backend.
///
/// The pipeline fills fields in as it progresses, so most of them are absent
/// or `null` on a freshly ingested incident. Absent collections decode as
/// empty and absent counts as zero.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub incident_id: String,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub status: IncidentStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub estimated_users_affected: u64,
    #[serde(default)]
    pub triage_summary_snippet: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub blast_radius: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub runbook_hits: Vec<RunbookHit>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub suspect_commits: Vec<SuspectCommit>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub actions_log: Vec<ActionRecord>,
    #[serde(default)]
    pub slack_message_id: Option<String>,
    #[serde(default)]
    pub alert_source: Option<String>,
}

impl Incident {
    pub fn is_high_severity(&self) -> bool {
        self.severity == Some(Severity::High)
    }

    /// The war room milestone has fired once a chat message id is present.
    pub fn war_room_posted(&self) -> bool {
        self.slack_message_id.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunbookHit {
    #[serde(default)]
    pub runbook_id: String,
    #[serde(default)]
    pub section: String,
    #[serde(default, deserialize_with = "lenient_score")]
    pub relevance: f64,
    #[serde(default)]
    pub first_action_step: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuspectCommit {
    #[serde(default, alias = "commit_hash")]
    pub sha: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub repo: String,
    #[serde(default, deserialize_with = "lenient_score")]
    pub confidence: f64,
}

/// Entry of the append-only agent audit trail.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub ts: DateTime<Utc>,
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub action_type: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Sort newest-first by `created_at`. Stable, so equal timestamps keep backend order.
pub fn sort_newest_first(incidents: &mut [Incident]) {
    incidents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// The backend stores numbers as decimals, so counts may arrive as `1200.0`.
fn lenient_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0);
    if value.is_finite() && value > 0.0 {
        Ok(value as u64)
    } else {
        Ok(0)
    }
}

fn lenient_score<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}
