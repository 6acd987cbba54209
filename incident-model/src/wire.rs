use crate::incident::Incident;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payload replayed when the caller does not name one.
pub const DEFAULT_REPLAY_PAYLOAD: &str = "payments_service_high";

/// Records are kept raw so one malformed entry does not fail the whole page.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IncidentPage {
    #[serde(default)]
    pub incidents: Vec<serde_json::Value>,
    #[serde(default)]
    pub count: Option<usize>,
}

impl IncidentPage {
    /// Decode each record on its own, in page order.
    pub fn decode(self) -> impl Iterator<Item = Result<Incident, serde_json::Error>> {
        self.incidents.into_iter().map(serde_json::from_value)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Postmortem {
    pub incident_id: String,
    pub content: String,
    #[serde(default)]
    pub s3_path: Option<String>,
}

/// A repository connected to the pipeline. Tokens are never served.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Repo {
    pub repo_id: String,
    #[serde(default)]
    pub github_url: String,
    #[serde(default)]
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub incident_count: u64,
    #[serde(default)]
    pub last_incident_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RepoPage {
    #[serde(default)]
    pub repos: Vec<Repo>,
    #[serde(default)]
    pub count: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub incident_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayRequest {
    pub payload_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_payload: Option<serde_json::Value>,
}

impl ReplayRequest {
    pub fn named(payload_name: impl Into<String>) -> Self {
        Self {
            payload_name: payload_name.into(),
            custom_payload: None,
        }
    }

    pub fn custom(payload_name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            payload_name: payload_name.into(),
            custom_payload: Some(payload),
        }
    }
}

impl Default for ReplayRequest {
    fn default() -> Self {
        Self::named(DEFAULT_REPLAY_PAYLOAD)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayReceipt {
    pub incident_id: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Body of every non-success response. `detail` is shown to the user verbatim.
#[derive(Clone, Debug, Deserialize)]
pub struct ErrorBody {
    pub detail: serde_json::Value,
}

impl ErrorBody {
    pub fn message(&self) -> Option<String> {
        match &self.detail {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            _ => None,
        }
    }
}
