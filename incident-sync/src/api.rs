use crate::error::ApiError;
use async_trait::async_trait;
use incident_model::{Incident, Postmortem, ReplayReceipt, ReplayRequest, Repo};

/// Read and action endpoints of the incident backend.
///
/// Implementations must be cheap to share: synchronizers hold an `Arc` and
/// issue overlapping requests from a single task.
#[async_trait]
pub trait IncidentApi: Send + Sync + 'static {
    /// Most recent incidents, newest first, at most `limit`.
    async fn list_incidents(&self, limit: usize) -> Result<Vec<Incident>, ApiError>;

    async fn get_incident(&self, incident_id: &str) -> Result<Incident, ApiError>;

    async fn get_postmortem(&self, incident_id: &str) -> Result<Postmortem, ApiError>;

    async fn resolve(&self, incident_id: &str) -> Result<(), ApiError>;

    async fn replay(&self, request: &ReplayRequest) -> Result<ReplayReceipt, ApiError>;

    async fn list_repos(&self) -> Result<Vec<Repo>, ApiError>;
}
