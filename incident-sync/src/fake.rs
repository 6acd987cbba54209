//! In-memory [`IncidentApi`] with scripted latency and failures.

use crate::api::IncidentApi;
use crate::error::ApiError;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use incident_model::{
    sort_newest_first, Incident, IncidentStatus, Postmortem, ReplayReceipt, ReplayRequest, Repo,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const INCIDENT_NOT_FOUND: &str = "Incident not found";
const POSTMORTEM_PENDING: &str = "Postmortem not yet generated";

#[derive(Default)]
struct FakeState {
    incidents: Vec<Incident>,
    postmortems: HashMap<String, Postmortem>,
    repos: Vec<Repo>,

    list_delays: VecDeque<Duration>,
    list_failures: VecDeque<ApiError>,
    detail_delays: HashMap<String, Duration>,
    detail_failures: HashMap<String, VecDeque<ApiError>>,
    action_delay: Duration,
    replay_ids: VecDeque<String>,

    list_calls: usize,
    list_completions: usize,
    detail_calls: HashMap<String, usize>,
    resolve_calls: HashMap<String, usize>,
    replay_calls: usize,
}

/// Backend double. Each response reflects the state at the moment the
/// request was received, not when its delay elapses.
#[derive(Default)]
pub struct FakeApi {
    state: Mutex<FakeState>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a record by id.
    pub fn upsert(&self, incident: Incident) {
        let mut state = self.state();
        match state
            .incidents
            .iter_mut()
            .find(|i| i.incident_id == incident.incident_id)
        {
            Some(existing) => *existing = incident,
            None => state.incidents.push(incident),
        }
    }

    pub fn set_status(&self, incident_id: &str, status: IncidentStatus) {
        let mut state = self.state();
        if let Some(incident) = state
            .incidents
            .iter_mut()
            .find(|i| i.incident_id == incident_id)
        {
            incident.status = status;
        }
    }

    pub fn remove(&self, incident_id: &str) {
        self.state().incidents.retain(|i| i.incident_id != incident_id);
    }

    pub fn status_of(&self, incident_id: &str) -> Option<IncidentStatus> {
        self.state()
            .incidents
            .iter()
            .find(|i| i.incident_id == incident_id)
            .map(|i| i.status)
    }

    pub fn add_postmortem(&self, postmortem: Postmortem) {
        self.state()
            .postmortems
            .insert(postmortem.incident_id.clone(), postmortem);
    }

    pub fn add_repo(&self, repo: Repo) {
        self.state().repos.push(repo);
    }

    /// Delay the next list response; queued delays apply in request order.
    pub fn push_list_delay(&self, delay: Duration) {
        self.state().list_delays.push_back(delay);
    }

    pub fn push_list_failure(&self, err: ApiError) {
        self.state().list_failures.push_back(err);
    }

    /// Delay every detail response for `incident_id`.
    pub fn set_detail_delay(&self, incident_id: &str, delay: Duration) {
        self.state()
            .detail_delays
            .insert(incident_id.to_string(), delay);
    }

    pub fn push_detail_failure(&self, incident_id: &str, err: ApiError) {
        self.state()
            .detail_failures
            .entry(incident_id.to_string())
            .or_default()
            .push_back(err);
    }

    pub fn set_action_delay(&self, delay: Duration) {
        self.state().action_delay = delay;
    }

    /// Identifier the next replay creates. Generated when none is queued.
    pub fn push_replay_id(&self, incident_id: &str) {
        self.state().replay_ids.push_back(incident_id.to_string());
    }

    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }

    /// List requests whose delay elapsed, i.e. that were not cancelled first.
    pub fn list_completions(&self) -> usize {
        self.state().list_completions
    }

    pub fn detail_calls(&self, incident_id: &str) -> usize {
        self.state()
            .detail_calls
            .get(incident_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn resolve_calls(&self, incident_id: &str) -> usize {
        self.state()
            .resolve_calls
            .get(incident_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn replay_calls(&self) -> usize {
        self.state().replay_calls
    }
}

async fn after(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

fn not_found(detail: &str) -> ApiError {
    ApiError::NotFound {
        detail: detail.to_string(),
    }
}

#[async_trait]
impl IncidentApi for FakeApi {
    async fn list_incidents(&self, limit: usize) -> Result<Vec<Incident>, ApiError> {
        let (delay, response) = {
            let mut state = self.state();
            state.list_calls += 1;
            let delay = state.list_delays.pop_front().unwrap_or_default();
            let response = match state.list_failures.pop_front() {
                Some(err) => Err(err),
                None => {
                    let mut incidents = state.incidents.clone();
                    sort_newest_first(&mut incidents);
                    incidents.truncate(limit);
                    Ok(incidents)
                }
            };
            (delay, response)
        };
        after(delay).await;
        self.state().list_completions += 1;
        response
    }

    async fn get_incident(&self, incident_id: &str) -> Result<Incident, ApiError> {
        let (delay, response) = {
            let mut state = self.state();
            *state.detail_calls.entry(incident_id.to_string()).or_default() += 1;
            let delay = state
                .detail_delays
                .get(incident_id)
                .copied()
                .unwrap_or_default();
            let failure = state
                .detail_failures
                .get_mut(incident_id)
                .and_then(VecDeque::pop_front);
            let response = match failure {
                Some(err) => Err(err),
                None => state
                    .incidents
                    .iter()
                    .find(|i| i.incident_id == incident_id)
                    .cloned()
                    .ok_or_else(|| not_found(INCIDENT_NOT_FOUND)),
            };
            (delay, response)
        };
        after(delay).await;
        response
    }

    async fn get_postmortem(&self, incident_id: &str) -> Result<Postmortem, ApiError> {
        let state = self.state();
        if !state.incidents.iter().any(|i| i.incident_id == incident_id) {
            return Err(not_found(INCIDENT_NOT_FOUND));
        }
        state
            .postmortems
            .get(incident_id)
            .cloned()
            .ok_or_else(|| not_found(POSTMORTEM_PENDING))
    }

    async fn resolve(&self, incident_id: &str) -> Result<(), ApiError> {
        let delay = {
            let mut state = self.state();
            *state.resolve_calls.entry(incident_id.to_string()).or_default() += 1;
            state.action_delay
        };
        after(delay).await;

        let mut state = self.state();
        let incident = state
            .incidents
            .iter_mut()
            .find(|i| i.incident_id == incident_id)
            .ok_or_else(|| not_found(INCIDENT_NOT_FOUND))?;
        incident.status = IncidentStatus::Resolved;
        incident.resolved_at = Some(Utc::now());
        Ok(())
    }

    async fn replay(&self, request: &ReplayRequest) -> Result<ReplayReceipt, ApiError> {
        let delay = {
            let mut state = self.state();
            state.replay_calls += 1;
            state.action_delay
        };
        after(delay).await;

        let mut state = self.state();
        let incident_id = state
            .replay_ids
            .pop_front()
            .unwrap_or_else(|| format!("replay-{}", state.replay_calls));
        let created_at = state
            .incidents
            .iter()
            .map(|i| i.created_at)
            .max()
            .map_or_else(Utc::now, |newest| newest + ChronoDuration::seconds(1));
        let mut incident = incident_model::testing::incident(&incident_id, IncidentStatus::Ingested);
        incident.created_at = created_at;
        incident.alert_source = Some(format!("Replay: {}", request.payload_name));
        state.incidents.push(incident);

        Ok(ReplayReceipt {
            incident_id,
            status: Some(IncidentStatus::Ingested.as_str().to_string()),
        })
    }

    async fn list_repos(&self) -> Result<Vec<Repo>, ApiError> {
        Ok(self.state().repos.clone())
    }
}
