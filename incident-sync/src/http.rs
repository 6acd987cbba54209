use crate::api::IncidentApi;
use crate::error::ApiError;
use async_trait::async_trait;
use incident_model::{
    ErrorBody, Incident, IncidentPage, Postmortem, ReplayReceipt, ReplayRequest, Repo, RepoPage,
    ResolveRequest,
};
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{instrument, warn};

/// [`IncidentApi`] over the backend's JSON HTTP API.
#[derive(Clone, Debug)]
pub struct HttpIncidentApi {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpIncidentApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base_url =
            Url::parse(base_url).map_err(|e| ApiError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(base_url.to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get<R: DeserializeOwned>(&self, url: Url) -> Result<R, ApiError> {
        let resp = self.client.get(url).send().await?;
        read_json(resp).await
    }

    async fn post<A: Serialize + ?Sized>(&self, url: Url, body: &A) -> Result<Response, ApiError> {
        let resp = self.client.post(url).json(body).send().await?;
        check_status(resp).await
    }
}

#[async_trait]
impl IncidentApi for HttpIncidentApi {
    #[instrument(name = "api_list_incidents", skip(self))]
    async fn list_incidents(&self, limit: usize) -> Result<Vec<Incident>, ApiError> {
        let mut url = self.endpoint(&["api", "incidents"])?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
        let page: IncidentPage = self.get(url).await?;
        let incidents = page
            .decode()
            .filter_map(|record| match record {
                Ok(incident) => Some(incident),
                Err(err) => {
                    warn!(error = %err, "skipping undecodable incident record");
                    None
                }
            })
            .collect();
        Ok(incidents)
    }

    #[instrument(name = "api_get_incident", skip(self))]
    async fn get_incident(&self, incident_id: &str) -> Result<Incident, ApiError> {
        let url = self.endpoint(&["api", "incidents", incident_id])?;
        self.get(url).await
    }

    #[instrument(name = "api_get_postmortem", skip(self))]
    async fn get_postmortem(&self, incident_id: &str) -> Result<Postmortem, ApiError> {
        let url = self.endpoint(&["api", "incidents", incident_id, "postmortem"])?;
        self.get(url).await
    }

    #[instrument(name = "api_resolve", skip(self))]
    async fn resolve(&self, incident_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["api", "resolve"])?;
        let body = ResolveRequest {
            incident_id: incident_id.to_string(),
        };
        self.post(url, &body).await?;
        Ok(())
    }

    #[instrument(name = "api_replay", skip(self, request), fields(payload = %request.payload_name))]
    async fn replay(&self, request: &ReplayRequest) -> Result<ReplayReceipt, ApiError> {
        let url = self.endpoint(&["api", "replay"])?;
        let resp = self.post(url, request).await?;
        resp.json().await.map_err(ApiError::from)
    }

    #[instrument(name = "api_list_repos", skip(self))]
    async fn list_repos(&self) -> Result<Vec<Repo>, ApiError> {
        let url = self.endpoint(&["api", "repos"])?;
        let page: RepoPage = self.get(url).await?;
        Ok(page.repos)
    }
}

async fn read_json<R: DeserializeOwned>(resp: Response) -> Result<R, ApiError> {
    let resp = check_status(resp).await?;
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
}

async fn check_status(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let detail = resp
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|body| body.message())
        .unwrap_or_else(|| format!("request failed with status {}", status.as_u16()));
    if status == StatusCode::NOT_FOUND {
        Err(ApiError::NotFound { detail })
    } else {
        Err(ApiError::Rejected {
            status: status.as_u16(),
            detail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_escape_identifiers() {
        let api = HttpIncidentApi::new("http://localhost:8000/", Duration::from_secs(1)).unwrap();
        let url = api.endpoint(&["api", "incidents", "a/b c"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/incidents/a%2Fb%20c");
    }

    #[test]
    fn endpoints_keep_base_path_prefix() {
        let api = HttpIncidentApi::new("https://ops.example.com/iq", Duration::from_secs(1)).unwrap();
        let url = api.endpoint(&["api", "repos"]).unwrap();
        assert_eq!(url.as_str(), "https://ops.example.com/iq/api/repos");
    }

    #[test]
    fn rejects_non_base_urls() {
        let err = HttpIncidentApi::new("mailto:oncall@example.com", Duration::from_secs(1));
        assert!(matches!(err, Err(ApiError::InvalidUrl(_))));
    }
}
