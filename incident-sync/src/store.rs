use crate::api::IncidentApi;
use crate::config::SyncConfig;
use crate::detail::{DetailSynchronizer, DetailView};
use crate::dispatch::{Action, ActionDispatcher, ActionReceipt};
use crate::error::{ApiError, DispatchError};
use crate::http::HttpIncidentApi;
use crate::list::{ListSynchronizer, ListView};
use crate::schedule::Epoch;
use incident_model::{Postmortem, ReplayRequest, Repo};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Everything a dashboard consumer holds: the list poller, the detail poller
/// for the selected incident, and the action dispatcher, all sharing one API.
pub struct Dashboard {
    api: Arc<dyn IncidentApi>,
    config: SyncConfig,
    list: ListSynchronizer,
    detail: DetailSynchronizer,
    dispatcher: ActionDispatcher,
}

impl Dashboard {
    /// Start list polling against `api`. Nothing is selected yet.
    /// Must be called within a tokio runtime.
    pub fn start(api: Arc<dyn IncidentApi>, config: SyncConfig) -> Self {
        let mut list = ListSynchronizer::new(api.clone(), &config);
        list.start(config.list_limit);
        let detail = DetailSynchronizer::spawn(api.clone(), &config);
        let dispatcher = ActionDispatcher::new(api.clone());
        Self {
            api,
            config,
            list,
            detail,
            dispatcher,
        }
    }

    /// Start against the HTTP backend at `config.base_url`.
    pub fn connect(config: SyncConfig) -> Result<Self, ApiError> {
        let api = HttpIncidentApi::new(&config.base_url, config.request_timeout)?;
        info!(base_url = %api.base_url(), "connecting to incident api");
        Ok(Self::start(Arc::new(api), config))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn list(&self) -> watch::Receiver<ListView> {
        self.list.watch()
    }

    pub fn detail(&self) -> watch::Receiver<DetailView> {
        self.detail.watch()
    }

    pub fn list_view(&self) -> ListView {
        self.list.view()
    }

    pub fn detail_view(&self) -> DetailView {
        self.detail.view()
    }

    /// Make `incident_id` the detail subscription.
    pub fn select(&self, incident_id: impl Into<String>) -> Epoch {
        self.detail.subscribe(incident_id)
    }

    pub fn clear_selection(&self) {
        self.detail.unsubscribe();
    }

    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    /// Ask the backend to resolve `incident_id`. The new status arrives with
    /// the next poll.
    pub async fn resolve(&self, incident_id: &str) -> Result<ActionReceipt, DispatchError> {
        self.dispatcher.dispatch(Action::resolve(incident_id)).await
    }

    /// Replay a recorded alert and follow the incident it creates.
    pub async fn replay(&self, request: ReplayRequest) -> Result<ActionReceipt, DispatchError> {
        let receipt = self.dispatcher.dispatch(Action::replay(request)).await?;
        self.select(receipt.incident_id());
        Ok(receipt)
    }

    /// Fetch the postmortem once. Subscriptions are not affected.
    pub async fn postmortem(&self, incident_id: &str) -> Result<Postmortem, ApiError> {
        self.api.get_postmortem(incident_id).await
    }

    pub async fn connected_repos(&self) -> Result<Vec<Repo>, ApiError> {
        self.api.list_repos().await
    }

    pub fn is_list_running(&self) -> bool {
        self.list.is_running()
    }

    /// Restart list polling with a different window size.
    pub fn restart_list(&mut self, limit: usize) {
        self.list.start(limit);
    }

    pub fn stop_list(&mut self) {
        self.list.stop();
    }

    /// Stop all polling and wait for the detail loop to exit.
    pub async fn shutdown(self) {
        let Dashboard {
            mut list, detail, ..
        } = self;
        list.stop();
        detail.shutdown().await;
        info!("dashboard shut down");
    }
}
