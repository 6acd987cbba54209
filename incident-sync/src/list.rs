//! Periodic retrieval of the most recent incidents.

use crate::api::IncidentApi;
use crate::config::SyncConfig;
use crate::error::ApiError;
use crate::schedule::{sleep_until_opt, Epoch, PollTask, Sequencer};
use crate::transitions::{self, TransitionTracker, Transitions};
use futures::future::{abortable, AbortHandle, Abortable, BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use incident_model::{sort_newest_first, validate_incident, Incident};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counters derived from the held list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Aggregates {
    /// Incidents not yet resolved or past postmortem.
    pub active_count: usize,
    pub high_count: usize,
    /// Sum of estimated users affected.
    pub total_impact: u64,
}

impl Aggregates {
    pub fn of(incidents: &[Incident]) -> Self {
        incidents.iter().fold(Self::default(), |mut acc, incident| {
            if incident.status.is_active() {
                acc.active_count += 1;
            }
            if incident.is_high_severity() {
                acc.high_count += 1;
            }
            acc.total_impact = acc
                .total_impact
                .saturating_add(incident.estimated_users_affected);
            acc
        })
    }
}

/// What presentation consumers see of the incident list.
#[derive(Clone, Debug, PartialEq)]
pub struct ListView {
    /// Newest first, never longer than `limit`.
    pub incidents: Vec<Incident>,
    pub limit: usize,
    pub aggregates: Aggregates,
    pub transitions: Transitions,
    /// Set by the last applied response when it failed; the list above is then stale.
    pub error: Option<ApiError>,
    /// No response applied yet in the current run.
    pub loading: bool,
    /// At least one retrieval has succeeded.
    pub synced: bool,
    /// Run of the synchronizer this view belongs to.
    pub epoch: Epoch,
}

impl ListView {
    pub fn empty(limit: usize) -> Self {
        Self {
            incidents: Vec::new(),
            limit,
            aggregates: Aggregates::default(),
            transitions: Transitions::default(),
            error: None,
            loading: false,
            synced: false,
            epoch: Epoch::default(),
        }
    }

    pub fn get(&self, incident_id: &str) -> Option<&Incident> {
        self.incidents.iter().find(|i| i.incident_id == incident_id)
    }
}

/// State owned by one run of the list polling loop.
#[derive(Debug)]
pub struct ListState {
    view: ListView,
    sequencer: Sequencer,
    tracker: TransitionTracker,
}

impl ListState {
    /// Continue from `view`; its incidents become the baseline for transition detection.
    pub fn resume(mut view: ListView, limit: usize, arrival_window: Duration) -> Self {
        view.limit = limit;
        view.incidents.truncate(limit);
        view.aggregates = Aggregates::of(&view.incidents);
        view.loading = true;
        Self {
            view,
            sequencer: Sequencer::default(),
            tracker: TransitionTracker::new(arrival_window),
        }
    }

    pub fn view(&self) -> &ListView {
        &self.view
    }

    pub fn issue(&mut self) -> u64 {
        self.sequencer.issue()
    }

    /// Apply the response to request `seq`. Returns false when it was
    /// superseded by a newer response and discarded.
    pub fn apply(&mut self, seq: u64, result: Result<Vec<Incident>, ApiError>, now: Instant) -> bool {
        if !self.sequencer.admit(seq) {
            debug!(seq, applied = self.sequencer.last_applied(), "discarding superseded list response");
            return false;
        }
        self.view.loading = false;

        let mut incidents = match result {
            Ok(incidents) => incidents,
            Err(err) => {
                warn!(seq, error = %err, "list retrieval failed, keeping last snapshot");
                self.view.error = Some(err);
                return true;
            }
        };

        incidents.retain(|incident| match validate_incident(incident) {
            Ok(()) => true,
            Err(reason) => {
                warn!(%reason, "skipping malformed incident record");
                false
            }
        });
        sort_newest_first(&mut incidents);
        incidents.truncate(self.view.limit);

        // The first snapshot is a baseline: nothing in it has "just arrived".
        if self.view.synced {
            let diff = transitions::diff(&self.view.incidents, &incidents);
            for change in &diff.status_changes {
                info!(incident_id = %change.incident_id, from = %change.from, to = %change.to, "status changed");
            }
            for id in &diff.arrivals {
                info!(incident_id = %id, "incident arrived");
            }
            self.tracker.record(&diff, now);
        }
        self.tracker.retain_present(&incidents);
        self.tracker.evict_expired(now);

        self.view.aggregates = Aggregates::of(&incidents);
        self.view.incidents = incidents;
        self.view.transitions = self.tracker.snapshot(now);
        self.view.error = None;
        self.view.synced = true;
        true
    }

    pub fn next_expiry(&self) -> Option<Instant> {
        self.tracker.next_expiry()
    }

    /// Expire arrivals whose display window has passed.
    pub fn evict(&mut self, now: Instant) -> bool {
        if !self.tracker.evict_expired(now) {
            return false;
        }
        self.view.transitions = self.tracker.snapshot(now);
        true
    }
}

/// Polls the incident list at a fixed interval and publishes [`ListView`]s.
pub struct ListSynchronizer {
    api: Arc<dyn IncidentApi>,
    interval: Duration,
    arrival_window: Duration,
    view_tx: Arc<watch::Sender<ListView>>,
    task: Option<PollTask>,
}

impl ListSynchronizer {
    pub fn new(api: Arc<dyn IncidentApi>, config: &SyncConfig) -> Self {
        let (view_tx, _) = watch::channel(ListView::empty(config.list_limit));
        Self {
            api,
            interval: config.list_interval,
            arrival_window: config.arrival_window,
            view_tx: Arc::new(view_tx),
            task: None,
        }
    }

    /// Begin polling for at most `limit` incidents, restarting if already running.
    /// The first retrieval is issued immediately. Must be called within a tokio runtime.
    pub fn start(&mut self, limit: usize) {
        self.stop();

        let mut view = self.view();
        view.epoch = view.epoch.next();
        let state = ListState::resume(view, limit, self.arrival_window);
        self.view_tx.send_replace(state.view().clone());

        info!(limit, interval_ms = self.interval.as_millis() as u64, "list polling started");
        let api = self.api.clone();
        let interval = self.interval;
        let view_tx = self.view_tx.clone();
        self.task = Some(PollTask::spawn(move |cancel| {
            run_list(api, limit, interval, state, view_tx, cancel)
        }));
    }

    /// Cancel polling. Responses still in flight are never applied.
    pub fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        task.cancel();
        self.view_tx.send_modify(|view| {
            view.epoch = view.epoch.next();
            view.loading = false;
        });
        info!("list polling stopped");
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub fn view(&self) -> ListView {
        self.view_tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ListView> {
        self.view_tx.subscribe()
    }
}

impl Drop for ListSynchronizer {
    fn drop(&mut self) {
        self.stop();
    }
}

type ListResponse = (u64, Result<Vec<Incident>, ApiError>);

async fn run_list(
    api: Arc<dyn IncidentApi>,
    limit: usize,
    interval: Duration,
    mut state: ListState,
    view_tx: Arc<watch::Sender<ListView>>,
    cancel: CancellationToken,
) {
    let epoch = state.view().epoch;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight: FuturesUnordered<Abortable<BoxFuture<'static, ListResponse>>> =
        FuturesUnordered::new();
    let mut pending: BTreeMap<u64, AbortHandle> = BTreeMap::new();

    loop {
        let expiry = state.next_expiry();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(response) = in_flight.next(), if !in_flight.is_empty() => {
                // Aborted requests were already retired by a newer response.
                if let Ok((seq, result)) = response {
                    pending.remove(&seq);
                    if state.apply(seq, result, Instant::now()) {
                        retire_older(&mut pending, seq);
                        publish(&view_tx, epoch, state.view());
                    }
                }
            }
            _ = ticker.tick() => {
                let seq = state.issue();
                debug!(seq, limit, "issuing list retrieval");
                let api = api.clone();
                let (request, handle) =
                    abortable(async move { (seq, api.list_incidents(limit).await) }.boxed());
                pending.insert(seq, handle);
                in_flight.push(request);
            }
            _ = sleep_until_opt(expiry) => {
                // Woken by the expiry timer, so that deadline has passed.
                let now = expiry.map_or_else(Instant::now, |at| at.max(Instant::now()));
                if state.evict(now) {
                    publish(&view_tx, epoch, state.view());
                }
            }
        }
    }
    debug!(epoch = epoch.value(), "list polling loop exited");
}

/// Cancel requests issued before `applied`; their responses could never be admitted.
fn retire_older(pending: &mut BTreeMap<u64, AbortHandle>, applied: u64) {
    let newer = pending.split_off(&applied);
    for (seq, handle) in std::mem::replace(pending, newer) {
        debug!(seq, applied, "cancelling superseded list retrieval");
        handle.abort();
    }
}

/// Replace the published view unless the synchronizer moved on to another run.
fn publish(view_tx: &watch::Sender<ListView>, epoch: Epoch, view: &ListView) {
    view_tx.send_if_modified(|current| {
        if current.epoch != epoch {
            return false;
        }
        *current = view.clone();
        true
    });
}
