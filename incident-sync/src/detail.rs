//! Adaptive polling of a single incident.
//!
//! The refresh rate follows the lifecycle: fast while the pipeline is working,
//! slow once the incident is resolved and only the postmortem is outstanding,
//! and no retrieval at all after `postmortem_ready`. Every subscription gets a
//! fresh [`Epoch`]; the published view carries it and responses are applied
//! under the view's lock only when their epoch still matches, so a late
//! response for a previous identifier cannot land after a switch.

use crate::api::IncidentApi;
use crate::config::SyncConfig;
use crate::error::{ApiError, FetchFault};
use crate::schedule::{sleep_until_opt, Epoch, PollTask};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use incident_model::{Incident, IncidentStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Refresh rate of a detail subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cadence {
    Fast,
    Slow,
    Stopped,
}

impl Cadence {
    /// Cadence after observing `status`. Unknown statuses poll fast.
    pub fn after(status: IncidentStatus) -> Cadence {
        if status.stops_polling() {
            Cadence::Stopped
        } else if status.slows_polling() {
            Cadence::Slow
        } else {
            Cadence::Fast
        }
    }

    pub fn interval(self, fast: Duration, slow: Duration) -> Option<Duration> {
        match self {
            Cadence::Fast => Some(fast),
            Cadence::Slow => Some(slow),
            Cadence::Stopped => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DetailView {
    /// Subscribed identifier, `None` when idle.
    pub incident_id: Option<String>,
    pub epoch: Epoch,
    /// Last good snapshot of the subscribed incident.
    pub incident: Option<Incident>,
    pub cadence: Cadence,
    pub fault: Option<FetchFault>,
    /// Subscribed but nothing received yet.
    pub loading: bool,
}

impl Default for DetailView {
    fn default() -> Self {
        Self {
            incident_id: None,
            epoch: Epoch::default(),
            incident: None,
            cadence: Cadence::Stopped,
            fault: None,
            loading: false,
        }
    }
}

impl DetailView {
    pub fn status(&self) -> Option<IncidentStatus> {
        self.incident.as_ref().map(|i| i.status)
    }

    pub fn is_subscribed_to(&self, incident_id: &str) -> bool {
        self.incident_id.as_deref() == Some(incident_id)
    }

    /// Start a new subscription: new epoch, no snapshot, fast cadence.
    pub fn resubscribe(&mut self, incident_id: String) -> Epoch {
        self.epoch = self.epoch.next();
        self.incident_id = Some(incident_id);
        self.incident = None;
        self.cadence = Cadence::Fast;
        self.fault = None;
        self.loading = true;
        self.epoch
    }

    pub fn clear(&mut self) -> Epoch {
        self.epoch = self.epoch.next();
        self.incident_id = None;
        self.incident = None;
        self.cadence = Cadence::Stopped;
        self.fault = None;
        self.loading = false;
        self.epoch
    }

    /// Apply the response of a retrieval issued under `epoch`.
    /// Returns the cadence to continue with, or `None` when the response is stale.
    pub fn apply(&mut self, epoch: Epoch, result: Result<Incident, ApiError>) -> Option<Cadence> {
        if epoch != self.epoch {
            return None;
        }
        let requested = self.incident_id.as_deref()?;
        self.loading = false;

        match result {
            Ok(incident) if incident.incident_id != requested => {
                warn!(requested, received = %incident.incident_id, "detail response for another incident");
                self.fault = Some(FetchFault::Transient(ApiError::Decode(format!(
                    "response carried incident {}",
                    incident.incident_id
                ))));
            }
            Ok(incident) => {
                if let Some(previous) = &self.incident {
                    if incident.actions_log.len() < previous.actions_log.len() {
                        warn!(
                            incident_id = requested,
                            held = previous.actions_log.len(),
                            received = incident.actions_log.len(),
                            "actions log shrank between polls"
                        );
                    }
                    if previous.status != incident.status {
                        info!(incident_id = requested, from = %previous.status, to = %incident.status, "detail status changed");
                    }
                }
                self.cadence = Cadence::after(incident.status);
                self.incident = Some(incident);
                self.fault = None;
            }
            Err(err) if err.is_not_found() => {
                warn!(incident_id = requested, error = %err, "subscription target not found");
                self.cadence = Cadence::Stopped;
                self.fault = Some(FetchFault::Fatal(err));
            }
            Err(err) => {
                warn!(incident_id = requested, error = %err, "detail retrieval failed, keeping last snapshot");
                self.fault = Some(FetchFault::Transient(err));
            }
        }
        Some(self.cadence)
    }
}

#[derive(Debug)]
enum Command {
    Fetch { epoch: Epoch, incident_id: String },
    Halt,
}

/// Polls one incident at a time and publishes [`DetailView`]s.
pub struct DetailSynchronizer {
    view_tx: Arc<watch::Sender<DetailView>>,
    commands: mpsc::UnboundedSender<Command>,
    task: PollTask,
}

impl DetailSynchronizer {
    /// Spawn the idle polling loop. Must be called within a tokio runtime.
    pub fn spawn(api: Arc<dyn IncidentApi>, config: &SyncConfig) -> Self {
        let (view_tx, _) = watch::channel(DetailView::default());
        let view_tx = Arc::new(view_tx);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let intervals = (config.detail_fast_interval, config.detail_slow_interval);
        let loop_view_tx = view_tx.clone();
        let task = PollTask::spawn(move |cancel| {
            run_detail(api, intervals, loop_view_tx, command_rx, cancel)
        });
        Self {
            view_tx,
            commands,
            task,
        }
    }

    /// Switch to `incident_id`, dropping the pending timer and any in-flight
    /// request, and fetch it immediately. Subscribing again to the identifier
    /// already being polled is a no-op.
    pub fn subscribe(&self, incident_id: impl Into<String>) -> Epoch {
        let incident_id = incident_id.into();
        let mut epoch = Epoch::default();
        let switched = self.view_tx.send_if_modified(|view| {
            if view.is_subscribed_to(&incident_id) && view.cadence != Cadence::Stopped {
                epoch = view.epoch;
                return false;
            }
            epoch = view.resubscribe(incident_id.clone());
            true
        });
        if switched {
            info!(%incident_id, epoch = epoch.value(), "detail subscription switched");
            let _ = self.commands.send(Command::Fetch { epoch, incident_id });
        }
        epoch
    }

    pub fn unsubscribe(&self) {
        self.view_tx.send_modify(|view| {
            view.clear();
        });
        let _ = self.commands.send(Command::Halt);
    }

    pub fn view(&self) -> DetailView {
        self.view_tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<DetailView> {
        self.view_tx.subscribe()
    }

    pub async fn shutdown(self) {
        self.view_tx.send_modify(|view| {
            view.clear();
        });
        self.task.shutdown().await;
    }
}

type DetailResponse = (Epoch, String, Result<Incident, ApiError>);

fn fetch(api: Arc<dyn IncidentApi>, epoch: Epoch, incident_id: String) -> BoxFuture<'static, DetailResponse> {
    async move {
        debug!(%incident_id, epoch = epoch.value(), "issuing detail retrieval");
        let result = api.get_incident(&incident_id).await;
        (epoch, incident_id, result)
    }
    .boxed()
}

async fn run_detail(
    api: Arc<dyn IncidentApi>,
    (fast, slow): (Duration, Duration),
    view_tx: Arc<watch::Sender<DetailView>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
) {
    let mut in_flight: FuturesUnordered<BoxFuture<'static, DetailResponse>> = FuturesUnordered::new();
    let mut next_poll: Option<(Instant, Epoch, String)> = None;

    loop {
        let deadline = next_poll.as_ref().map(|(at, _, _)| *at);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            command = commands.recv() => {
                // Dropping the old futures cancels requests for the previous subscription.
                in_flight = FuturesUnordered::new();
                next_poll = None;
                match command {
                    Some(Command::Fetch { epoch, incident_id }) => {
                        in_flight.push(fetch(api.clone(), epoch, incident_id));
                    }
                    Some(Command::Halt) => {}
                    None => break,
                }
            }
            Some((epoch, incident_id, result)) = in_flight.next(), if !in_flight.is_empty() => {
                let mut cadence = None;
                view_tx.send_if_modified(|view| {
                    cadence = view.apply(epoch, result);
                    cadence.is_some()
                });
                next_poll = match cadence {
                    None => {
                        debug!(%incident_id, epoch = epoch.value(), "discarding stale detail response");
                        None
                    }
                    Some(cadence) => match cadence.interval(fast, slow) {
                        Some(wait) => Some((Instant::now() + wait, epoch, incident_id)),
                        None => {
                            info!(%incident_id, "detail polling stopped");
                            None
                        }
                    },
                };
            }
            _ = sleep_until_opt(deadline) => {
                if let Some((_, epoch, incident_id)) = next_poll.take() {
                    in_flight.push(fetch(api.clone(), epoch, incident_id));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeApi;
    use incident_model::testing::incident;
    use incident_model::ActionRecord;
    use IncidentStatus::*;

    fn subscribed(id: &str) -> (DetailView, Epoch) {
        let mut view = DetailView::default();
        let epoch = view.resubscribe(id.to_string());
        (view, epoch)
    }

    #[test]
    fn cadence_follows_lifecycle() {
        assert_eq!(Cadence::after(Ingested), Cadence::Fast);
        assert_eq!(Cadence::after(WarRoomPosted), Cadence::Fast);
        assert_eq!(Cadence::after(Resolved), Cadence::Slow);
        assert_eq!(Cadence::after(PostmortemReady), Cadence::Stopped);
        assert_eq!(Cadence::after(Unknown), Cadence::Fast);

        let fast = Duration::from_secs(2);
        let slow = Duration::from_secs(15);
        assert_eq!(Cadence::Slow.interval(fast, slow), Some(slow));
        assert_eq!(Cadence::Stopped.interval(fast, slow), None);
    }

    #[test]
    fn stale_epoch_is_discarded() {
        let (mut view, old) = subscribed("x");
        let new = view.resubscribe("y".into());

        assert_eq!(view.apply(old, Ok(incident("x", Investigating))), None);
        assert!(view.incident.is_none());

        assert_eq!(view.apply(new, Ok(incident("y", Triaged))), Some(Cadence::Fast));
        assert_eq!(view.incident.as_ref().map(|i| i.incident_id.as_str()), Some("y"));
    }

    #[test]
    fn transient_failure_keeps_snapshot_and_cadence() {
        let (mut view, epoch) = subscribed("x");
        view.apply(epoch, Ok(incident("x", Resolved)));
        assert_eq!(view.cadence, Cadence::Slow);

        let cadence = view.apply(epoch, Err(ApiError::Timeout));
        assert_eq!(cadence, Some(Cadence::Slow));
        assert_eq!(view.status(), Some(Resolved));
        assert_eq!(view.fault, Some(FetchFault::Transient(ApiError::Timeout)));

        view.apply(epoch, Ok(incident("x", Resolved)));
        assert_eq!(view.fault, None);
    }

    #[test]
    fn not_found_is_fatal() {
        let (mut view, epoch) = subscribed("ghost");
        let err = ApiError::NotFound {
            detail: "Incident not found".into(),
        };
        assert_eq!(view.apply(epoch, Err(err.clone())), Some(Cadence::Stopped));
        assert_eq!(view.fault, Some(FetchFault::Fatal(err)));
        assert!(!view.loading);
    }

    #[test]
    fn mismatched_identifier_is_not_applied() {
        let (mut view, epoch) = subscribed("x");
        view.apply(epoch, Ok(incident("other", Triaged)));
        assert!(view.incident.is_none());
        assert!(matches!(view.fault, Some(FetchFault::Transient(ApiError::Decode(_)))));
    }

    #[test]
    fn status_regression_is_rendered_as_reported() {
        let (mut view, epoch) = subscribed("x");
        view.apply(epoch, Ok(incident("x", Resolved)));
        assert_eq!(view.apply(epoch, Ok(incident("x", Investigating))), Some(Cadence::Fast));
        assert_eq!(view.status(), Some(Investigating));
    }

    #[test]
    fn shrinking_actions_log_is_still_applied() {
        let (mut view, epoch) = subscribed("x");
        let mut longer = incident("x", Investigating);
        longer.actions_log = ["triage", "investigate"]
            .into_iter()
            .map(|action_type| ActionRecord {
                ts: longer.created_at,
                agent: "pipeline".into(),
                action_type: action_type.into(),
                details: serde_json::Value::Null,
            })
            .collect();
        view.apply(epoch, Ok(longer));

        let mut shorter = incident("x", Investigating);
        shorter.triage_summary_snippet = Some("rewritten".into());
        assert_eq!(view.apply(epoch, Ok(shorter)), Some(Cadence::Fast));

        let held = view.incident.as_ref().unwrap();
        assert!(held.actions_log.is_empty());
        assert_eq!(held.triage_summary_snippet.as_deref(), Some("rewritten"));
        assert_eq!(view.fault, None);
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribing_to_a_stopped_incident_fetches_again() {
        let fake = Arc::new(FakeApi::new());
        fake.upsert(incident("done", PostmortemReady));
        let detail = DetailSynchronizer::spawn(fake.clone(), &SyncConfig::default());

        let first = detail.subscribe("done");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(detail.view().cadence, Cadence::Stopped);
        assert_eq!(fake.detail_calls("done"), 1);

        let second = detail.subscribe("done");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(second > first);
        assert_eq!(fake.detail_calls("done"), 2);
        assert_eq!(detail.view().status(), Some(PostmortemReady));

        detail.shutdown().await;
    }

    #[test]
    fn cleared_view_rejects_everything() {
        let (mut view, epoch) = subscribed("x");
        let cleared = view.clear();
        assert_eq!(view.apply(epoch, Ok(incident("x", Triaged))), None);
        assert_eq!(view.apply(cleared, Ok(incident("x", Triaged))), None);
    }
}
