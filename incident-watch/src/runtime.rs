use incident_model::{Incident, IncidentStatus, ReplayRequest};
use incident_sync::{ActionReceipt, Dashboard, DetailView, DispatchError, ListView};
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use tracing::{debug, info};

pub trait EventSink: Send + Sync + 'static {
    fn emit_json(&self, event: &str, payload: serde_json::Value);
}

/// One JSON object per line on stdout.
pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn emit_json(&self, event: &str, payload: serde_json::Value) {
        println!("{}", json!({ "event": event, "payload": payload }));
    }
}

/// Routes events into the log instead of stdout.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit_json(&self, event: &str, payload: serde_json::Value) {
        info!(event, %payload, "presentation event");
    }
}

/// Which incident the detail side of a watch follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Follow {
    /// The newest incident of the first synced list that holds any.
    Newest,
    Incident(String),
    /// Whatever the dashboard already has selected.
    Current,
}

/// Replay through `dashboard` once its list holds a baseline, so the created
/// incident shows up as an arrival. The dashboard then follows that incident.
pub async fn replay_then_select(
    dashboard: &Dashboard,
    request: ReplayRequest,
) -> Result<ActionReceipt, DispatchError> {
    let mut list_rx = dashboard.list();
    let settled = list_rx
        .wait_for(|view| view.synced || view.error.is_some())
        .await
        .is_ok();
    if !settled {
        debug!("list closed before its first snapshot");
    }
    dashboard.replay(request).await
}

/// Follow the dashboard's views until `shutdown` resolves, translating every
/// published change into events.
pub async fn run_watch(
    dashboard: Dashboard,
    follow: Follow,
    sink: &impl EventSink,
    shutdown: impl Future<Output = ()>,
) {
    let mut list_rx = dashboard.list();
    let mut detail_rx = dashboard.detail();
    let mut last_list = list_rx.borrow_and_update().clone();
    let mut last_detail = detail_rx.borrow_and_update().clone();

    let mut follow_newest = false;
    match follow {
        Follow::Newest => follow_newest = true,
        Follow::Incident(incident_id) => {
            dashboard.select(incident_id);
        }
        Follow::Current => emit_detail_updates(&DetailView::default(), &last_detail, sink),
    }

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = list_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = list_rx.borrow_and_update().clone();
                emit_list_updates(&last_list, &view, sink);
                if follow_newest && view.synced {
                    if let Some(newest) = view.incidents.first() {
                        debug!(incident_id = %newest.incident_id, "following newest incident");
                        dashboard.select(newest.incident_id.clone());
                        follow_newest = false;
                    }
                }
                last_list = view;
            }
            changed = detail_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = detail_rx.borrow_and_update().clone();
                emit_detail_updates(&last_detail, &view, sink);
                last_detail = view;
            }
        }
    }
    dashboard.shutdown().await;
}

pub fn emit_list_updates(previous: &ListView, current: &ListView, sink: &impl EventSink) {
    if let Some(err) = &current.error {
        if previous.error.as_ref() != Some(err) {
            sink.emit_json(
                "fetch-failed",
                json!({ "scope": "list", "message": err.user_message(), "fatal": false, "stale": current.synced }),
            );
        }
    }
    if !current.synced || (previous.incidents == current.incidents && previous.synced) {
        return;
    }

    sink.emit_json(
        "incidents-updated",
        json!({
            "count": current.incidents.len(),
            "active_count": current.aggregates.active_count,
            "high_count": current.aggregates.high_count,
            "total_impact": current.aggregates.total_impact,
        }),
    );

    for incident in &current.incidents {
        let id = &incident.incident_id;
        if current.transitions.is_newly_arrived(id) && !previous.transitions.is_newly_arrived(id) {
            sink.emit_json(
                "incident-arrived",
                json!({
                    "incident_id": id,
                    "severity": incident.severity.map(|s| s.as_str()),
                    "status": incident.status.as_str(),
                }),
            );
        }
    }

    if !previous.synced {
        return;
    }
    let before: HashMap<&str, IncidentStatus> = previous
        .incidents
        .iter()
        .map(|i| (i.incident_id.as_str(), i.status))
        .collect();
    for incident in &current.incidents {
        if let Some(from) = before.get(incident.incident_id.as_str()) {
            emit_status_change("list", incident, *from, sink);
        }
    }
}

pub fn emit_detail_updates(previous: &DetailView, current: &DetailView, sink: &impl EventSink) {
    let same_subscription = previous.epoch == current.epoch;

    if let Some(fault) = &current.fault {
        if !same_subscription || previous.fault.as_ref() != Some(fault) {
            sink.emit_json(
                "fetch-failed",
                json!({
                    "scope": "detail",
                    "incident_id": current.incident_id,
                    "message": fault.error().user_message(),
                    "fatal": fault.is_fatal(),
                }),
            );
        }
    }

    let Some(incident) = &current.incident else {
        return;
    };
    let from = previous.incident.as_ref().filter(|_| same_subscription).map(|i| i.status);
    match from {
        Some(from) => emit_status_change("detail", incident, from, sink),
        None => sink.emit_json(
            "incident-followed",
            json!({
                "incident_id": incident.incident_id,
                "status": incident.status.as_str(),
                "label": incident.status.label(),
                "actions": incident.actions_log.len(),
            }),
        ),
    }
}

fn emit_status_change(scope: &str, incident: &Incident, from: IncidentStatus, sink: &impl EventSink) {
    let to = incident.status;
    if from == to {
        return;
    }
    let payload = json!({
        "scope": scope,
        "incident_id": incident.incident_id,
        "from": from.as_str(),
        "to": to.as_str(),
    });
    sink.emit_json("status-advanced", payload.clone());
    match to {
        IncidentStatus::Resolved => sink.emit_json("incident-resolved", payload),
        IncidentStatus::PostmortemReady => sink.emit_json("postmortem-ready", payload),
        _ => {}
    }
}
