//! Mutating requests against the backend.
//!
//! Nothing held locally is updated when an action succeeds; its effect shows
//! up through the next poll of the list or detail synchronizer.

use crate::api::IncidentApi;
use crate::error::DispatchError;
use incident_model::ReplayRequest;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Resolve,
    TriggerReplay,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Resolve => f.write_str("resolve"),
            ActionKind::TriggerReplay => f.write_str("replay"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    Resolve { incident_id: String },
    TriggerReplay(ReplayRequest),
}

impl Action {
    pub fn resolve(incident_id: impl Into<String>) -> Self {
        Action::Resolve {
            incident_id: incident_id.into(),
        }
    }

    pub fn replay(request: ReplayRequest) -> Self {
        Action::TriggerReplay(request)
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Resolve { .. } => ActionKind::Resolve,
            Action::TriggerReplay(_) => ActionKind::TriggerReplay,
        }
    }

    /// What the busy flag is keyed on besides the kind.
    pub fn target(&self) -> &str {
        match self {
            Action::Resolve { incident_id } => incident_id,
            Action::TriggerReplay(request) => &request.payload_name,
        }
    }
}

/// Successful dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionReceipt {
    Resolved { incident_id: String },
    /// The backend created a new incident for the replayed payload.
    ReplayStarted { incident_id: String },
}

impl ActionReceipt {
    pub fn incident_id(&self) -> &str {
        match self {
            ActionReceipt::Resolved { incident_id } | ActionReceipt::ReplayStarted { incident_id } => {
                incident_id
            }
        }
    }
}

type BusyKey = (ActionKind, String);

/// Issues actions, refusing a second one for the same kind and target while
/// the first is outstanding.
#[derive(Clone)]
pub struct ActionDispatcher {
    api: Arc<dyn IncidentApi>,
    busy: Arc<Mutex<HashSet<BusyKey>>>,
}

impl ActionDispatcher {
    pub fn new(api: Arc<dyn IncidentApi>) -> Self {
        Self {
            api,
            busy: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn is_busy(&self, kind: ActionKind, target: &str) -> bool {
        self.busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(kind, target.to_string()))
    }

    pub async fn dispatch(&self, action: Action) -> Result<ActionReceipt, DispatchError> {
        let kind = action.kind();
        let target = action.target().to_string();
        let _claim = BusyClaim::acquire(&self.busy, kind, &target).ok_or_else(|| {
            info!(%kind, %target, "rejecting duplicate dispatch");
            DispatchError::AlreadyInProgress {
                kind,
                target: target.clone(),
            }
        })?;

        info!(%kind, %target, "dispatching action");
        let result = match &action {
            Action::Resolve { incident_id } => self
                .api
                .resolve(incident_id)
                .await
                .map(|()| ActionReceipt::Resolved {
                    incident_id: incident_id.clone(),
                }),
            Action::TriggerReplay(request) => {
                self.api
                    .replay(request)
                    .await
                    .map(|receipt| ActionReceipt::ReplayStarted {
                        incident_id: receipt.incident_id,
                    })
            }
        };

        match &result {
            Ok(receipt) => info!(%kind, %target, incident_id = receipt.incident_id(), "action accepted"),
            Err(err) => warn!(%kind, %target, error = %err, "action failed"),
        }
        result.map_err(DispatchError::Failed)
    }
}

/// Holds a busy flag until dropped, including when the dispatch future is cancelled.
struct BusyClaim {
    busy: Arc<Mutex<HashSet<BusyKey>>>,
    key: BusyKey,
}

impl BusyClaim {
    fn acquire(busy: &Arc<Mutex<HashSet<BusyKey>>>, kind: ActionKind, target: &str) -> Option<Self> {
        let key = (kind, target.to_string());
        let inserted = busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());
        inserted.then(|| BusyClaim {
            busy: busy.clone(),
            key,
        })
    }
}

impl Drop for BusyClaim {
    fn drop(&mut self) {
        self.busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
