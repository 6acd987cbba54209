use crate::dispatch::ActionKind;

/// Failure of a single request against the incident API.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The backend does not know the requested resource.
    #[error("{detail}")]
    NotFound { detail: String },
    /// Any other non-success status; `detail` is the backend's message.
    #[error("{detail}")]
    Rejected { status: u16, detail: String },
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response body: {0}")]
    Decode(String),
    #[error("invalid api url: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }

    /// Message shown to the user: the backend `detail` verbatim when there is one.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

/// Error state of a synchronizer view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchFault {
    /// Polling continues at the current cadence; the last good snapshot stays.
    Transient(ApiError),
    /// The subscription is over; waiting will not make the identifier valid.
    Fatal(ApiError),
}

impl FetchFault {
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchFault::Fatal(_))
    }

    pub fn error(&self) -> &ApiError {
        match self {
            FetchFault::Transient(err) | FetchFault::Fatal(err) => err,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("{kind} already in progress for {target}")]
    AlreadyInProgress { kind: ActionKind, target: String },
    #[error(transparent)]
    Failed(#[from] ApiError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_detail_is_used_verbatim() {
        let err = ApiError::Rejected {
            status: 500,
            detail: "Failed to register GitHub webhook.".into(),
        };
        assert_eq!(err.user_message(), "Failed to register GitHub webhook.");

        let missing = ApiError::NotFound {
            detail: "Incident not found".into(),
        };
        assert!(missing.is_not_found());
        assert_eq!(missing.user_message(), "Incident not found");
    }

    #[test]
    fn fault_exposes_underlying_error() {
        let fault = FetchFault::Fatal(ApiError::NotFound {
            detail: "gone".into(),
        });
        assert!(fault.is_fatal());
        assert!(fault.error().is_not_found());
        assert!(!FetchFault::Transient(ApiError::Timeout).is_fatal());
    }
}
