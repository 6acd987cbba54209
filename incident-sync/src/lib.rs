//! Client-side synchronization with the incident response backend.
//!
//! A [`ListSynchronizer`] polls the most recent incidents, a
//! [`DetailSynchronizer`] follows one incident with a lifecycle-driven cadence,
//! and an [`ActionDispatcher`] issues resolve and replay requests. Views are
//! published through `tokio::sync::watch`; a [`Dashboard`] bundles all three.

pub mod api;
pub mod config;
pub mod detail;
pub mod dispatch;
pub mod error;
pub mod fake;
pub mod http;
pub mod list;
pub mod schedule;
pub mod store;
pub mod transitions;

pub use api::IncidentApi;
pub use config::SyncConfig;
pub use detail::{Cadence, DetailSynchronizer, DetailView};
pub use dispatch::{Action, ActionDispatcher, ActionKind, ActionReceipt};
pub use error::{ApiError, DispatchError, FetchFault};
pub use http::HttpIncidentApi;
pub use list::{Aggregates, ListSynchronizer, ListView};
pub use schedule::Epoch;
pub use store::Dashboard;
pub use transitions::{StatusChange, TransitionDiff, Transitions};
