use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of an incident as reported by the pipeline.
/// Declared in forward order; values the client does not know decode to `Unknown`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    #[default]
    Ingested,
    Triaged,
    Investigating,
    WarRoomPosted,
    Resolved,
    PostmortemReady,
    #[serde(other)]
    Unknown,
}

impl IncidentStatus {
    /// Known statuses in lifecycle order.
    pub const ALL: [IncidentStatus; 6] = [
        IncidentStatus::Ingested,
        IncidentStatus::Triaged,
        IncidentStatus::Investigating,
        IncidentStatus::WarRoomPosted,
        IncidentStatus::Resolved,
        IncidentStatus::PostmortemReady,
    ];

    /// Position in the lifecycle, `None` for `Unknown`.
    pub fn rank(self) -> Option<usize> {
        Self::ALL.iter().position(|s| *s == self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IncidentStatus::Ingested => "ingested",
            IncidentStatus::Triaged => "triaged",
            IncidentStatus::Investigating => "investigating",
            IncidentStatus::WarRoomPosted => "war_room_posted",
            IncidentStatus::Resolved => "resolved",
            IncidentStatus::PostmortemReady => "postmortem_ready",
            IncidentStatus::Unknown => "unknown",
        }
    }

    /// Human-readable label for presentation.
    pub fn label(self) -> &'static str {
        match self {
            IncidentStatus::Ingested => "Ingested",
            IncidentStatus::Triaged => "Triaged",
            IncidentStatus::Investigating => "Investigating",
            IncidentStatus::WarRoomPosted => "War room posted",
            IncidentStatus::Resolved => "Resolved",
            IncidentStatus::PostmortemReady => "Postmortem ready",
            IncidentStatus::Unknown => "Unknown",
        }
    }

    /// Counted as active by the list aggregates. `Unknown` is active.
    pub fn is_active(self) -> bool {
        !matches!(
            self,
            IncidentStatus::Resolved | IncidentStatus::PostmortemReady
        )
    }

    /// No further detail retrieval happens once this status is observed.
    pub fn stops_polling(self) -> bool {
        matches!(self, IncidentStatus::PostmortemReady)
    }

    /// Detail retrieval drops to the slow interval while in this status.
    pub fn slows_polling(self) -> bool {
        matches!(self, IncidentStatus::Resolved)
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "MED")]
    Med,
    #[serde(rename = "LOW")]
    Low,
    #[serde(other, rename = "UNKNOWN")]
    Unknown,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::High => "HIGH",
            Severity::Med => "MED",
            Severity::Low => "LOW",
            Severity::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
