use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ledger entry type, as persisted in `events.type`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Intake,
    Move,
    Split,
    Combine,
    Checkout,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Intake,
        EventKind::Move,
        EventKind::Split,
        EventKind::Combine,
        EventKind::Checkout,
    ];

    /// Stable type identifier stored alongside the metadata payload.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Intake => "intake",
            EventKind::Move => "move",
            EventKind::Split => "split",
            EventKind::Combine => "combine",
            EventKind::Checkout => "checkout",
        }
    }
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event type '{0}'")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}
