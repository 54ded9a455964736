use chrono::{DateTime, Utc};

use depot_core::{EventId, UnitId, UserId};

use crate::event::EventKind;
use crate::payload::EventPayload;

/// A ledger entry ready to be appended (not yet assigned a timestamp).
///
/// The store assigns `timestamp` at write time, inside the same transaction as
/// the state change that produced the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLedgerEntry {
    pub id: EventId,
    /// The unit the entry is principally about.
    pub unit_id: UnitId,
    pub user_id: Option<UserId>,
    pub payload: EventPayload,
}

impl NewLedgerEntry {
    pub fn new(unit_id: UnitId, user_id: Option<UserId>, payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            unit_id,
            user_id,
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Commit the entry at `timestamp`. Only stores call this.
    pub fn committed_at(self, timestamp: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry {
            id: self.id,
            unit_id: self.unit_id,
            user_id: self.user_id,
            payload: self.payload,
            timestamp,
        }
    }
}

/// An immutable, committed ledger entry.
///
/// There is no API to update or delete one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: EventId,
    pub unit_id: UnitId,
    pub user_id: Option<UserId>,
    pub payload: EventPayload,
    /// Assigned at write time; non-decreasing per unit.
    pub timestamp: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Whether the entry concerns `unit_id`, either as principal or as a
    /// referenced source/target/endpoint.
    pub fn touches(&self, unit_id: UnitId) -> bool {
        self.unit_id == unit_id || self.payload.referenced_units().contains(&unit_id)
    }
}
