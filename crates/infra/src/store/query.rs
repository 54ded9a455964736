//! Ledger query types for history, audit and distribution reads.
//!
//! All queries are paginated by default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use depot_core::{OrgId, ProgramId, UnitId, UserId};
use depot_events::{EventKind, EventPayload, LedgerEntry};

/// Pagination parameters for ledger queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of entries to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Pagination {
    pub const MAX_LIMIT: u32 = 1000;

    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).clamp(1, Self::MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }

    pub fn next(self) -> Self {
        Self {
            limit: self.limit,
            offset: self.offset.saturating_add(self.limit),
        }
    }
}

/// Filter criteria for ledger queries. Every field is optional; set fields are
/// combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerFilter {
    pub unit_id: Option<UnitId>,
    pub kind: Option<EventKind>,
    pub user_id: Option<UserId>,
    /// Matches checkout entries for this organization.
    pub org_id: Option<OrgId>,
    /// Matches checkout entries for this program.
    pub program_id: Option<ProgramId>,
    /// Inclusive lower bound on the entry timestamp.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the entry timestamp.
    pub to: Option<DateTime<Utc>>,
}

impl LedgerFilter {
    pub fn for_unit(unit_id: UnitId) -> Self {
        Self {
            unit_id: Some(unit_id),
            ..Self::default()
        }
    }

    pub fn of_kind(kind: EventKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        if self.unit_id.is_some_and(|id| id != entry.unit_id) {
            return false;
        }
        if self.kind.is_some_and(|k| k != entry.kind()) {
            return false;
        }
        if self.user_id.is_some() && self.user_id != entry.user_id {
            return false;
        }
        if self.from.is_some_and(|from| entry.timestamp < from) {
            return false;
        }
        if self.to.is_some_and(|to| entry.timestamp > to) {
            return false;
        }
        if self.org_id.is_some() || self.program_id.is_some() {
            let EventPayload::Checkout(checkout) = &entry.payload else {
                return false;
            };
            if self.org_id.is_some_and(|org| org != checkout.org_id) {
                return false;
            }
            if self.program_id.is_some() && self.program_id != checkout.program_id {
                return false;
            }
        }
        true
    }
}

/// Paginated ledger query result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPage {
    pub entries: Vec<LedgerEntry>,
    /// Total number of entries matching the filter (across all pages).
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl LedgerPage {
    pub fn new(entries: Vec<LedgerEntry>, total: u64, pagination: Pagination) -> Self {
        let has_more = total > u64::from(pagination.offset) + u64::from(pagination.limit);
        Self {
            entries,
            total,
            pagination,
            has_more,
        }
    }
}
