//! Transactional storage boundary for units, containment edges and the ledger.
//!
//! Every lifecycle operation runs inside one [`UnitTransaction`]: all unit and
//! edge writes plus the single ledger append commit together or not at all.
//! Only [`UnitTransaction::commit`] persists; dropping a transaction rolls it
//! back, on every exit path.

pub mod in_memory;
pub mod postgres;
pub mod query;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use depot_core::{ItemId, UnitId};
use depot_events::{LedgerEntry, NewLedgerEntry};
use depot_units::{Barcode, Containment, EdgeEndpoint, PhysicalUnit, Reachability, UnitStatus};

pub use in_memory::InMemoryUnitStore;
pub use postgres::PostgresUnitStore;
pub use query::{LedgerFilter, LedgerPage, Pagination};

/// Storage-level failure.
///
/// These are **infrastructure errors** as opposed to domain errors; uniqueness
/// violations surface as `Conflict` so callers can tell them apart.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique constraint violated (barcode, active edge pair).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A row the operation expected is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Check or foreign-key constraint violated.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// A persisted row could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Connection, pool or transaction failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Per-status unit counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatusCounts {
    pub available: u64,
    pub checked_out: u64,
    pub adjusted: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: UnitStatus, n: u64) {
        match status {
            UnitStatus::Available => self.available += n,
            UnitStatus::CheckedOut => self.checked_out += n,
            UnitStatus::Adjusted => self.adjusted += n,
        }
    }

    pub fn total(&self) -> u64 {
        self.available + self.checked_out + self.adjusted
    }
}

/// Opens scoped transactions against a shared store.
#[async_trait::async_trait]
pub trait UnitStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitTransaction>, StoreError>;
}

#[async_trait::async_trait]
impl<S> UnitStore for Arc<S>
where
    S: UnitStore + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn UnitTransaction>, StoreError> {
        (**self).begin().await
    }
}

/// One unit of work.
///
/// Reads are consistent within the transaction. Implementations must:
/// - reject duplicate barcodes and duplicate active (parent, child) edges with `Conflict`
/// - never delete or rewrite ledger entries
/// - assign ledger timestamps that never decrease for a unit
#[async_trait::async_trait]
pub trait UnitTransaction: Send {
    // Units

    async fn insert_unit(&mut self, unit: &PhysicalUnit) -> Result<(), StoreError>;

    async fn unit(&mut self, id: UnitId) -> Result<Option<PhysicalUnit>, StoreError>;

    /// Load a unit and hold it against concurrent mutation until the
    /// transaction ends.
    async fn unit_for_update(&mut self, id: UnitId) -> Result<Option<PhysicalUnit>, StoreError>;

    async fn unit_by_barcode(&mut self, barcode: &Barcode) -> Result<Option<PhysicalUnit>, StoreError>;

    /// Units among `ids` that exist (missing ids are skipped).
    async fn units(&mut self, ids: &[UnitId]) -> Result<Vec<PhysicalUnit>, StoreError>;

    /// Persist the mutable columns: `status`, `location`, `updated_at`.
    async fn update_unit_state(&mut self, unit: &PhysicalUnit) -> Result<(), StoreError>;

    async fn status_counts(&mut self, item_id: Option<ItemId>) -> Result<StatusCounts, StoreError>;

    // Containment graph

    /// Create a new active edge. Does not close any prior edge.
    async fn insert_edge(&mut self, edge: &Containment) -> Result<(), StoreError>;

    /// Set `effective_to = at` on every active edge touching `unit_id` at
    /// `endpoint`; returns how many were closed.
    async fn close_edges(
        &mut self,
        unit_id: UnitId,
        endpoint: EdgeEndpoint,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn active_children_of(&mut self, unit_id: UnitId) -> Result<Vec<Containment>, StoreError>;

    async fn active_parents_of(&mut self, unit_id: UnitId) -> Result<Vec<Containment>, StoreError>;

    async fn children_as_of(
        &mut self,
        unit_id: UnitId,
        at: DateTime<Utc>,
    ) -> Result<Vec<Containment>, StoreError>;

    async fn parents_as_of(
        &mut self,
        unit_id: UnitId,
        at: DateTime<Utc>,
    ) -> Result<Vec<Containment>, StoreError>;

    /// Hold off other edge insertions until the transaction ends, so a
    /// reachability check stays valid through the insert it guards.
    async fn lock_containment_graph(&mut self) -> Result<(), StoreError>;

    /// Bounded search for a path `from` →* `to` over active edges.
    async fn reaches(
        &mut self,
        from: UnitId,
        to: UnitId,
        max_depth: u32,
    ) -> Result<Reachability, StoreError>;

    // Ledger

    /// Append one entry; the store assigns its timestamp.
    async fn append_event(&mut self, entry: NewLedgerEntry) -> Result<LedgerEntry, StoreError>;

    /// Entries whose principal unit is `unit_id`, oldest first.
    async fn events_for_unit(&mut self, unit_id: UnitId) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Entries naming `unit_id` as principal or as a referenced source,
    /// target or containment endpoint, oldest first.
    async fn events_touching_unit(&mut self, unit_id: UnitId)
        -> Result<Vec<LedgerEntry>, StoreError>;

    /// Filtered entries, newest first.
    async fn query_events(
        &mut self,
        filter: &LedgerFilter,
        pagination: Pagination,
    ) -> Result<LedgerPage, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
