use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use depot_core::{DomainError, ItemId, UnitId};
#[cfg(test)]
use depot_events::EventKind;
use depot_events::{LedgerEntry, NewLedgerEntry};
use depot_units::{
    Barcode, Containment, ContainmentGraph, EdgeEndpoint, PhysicalUnit, Reachability,
};

use crate::clock::{Clock, SystemClock};

use super::query::{LedgerFilter, LedgerPage, Pagination};
use super::{StatusCounts, StoreError, UnitStore, UnitTransaction};

/// Everything the in-memory store holds. Cloned into each transaction.
#[derive(Debug, Clone, Default)]
struct DepotState {
    units: HashMap<UnitId, PhysicalUnit>,
    barcodes: HashMap<String, UnitId>,
    graph: ContainmentGraph,
    /// Append order; timestamps are non-decreasing along it.
    events: Vec<LedgerEntry>,
}

impl DepotState {
    fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.events.last().map(|e| e.timestamp)
    }
}

/// In-memory unit store.
///
/// Intended for tests/dev. A transaction holds the store's lock from `begin`
/// until commit or drop, so transactions are fully serialized.
#[derive(Clone)]
pub struct InMemoryUnitStore {
    state: Arc<Mutex<DepotState>>,
    clock: Arc<dyn Clock>,
    #[cfg(test)]
    fail_append: Arc<std::sync::Mutex<Option<EventKind>>>,
}

impl Default for InMemoryUnitStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl std::fmt::Debug for InMemoryUnitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryUnitStore").finish_non_exhaustive()
    }
}

impl InMemoryUnitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `clock` for ledger timestamps.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(DepotState::default())),
            clock,
            #[cfg(test)]
            fail_append: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Make every later append of `kind` fail, to exercise rollback.
    #[cfg(test)]
    pub(crate) fn fail_appends_of(&self, kind: EventKind) {
        *self.fail_append.lock().unwrap() = Some(kind);
    }
}

#[async_trait::async_trait]
impl UnitStore for InMemoryUnitStore {
    async fn begin(&self) -> Result<Box<dyn UnitTransaction>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTransaction {
            guard,
            working,
            clock: Arc::clone(&self.clock),
            #[cfg(test)]
            fail_append: *self.fail_append.lock().unwrap(),
        }))
    }
}

/// Works on a private copy of the state; `commit` swaps it in.
struct InMemoryTransaction {
    guard: OwnedMutexGuard<DepotState>,
    working: DepotState,
    clock: Arc<dyn Clock>,
    #[cfg(test)]
    fail_append: Option<EventKind>,
}

fn graph_error(err: DomainError) -> StoreError {
    match err {
        DomainError::Conflict(msg) => StoreError::Conflict(msg),
        other => StoreError::Constraint(other.to_string()),
    }
}

#[async_trait::async_trait]
impl UnitTransaction for InMemoryTransaction {
    async fn insert_unit(&mut self, unit: &PhysicalUnit) -> Result<(), StoreError> {
        let state = &mut self.working;
        if state.barcodes.contains_key(unit.barcode.as_str()) {
            return Err(StoreError::Conflict(format!(
                "barcode '{}' is already assigned",
                unit.barcode
            )));
        }
        if state.units.contains_key(&unit.id) {
            return Err(StoreError::Conflict(format!("unit {} already exists", unit.id)));
        }
        state.barcodes.insert(unit.barcode.as_str().to_string(), unit.id);
        state.units.insert(unit.id, unit.clone());
        Ok(())
    }

    async fn unit(&mut self, id: UnitId) -> Result<Option<PhysicalUnit>, StoreError> {
        Ok(self.working.units.get(&id).cloned())
    }

    async fn unit_for_update(&mut self, id: UnitId) -> Result<Option<PhysicalUnit>, StoreError> {
        // The transaction already holds the store lock.
        self.unit(id).await
    }

    async fn unit_by_barcode(&mut self, barcode: &Barcode) -> Result<Option<PhysicalUnit>, StoreError> {
        let state = &self.working;
        Ok(state
            .barcodes
            .get(barcode.as_str())
            .and_then(|id| state.units.get(id))
            .cloned())
    }

    async fn units(&mut self, ids: &[UnitId]) -> Result<Vec<PhysicalUnit>, StoreError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.working.units.get(id).cloned())
            .collect())
    }

    async fn update_unit_state(&mut self, unit: &PhysicalUnit) -> Result<(), StoreError> {
        let stored = self
            .working
            .units
            .get_mut(&unit.id)
            .ok_or_else(|| StoreError::NotFound(format!("unit {}", unit.id)))?;
        stored.status = unit.status;
        stored.location = unit.location.clone();
        stored.updated_at = unit.updated_at;
        Ok(())
    }

    async fn status_counts(&mut self, item_id: Option<ItemId>) -> Result<StatusCounts, StoreError> {
        let mut counts = StatusCounts::default();
        for unit in self.working.units.values() {
            if item_id.is_none_or(|item| item == unit.item_id) {
                counts.add(unit.status, 1);
            }
        }
        Ok(counts)
    }

    async fn insert_edge(&mut self, edge: &Containment) -> Result<(), StoreError> {
        let units = &self.working.units;
        for endpoint in [edge.parent_unit_id, edge.child_unit_id] {
            if !units.contains_key(&endpoint) {
                return Err(StoreError::Constraint(format!(
                    "containment references missing unit {endpoint}"
                )));
            }
        }
        self.working.graph.insert(edge.clone()).map_err(graph_error)
    }

    async fn close_edges(
        &mut self,
        unit_id: UnitId,
        endpoint: EdgeEndpoint,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Ok(self.working.graph.close(unit_id, endpoint, at))
    }

    async fn active_children_of(&mut self, unit_id: UnitId) -> Result<Vec<Containment>, StoreError> {
        Ok(self.working.graph.active_children_of(unit_id))
    }

    async fn active_parents_of(&mut self, unit_id: UnitId) -> Result<Vec<Containment>, StoreError> {
        Ok(self.working.graph.active_parents_of(unit_id))
    }

    async fn children_as_of(
        &mut self,
        unit_id: UnitId,
        at: DateTime<Utc>,
    ) -> Result<Vec<Containment>, StoreError> {
        Ok(self.working.graph.children_as_of(unit_id, at))
    }

    async fn parents_as_of(
        &mut self,
        unit_id: UnitId,
        at: DateTime<Utc>,
    ) -> Result<Vec<Containment>, StoreError> {
        Ok(self.working.graph.parents_as_of(unit_id, at))
    }

    async fn lock_containment_graph(&mut self) -> Result<(), StoreError> {
        // The whole store is already held for the transaction.
        Ok(())
    }

    async fn reaches(
        &mut self,
        from: UnitId,
        to: UnitId,
        max_depth: u32,
    ) -> Result<Reachability, StoreError> {
        Ok(self.working.graph.reaches(from, to, max_depth))
    }

    async fn append_event(&mut self, entry: NewLedgerEntry) -> Result<LedgerEntry, StoreError> {
        #[cfg(test)]
        {
            if self.fail_append == Some(entry.kind()) {
                return Err(StoreError::Unavailable(format!(
                    "injected failure appending {} event",
                    entry.kind()
                )));
            }
        }

        let now = self.clock.now();
        let timestamp = self.working.last_timestamp().map_or(now, |last| now.max(last));
        let committed = entry.committed_at(timestamp);
        self.working.events.push(committed.clone());
        Ok(committed)
    }

    async fn events_for_unit(&mut self, unit_id: UnitId) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self
            .working
            .events
            .iter()
            .filter(|e| e.unit_id == unit_id)
            .cloned()
            .collect())
    }

    async fn events_touching_unit(
        &mut self,
        unit_id: UnitId,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self
            .working
            .events
            .iter()
            .filter(|e| e.touches(unit_id))
            .cloned()
            .collect())
    }

    async fn query_events(
        &mut self,
        filter: &LedgerFilter,
        pagination: Pagination,
    ) -> Result<LedgerPage, StoreError> {
        let matching: Vec<&LedgerEntry> = self
            .working
            .events
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .collect();
        let total = matching.len() as u64;
        let entries = matching
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .cloned()
            .collect();
        Ok(LedgerPage::new(entries, total, pagination))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTransaction {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }
}
