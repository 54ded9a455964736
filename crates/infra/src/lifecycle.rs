//! Unit lifecycle operations: intake, containment, split, combine, move and
//! checkout.
//!
//! Each operation runs in one store transaction. Its unit and edge writes and
//! exactly one ledger entry commit together; any error drops the transaction,
//! which rolls all of them back. Units an operation mutates are loaded with
//! [`UnitTransaction::unit_for_update`] in ascending id order.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{field, instrument, Span};

use depot_core::{UnitId, UserId};
use depot_events::{CombinePayload, EventPayload, LedgerEntry, MovePayload, SplitPayload};
use depot_units::request::{validate_combine, validate_location};
use depot_units::{
    Barcode, BarcodeGenerator, CheckoutUnit, Containment, CreateUnit, EdgeEndpoint, PhysicalUnit,
    Quantity, Reachability, SplitEntry, UnitAttributes, UnitLabel, ValidSplit, VisualCode,
};

use crate::clock::{Clock, SystemClock};
use crate::config::DepotConfig;
use crate::error::{DepotError, ErrorKind};
use crate::ledger;
use crate::store::{StoreError, UnitStore, UnitTransaction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOutcome {
    /// The source as committed. It stays `available` (the physical
    /// remainder); only its inbound containment edges are closed.
    pub source: PhysicalUnit,
    /// New units, in request order.
    pub units: Vec<PhysicalUnit>,
    pub closed_edges: u64,
    pub event: LedgerEntry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombineOutcome {
    /// Sources after the combine, all `adjusted`.
    pub sources: Vec<PhysicalUnit>,
    pub target_unit_id: UnitId,
    pub closed_edges: u64,
    pub event: LedgerEntry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    pub unit: PhysicalUnit,
    pub previous_location: Option<String>,
    pub event: LedgerEntry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutOutcome {
    pub unit: PhysicalUnit,
    pub event: LedgerEntry,
}

/// One rejected entry of a batch intake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeFailure {
    /// Position in the submitted batch.
    pub index: usize,
    pub kind: ErrorKind,
    pub message: String,
}

/// Result of one `intake_batch` call. Each call builds its own report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntakeReport {
    pub created: Vec<PhysicalUnit>,
    pub failures: Vec<IntakeFailure>,
}

impl IntakeReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

fn rejected(operation: &'static str, err: impl Into<DepotError>) -> DepotError {
    let err = err.into();
    tracing::warn!(operation, error = %err, "request rejected");
    err
}

fn missing(unit_id: UnitId) -> DepotError {
    DepotError::not_found(format!("unit {unit_id}"))
}

/// Load and lock `ids` in ascending order so concurrent operations acquire
/// row locks in the same sequence.
async fn lock_units(
    tx: &mut Box<dyn UnitTransaction>,
    ids: &[UnitId],
) -> Result<HashMap<UnitId, PhysicalUnit>, StoreError> {
    let mut ordered = ids.to_vec();
    ordered.sort();
    ordered.dedup();

    let mut locked = HashMap::with_capacity(ordered.len());
    for id in ordered {
        if let Some(unit) = tx.unit_for_update(id).await? {
            locked.insert(id, unit);
        }
    }
    Ok(locked)
}

/// Drives unit state changes against a [`UnitStore`].
pub struct UnitLifecycle<S> {
    store: S,
    barcodes: BarcodeGenerator,
    max_depth: u32,
    clock: Arc<dyn Clock>,
}

impl<S: UnitStore> UnitLifecycle<S> {
    pub fn new(store: S, config: &DepotConfig) -> Result<Self, DepotError> {
        Ok(Self {
            store,
            barcodes: BarcodeGenerator::new(config.barcode_prefix.clone())?,
            max_depth: config.max_containment_depth,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn new_unit(
        &self,
        barcode: Option<Barcode>,
        attributes: UnitAttributes,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<PhysicalUnit, DepotError> {
        let barcode = self.barcodes.assign(barcode);
        let qr_code = VisualCode::render(&barcode)?.data_url();
        Ok(PhysicalUnit::intake(UnitId::new(), barcode, qr_code, attributes, now))
    }

    /// Receive a new unit. Generates a barcode when none is supplied.
    #[instrument(
        skip(self, request),
        fields(item_id = ?request.item_id, unit_id = field::Empty, barcode = field::Empty),
        err
    )]
    pub async fn create(&self, request: CreateUnit) -> Result<PhysicalUnit, DepotError> {
        let valid = request.validate().map_err(|e| rejected("create", e))?;
        let unit = self.new_unit(valid.barcode, valid.attributes, self.clock.now())?;

        let span = Span::current();
        span.record("unit_id", field::display(unit.id));
        span.record("barcode", field::display(&unit.barcode));

        let mut tx = self.store.begin().await?;
        tx.insert_unit(&unit).await?;
        ledger::append(
            &mut tx,
            unit.id,
            valid.user_id,
            EventPayload::Intake(unit.intake_payload()),
        )
        .await?;
        tx.commit().await?;

        tracing::info!(unit_id = %unit.id, barcode = %unit.barcode, "unit received");
        Ok(unit)
    }

    /// Receive several units, each in its own transaction.
    #[instrument(skip(self, requests), fields(requested = requests.len()))]
    pub async fn intake_batch(&self, requests: Vec<CreateUnit>) -> IntakeReport {
        let mut report = IntakeReport::default();
        for (index, request) in requests.into_iter().enumerate() {
            match self.create(request).await {
                Ok(unit) => report.created.push(unit),
                Err(err) => report.failures.push(IntakeFailure {
                    index,
                    kind: err.kind(),
                    message: err.to_string(),
                }),
            }
        }
        tracing::info!(
            created = report.created.len(),
            failed = report.failures.len(),
            "batch intake finished"
        );
        report
    }

    /// Record that `parent_id` now holds `quantity` of `child_id`.
    ///
    /// Rejects missing units, self-containment, non-available units, a
    /// second active edge for the same pair, and any edge that would close a
    /// cycle.
    #[instrument(skip(self), fields(parent_id = %parent_id, child_id = %child_id), err)]
    pub async fn add_containment(
        &self,
        parent_id: UnitId,
        child_id: UnitId,
        quantity: Decimal,
        unit_label: Option<&str>,
        user_id: Option<UserId>,
    ) -> Result<Containment, DepotError> {
        let quantity = Quantity::new(quantity).map_err(|e| rejected("add_containment", e))?;
        let unit = UnitLabel::or_default(unit_label).map_err(|e| rejected("add_containment", e))?;
        if parent_id == child_id {
            return Err(rejected(
                "add_containment",
                DepotError::validation("a unit cannot contain itself"),
            ));
        }

        let mut tx = self.store.begin().await?;
        // Graph lock before row locks; other operations only take row locks.
        tx.lock_containment_graph().await?;
        let locked = lock_units(&mut tx, &[parent_id, child_id]).await?;
        let (Some(parent), Some(child)) = (locked.get(&parent_id), locked.get(&child_id)) else {
            let absent = if locked.contains_key(&parent_id) { child_id } else { parent_id };
            return Err(rejected(
                "add_containment",
                DepotError::validation(format!("unit {absent} does not exist")),
            ));
        };
        parent.ensure_available("pack into")?;
        child.ensure_available("pack")?;

        match tx.reaches(child_id, parent_id, self.max_depth).await? {
            Reachability::Unreachable => {}
            Reachability::Reachable => {
                return Err(DepotError::conflict(format!(
                    "unit {} already contains unit {}; the edge would create a cycle",
                    child.barcode, parent.barcode
                )));
            }
            Reachability::DepthExceeded => {
                return Err(DepotError::conflict(format!(
                    "containment below unit {} is deeper than {} levels",
                    child.barcode, self.max_depth
                )));
            }
        }

        let edge = Containment::open(parent_id, child_id, quantity, unit, self.clock.now())?;
        tx.insert_edge(&edge).await?;
        ledger::append(&mut tx, child_id, user_id, EventPayload::Move(edge.move_payload())).await?;
        tx.commit().await?;

        tracing::info!(containment_id = %edge.id, quantity = %edge.quantity, "containment added");
        Ok(edge)
    }

    /// Divide a unit into new units that inherit its item, lot, expiration
    /// and location.
    #[instrument(
        skip(self, splits),
        fields(unit_id = %unit_id, parts = splits.len(), closed = field::Empty),
        err
    )]
    pub async fn split(
        &self,
        unit_id: UnitId,
        splits: &[SplitEntry],
        user_id: Option<UserId>,
    ) -> Result<SplitOutcome, DepotError> {
        let entries = ValidSplit::validate_all(splits).map_err(|e| rejected("split", e))?;

        let mut tx = self.store.begin().await?;
        let source = tx.unit_for_update(unit_id).await?.ok_or_else(|| missing(unit_id))?;
        source.ensure_available("split")?;

        let now = self.clock.now();
        let mut units = Vec::with_capacity(entries.len());
        let mut quantities = Vec::with_capacity(entries.len());
        let mut unit_labels = Vec::with_capacity(entries.len());
        for entry in entries {
            let unit = self.new_unit(
                entry.barcode,
                source.inherited_attributes(entry.photo_url),
                now,
            )?;
            tx.insert_unit(&unit).await?;
            quantities.push(entry.quantity.value());
            unit_labels.push(entry.unit.as_str().to_string());
            units.push(unit);
        }

        let closed_edges = tx.close_edges(unit_id, EdgeEndpoint::Child, now).await?;
        Span::current().record("closed", closed_edges);

        let payload = SplitPayload {
            source_units: vec![unit_id],
            target_units: units.iter().map(|u| u.id).collect(),
            quantities,
            unit_labels,
            barcodes: units.iter().map(|u| u.barcode.as_str().to_string()).collect(),
        };
        let event = ledger::append(&mut tx, unit_id, user_id, EventPayload::Split(payload)).await?;
        tx.commit().await?;

        tracing::info!(created = units.len(), "unit split");
        Ok(SplitOutcome {
            source,
            units,
            closed_edges,
            event,
        })
    }

    /// Consume `source_unit_ids` into `target_unit_id`.
    ///
    /// Fail-fast: every source must exist and be available, otherwise nothing
    /// changes. Physically placing the sources inside the target is a separate
    /// `add_containment` call.
    #[instrument(
        skip(self, source_unit_ids),
        fields(target_unit_id = %target_unit_id, sources = source_unit_ids.len()),
        err
    )]
    pub async fn combine(
        &self,
        source_unit_ids: &[UnitId],
        target_unit_id: UnitId,
        user_id: Option<UserId>,
    ) -> Result<CombineOutcome, DepotError> {
        validate_combine(source_unit_ids, target_unit_id).map_err(|e| rejected("combine", e))?;

        let mut tx = self.store.begin().await?;
        let mut all_ids = source_unit_ids.to_vec();
        all_ids.push(target_unit_id);
        let mut locked = lock_units(&mut tx, &all_ids).await?;

        let target = locked
            .get(&target_unit_id)
            .ok_or_else(|| missing(target_unit_id))?;
        target.ensure_available("combine into")?;

        let now = self.clock.now();
        let mut closed_edges = 0;
        let mut sources = Vec::with_capacity(source_unit_ids.len());
        for id in source_unit_ids {
            let mut source = locked.remove(id).ok_or_else(|| missing(*id))?;
            source.ensure_available("combine")?;
            closed_edges += tx.close_edges(*id, EdgeEndpoint::Either, now).await?;
            source.mark_adjusted(now)?;
            tx.update_unit_state(&source).await?;
            sources.push(source);
        }

        let payload = CombinePayload {
            source_units: source_unit_ids.to_vec(),
            target_units: vec![target_unit_id],
        };
        let event =
            ledger::append(&mut tx, target_unit_id, user_id, EventPayload::Combine(payload)).await?;
        tx.commit().await?;

        tracing::info!(closed_edges, "units combined");
        Ok(CombineOutcome {
            sources,
            target_unit_id,
            closed_edges,
            event,
        })
    }

    /// Record a new location for a unit.
    #[instrument(skip(self), fields(unit_id = %unit_id), err)]
    pub async fn move_unit(
        &self,
        unit_id: UnitId,
        location: &str,
        user_id: Option<UserId>,
    ) -> Result<MoveOutcome, DepotError> {
        let location = validate_location(location).map_err(|e| rejected("move", e))?;

        let mut tx = self.store.begin().await?;
        let mut unit = tx.unit_for_update(unit_id).await?.ok_or_else(|| missing(unit_id))?;
        let previous_location = unit.relocate(location.clone(), self.clock.now())?;
        tx.update_unit_state(&unit).await?;

        let payload = MovePayload::Relocated {
            location,
            previous_location: previous_location.clone(),
        };
        let event = ledger::append(&mut tx, unit_id, user_id, EventPayload::Move(payload)).await?;
        tx.commit().await?;

        tracing::info!(location = ?unit.location, "unit moved");
        Ok(MoveOutcome {
            unit,
            previous_location,
            event,
        })
    }

    /// Distribute a unit to an organization. The checkout entry is what
    /// distribution reports read.
    #[instrument(skip(self, request), fields(unit_id = %request.unit_id, org_id = ?request.org_id), err)]
    pub async fn checkout(&self, request: CheckoutUnit) -> Result<CheckoutOutcome, DepotError> {
        let valid = request.validate().map_err(|e| rejected("checkout", e))?;

        let mut tx = self.store.begin().await?;
        let mut unit = tx
            .unit_for_update(valid.unit_id)
            .await?
            .ok_or_else(|| missing(valid.unit_id))?;
        unit.check_out(self.clock.now())?;
        tx.update_unit_state(&unit).await?;

        let event = ledger::append(
            &mut tx,
            unit.id,
            valid.user_id,
            EventPayload::Checkout(valid.payload),
        )
        .await?;
        tx.commit().await?;

        tracing::info!("unit checked out");
        Ok(CheckoutOutcome { unit, event })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use depot_core::{ItemId, OrgId};
    use depot_events::EventKind;
    use depot_units::UnitStatus;

    use crate::clock::ManualClock;
    use crate::ledger::AuditLedger;
    use crate::store::{InMemoryUnitStore, LedgerFilter, Pagination};

    struct Depot {
        clock: Arc<ManualClock>,
        store: InMemoryUnitStore,
        lifecycle: UnitLifecycle<InMemoryUnitStore>,
        item: ItemId,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
    }

    fn depot_with(config: DepotConfig) -> Depot {
        let clock = Arc::new(ManualClock::starting_at(start()));
        let store = InMemoryUnitStore::with_clock(clock.clone());
        let lifecycle = UnitLifecycle::new(store.clone(), &config)
            .unwrap()
            .with_clock(clock.clone());
        Depot {
            clock,
            store,
            lifecycle,
            item: ItemId::new(),
        }
    }

    fn depot() -> Depot {
        depot_with(DepotConfig::default())
    }

    fn qty(n: i64) -> Decimal {
        Decimal::from(n)
    }

    impl Depot {
        fn tick(&self) {
            self.clock.advance(Duration::seconds(1));
        }

        async fn unit(&self, barcode: &str) -> PhysicalUnit {
            self.tick();
            self.lifecycle
                .create(CreateUnit {
                    barcode: Some(barcode.to_string()),
                    lot_number: Some("LOT-42".to_string()),
                    location: Some("Dock 1".to_string()),
                    ..CreateUnit::for_item(self.item)
                })
                .await
                .unwrap()
        }

        async fn contain(&self, parent: &PhysicalUnit, child: &PhysicalUnit) -> Containment {
            self.tick();
            self.lifecycle
                .add_containment(parent.id, child.id, qty(1), None, None)
                .await
                .unwrap()
        }

        async fn get(&self, id: UnitId) -> PhysicalUnit {
            let mut tx = self.store.begin().await.unwrap();
            tx.unit(id).await.unwrap().unwrap()
        }

        async fn parents(&self, id: UnitId) -> Vec<Containment> {
            let mut tx = self.store.begin().await.unwrap();
            tx.active_parents_of(id).await.unwrap()
        }

        async fn children(&self, id: UnitId) -> Vec<Containment> {
            let mut tx = self.store.begin().await.unwrap();
            tx.active_children_of(id).await.unwrap()
        }

        async fn events(&self, id: UnitId) -> Vec<LedgerEntry> {
            let mut tx = self.store.begin().await.unwrap();
            tx.events_for_unit(id).await.unwrap()
        }

        async fn ledger_len(&self) -> u64 {
            let mut tx = self.store.begin().await.unwrap();
            tx.query_events(&LedgerFilter::default(), Pagination::default())
                .await
                .unwrap()
                .total
        }

        async fn unit_count(&self) -> u64 {
            let mut tx = self.store.begin().await.unwrap();
            tx.status_counts(None).await.unwrap().total()
        }
    }

    #[tokio::test]
    async fn create_assigns_distinct_barcodes_and_logs_intake() {
        let depot = depot();
        let mut barcodes = std::collections::HashSet::new();
        for _ in 0..3 {
            let unit = depot
                .lifecycle
                .create(CreateUnit::for_item(depot.item))
                .await
                .unwrap();
            assert!(unit.barcode.as_str().starts_with("UNIT-"));
            assert!(unit.qr_code.starts_with("data:image/svg+xml;base64,"));
            assert_eq!(unit.status, UnitStatus::Available);
            assert!(barcodes.insert(unit.barcode.clone()));

            let events = depot.events(unit.id).await;
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].kind(), EventKind::Intake);
        }
    }

    #[tokio::test]
    async fn create_without_item_is_rejected_and_writes_nothing() {
        let depot = depot();
        let err = depot.lifecycle.create(CreateUnit::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(depot.unit_count().await, 0);
        assert_eq!(depot.ledger_len().await, 0);
    }

    #[tokio::test]
    async fn duplicate_explicit_barcode_is_a_conflict() {
        let depot = depot();
        let first = depot.unit("UNIT-1").await;

        let err = depot
            .lifecycle
            .create(CreateUnit {
                barcode: Some("UNIT-1".to_string()),
                location: Some("Elsewhere".to_string()),
                ..CreateUnit::for_item(ItemId::new())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        // The original is not overwritten.
        assert_eq!(depot.get(first.id).await, first);
        assert_eq!(depot.unit_count().await, 1);
        assert_eq!(depot.ledger_len().await, 1);
    }

    #[tokio::test]
    async fn containment_logs_a_move_scoped_to_the_child() {
        let depot = depot();
        let pallet = depot.unit("PALLET-1").await;
        let case = depot.unit("CASE-1").await;

        let edge = depot
            .lifecycle
            .add_containment(pallet.id, case.id, qty(12), Some("case"), None)
            .await
            .unwrap();
        assert!(edge.is_active());
        assert_eq!(edge.unit.as_str(), "case");
        assert_eq!(depot.children(pallet.id).await, vec![edge.clone()]);

        let events = depot.events(case.id).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].payload, EventPayload::Move(edge.move_payload()));
        // Nothing is logged against the parent.
        assert_eq!(depot.events(pallet.id).await.len(), 1);
    }

    #[tokio::test]
    async fn containment_input_is_validated() {
        let depot = depot();
        let a = depot.unit("A").await;
        let b = depot.unit("B").await;

        let zero = depot
            .lifecycle
            .add_containment(a.id, b.id, Decimal::ZERO, None, None)
            .await
            .unwrap_err();
        assert_eq!(zero.kind(), ErrorKind::Validation);

        let ghost = depot
            .lifecycle
            .add_containment(a.id, UnitId::new(), qty(1), None, None)
            .await
            .unwrap_err();
        assert_eq!(ghost.kind(), ErrorKind::Validation);

        let itself = depot
            .lifecycle
            .add_containment(a.id, a.id, qty(1), None, None)
            .await
            .unwrap_err();
        assert_eq!(itself.kind(), ErrorKind::Validation);

        assert_eq!(depot.ledger_len().await, 2);
    }

    #[tokio::test]
    async fn one_active_edge_per_pair() {
        let depot = depot();
        let a = depot.unit("A").await;
        let b = depot.unit("B").await;
        depot.contain(&a, &b).await;

        let err = depot
            .lifecycle
            .add_containment(a.id, b.id, qty(2), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(depot.children(a.id).await.len(), 1);
    }

    #[tokio::test]
    async fn cycles_are_rejected() {
        let depot = depot();
        let a = depot.unit("A").await;
        let b = depot.unit("B").await;
        let c = depot.unit("C").await;
        depot.contain(&a, &b).await;
        depot.contain(&b, &c).await;

        let err = depot
            .lifecycle
            .add_containment(c.id, a.id, qty(1), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(depot.parents(a.id).await.is_empty());
    }

    #[tokio::test]
    async fn traversal_depth_is_bounded() {
        let depot = depot_with(DepotConfig {
            max_containment_depth: 2,
            ..DepotConfig::default()
        });
        let a = depot.unit("A").await;
        let b = depot.unit("B").await;
        let c = depot.unit("C").await;
        let d = depot.unit("D").await;
        let x = depot.unit("X").await;
        depot.contain(&a, &b).await;
        depot.contain(&b, &c).await;
        depot.contain(&c, &d).await;

        // a has descendants three levels down; the search gives up at two.
        let err = depot
            .lifecycle
            .add_containment(x.id, a.id, qty(1), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        // A shallow child is fine.
        depot.contain(&x, &d).await;
    }

    #[tokio::test]
    async fn concurrent_edges_cannot_close_a_longer_cycle() {
        let depot = depot();
        let a = depot.unit("A").await;
        let b = depot.unit("B").await;
        let c = depot.unit("C").await;
        let d = depot.unit("D").await;
        depot.contain(&b, &c).await;
        depot.contain(&d, &a).await;

        // a -> b and c -> d would together close a -> b -> c -> d -> a.
        let (first, second) = tokio::join!(
            depot.lifecycle.add_containment(a.id, b.id, qty(1), None, None),
            depot.lifecycle.add_containment(c.id, d.id, qty(1), None, None),
        );
        assert_eq!(
            usize::from(first.is_ok()) + usize::from(second.is_ok()),
            1,
            "exactly one edge of the would-be cycle is accepted"
        );
        let rejected = first.err().or(second.err()).unwrap();
        assert_eq!(rejected.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn overlong_barcode_prefix_is_rejected_up_front() {
        let config = DepotConfig {
            barcode_prefix: "P".repeat(100),
            ..DepotConfig::default()
        };
        let err = UnitLifecycle::new(InMemoryUnitStore::new(), &config).err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::Validation));
    }

    #[tokio::test]
    async fn chain_ending_exactly_at_the_depth_bound_can_be_packed() {
        let depot = depot_with(DepotConfig {
            max_containment_depth: 2,
            ..DepotConfig::default()
        });
        let a = depot.unit("A").await;
        let b = depot.unit("B").await;
        let c = depot.unit("C").await;
        let x = depot.unit("X").await;
        depot.contain(&a, &b).await;
        depot.contain(&b, &c).await;

        // c is a leaf two levels below a, so the search is complete.
        depot.contain(&x, &a).await;
        assert_eq!(depot.parents(a.id).await.len(), 1);
    }

    #[tokio::test]
    async fn split_creates_independent_units_and_closes_inbound_edges() {
        let depot = depot();
        let pallet = depot.unit("PALLET-1").await;
        let a = depot.unit("UNIT-1").await;
        let inner = depot.unit("INNER-1").await;
        depot.contain(&pallet, &a).await;
        depot.contain(&a, &inner).await;
        let before = depot.ledger_len().await;
        depot.tick();

        let outcome = depot
            .lifecycle
            .split(
                a.id,
                &[SplitEntry::new(5, "each"), SplitEntry::new(3, "each")],
                None,
            )
            .await
            .unwrap();

        let [b, c] = outcome.units.as_slice() else {
            panic!("expected two units, got {}", outcome.units.len());
        };
        assert_ne!(b.id, c.id);
        assert_ne!(b.barcode, c.barcode);
        assert_ne!(b.barcode, a.barcode);
        for unit in [b, c] {
            assert_eq!(unit.item_id, a.item_id);
            assert_eq!(unit.lot_number, a.lot_number);
            assert_eq!(unit.location, a.location);
            assert_eq!(unit.status, UnitStatus::Available);
            assert_eq!(depot.get(unit.id).await, *unit);
        }

        // Inbound edge closed; the source's own contents are untouched.
        assert_eq!(outcome.closed_edges, 1);
        assert!(depot.parents(a.id).await.is_empty());
        assert_eq!(depot.children(a.id).await.len(), 1);
        // The source stays available.
        assert_eq!(outcome.source.status, UnitStatus::Available);
        assert_eq!(depot.get(a.id).await.status, UnitStatus::Available);

        assert_eq!(depot.ledger_len().await, before + 1);
        assert_eq!(
            outcome.event.payload,
            EventPayload::Split(SplitPayload {
                source_units: vec![a.id],
                target_units: vec![b.id, c.id],
                quantities: vec![qty(5), qty(3)],
                unit_labels: vec!["each".to_string(), "each".to_string()],
                barcodes: vec![b.barcode.to_string(), c.barcode.to_string()],
            })
        );
        assert_eq!(outcome.event.unit_id, a.id);
        assert!(depot.events(b.id).await.is_empty());
    }

    #[tokio::test]
    async fn split_rejects_empty_and_missing() {
        let depot = depot();
        let a = depot.unit("A").await;

        let empty = depot.lifecycle.split(a.id, &[], None).await.unwrap_err();
        assert_eq!(empty.kind(), ErrorKind::Validation);

        let missing = depot
            .lifecycle
            .split(UnitId::new(), &[SplitEntry::new(1, "each")], None)
            .await
            .unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn failed_split_leaves_no_trace() {
        let depot = depot();
        let pallet = depot.unit("PALLET-1").await;
        let a = depot.unit("A").await;
        depot.unit("TAKEN").await;
        depot.contain(&pallet, &a).await;
        let units = depot.unit_count().await;
        let events = depot.ledger_len().await;

        // The second output collides with an existing barcode.
        let err = depot
            .lifecycle
            .split(
                a.id,
                &[
                    SplitEntry::new(1, "each").with_barcode("FRESH"),
                    SplitEntry::new(1, "each").with_barcode("TAKEN"),
                ],
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(depot.unit_count().await, units);
        assert_eq!(depot.ledger_len().await, events);
        assert_eq!(depot.parents(a.id).await.len(), 1);

        // A ledger failure after every other write also rolls back.
        depot.store.fail_appends_of(EventKind::Split);
        let err = depot
            .lifecycle
            .split(a.id, &[SplitEntry::new(1, "each")], None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(depot.unit_count().await, units);
        assert_eq!(depot.ledger_len().await, events);
        assert_eq!(depot.parents(a.id).await.len(), 1);
    }

    #[tokio::test]
    async fn combine_adjusts_sources_and_closes_their_edges() {
        let depot = depot();
        let pallet = depot.unit("PALLET-1").await;
        let b = depot.unit("B").await;
        let c = depot.unit("C").await;
        let inner = depot.unit("INNER").await;
        let d = depot.unit("D").await;
        depot.contain(&pallet, &b).await;
        depot.contain(&c, &inner).await;
        depot.contain(&pallet, &d).await;

        let outcome = depot.lifecycle.combine(&[b.id, c.id], d.id, None).await.unwrap();

        assert_eq!(outcome.closed_edges, 2);
        for id in [b.id, c.id] {
            assert_eq!(depot.get(id).await.status, UnitStatus::Adjusted);
            assert!(depot.parents(id).await.is_empty());
            assert!(depot.children(id).await.is_empty());
        }
        // Edges not touching a source survive.
        assert_eq!(depot.parents(d.id).await.len(), 1);
        assert_eq!(depot.get(d.id).await.status, UnitStatus::Available);

        assert_eq!(outcome.event.unit_id, d.id);
        assert_eq!(
            outcome.event.payload,
            EventPayload::Combine(CombinePayload {
                source_units: vec![b.id, c.id],
                target_units: vec![d.id],
            })
        );
    }

    #[tokio::test]
    async fn combine_fails_fast_on_a_missing_source() {
        let depot = depot();
        let pallet = depot.unit("PALLET-1").await;
        let b = depot.unit("B").await;
        let d = depot.unit("D").await;
        depot.contain(&pallet, &b).await;
        let events = depot.ledger_len().await;

        let err = depot
            .lifecycle
            .combine(&[b.id, UnitId::new()], d.id, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(depot.get(b.id).await.status, UnitStatus::Available);
        assert_eq!(depot.parents(b.id).await.len(), 1);
        assert_eq!(depot.ledger_len().await, events);
    }

    #[tokio::test]
    async fn combine_checks_target_and_source_status() {
        let depot = depot();
        let b = depot.unit("B").await;
        let c = depot.unit("C").await;
        let d = depot.unit("D").await;

        let no_target = depot.lifecycle.combine(&[b.id], UnitId::new(), None).await.unwrap_err();
        assert_eq!(no_target.kind(), ErrorKind::NotFound);

        let into_itself = depot.lifecycle.combine(&[b.id, d.id], d.id, None).await.unwrap_err();
        assert_eq!(into_itself.kind(), ErrorKind::Validation);

        depot.lifecycle.combine(&[b.id], d.id, None).await.unwrap();
        let again = depot.lifecycle.combine(&[b.id, c.id], d.id, None).await.unwrap_err();
        assert_eq!(again.kind(), ErrorKind::Conflict);
        assert_eq!(depot.get(c.id).await.status, UnitStatus::Available);
    }

    #[tokio::test]
    async fn combine_rolls_back_when_the_ledger_write_fails() {
        let depot = depot();
        let pallet = depot.unit("PALLET-1").await;
        let b = depot.unit("B").await;
        let d = depot.unit("D").await;
        depot.contain(&pallet, &b).await;

        depot.store.fail_appends_of(EventKind::Combine);
        let err = depot.lifecycle.combine(&[b.id], d.id, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(depot.get(b.id).await.status, UnitStatus::Available);
        assert_eq!(depot.parents(b.id).await.len(), 1);
    }

    #[tokio::test]
    async fn checkout_records_the_distribution() {
        let depot = depot();
        let b = depot.unit("B").await;
        let org = OrgId::new();

        let outcome = depot
            .lifecycle
            .checkout(CheckoutUnit {
                donation_value: Some(Decimal::new(4250, 2)),
                ..CheckoutUnit::new(b.id, org)
            })
            .await
            .unwrap();
        assert_eq!(outcome.unit.status, UnitStatus::CheckedOut);
        assert_eq!(depot.get(b.id).await.status, UnitStatus::CheckedOut);

        let EventPayload::Checkout(payload) = &outcome.event.payload else {
            panic!("expected a checkout entry");
        };
        assert_eq!(payload.donation_value, Some(Decimal::new(4250, 2)));
        let metadata = outcome.event.payload.to_metadata().unwrap();
        assert_eq!(metadata["donationValue"], serde_json::json!(42.5));

        let report = AuditLedger::new(depot.store.clone())
            .distributions(&LedgerFilter {
                org_id: Some(org),
                ..LedgerFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].unit_id, b.id);
        assert_eq!(report.records[0].barcode.as_deref(), Some("B"));
        assert_eq!(report.total_donation_value, Decimal::new(4250, 2));
    }

    #[tokio::test]
    async fn checkout_is_terminal() {
        let depot = depot();
        let b = depot.unit("B").await;
        let org = OrgId::new();
        depot.lifecycle.checkout(CheckoutUnit::new(b.id, org)).await.unwrap();

        let twice = depot.lifecycle.checkout(CheckoutUnit::new(b.id, org)).await.unwrap_err();
        assert_eq!(twice.kind(), ErrorKind::Conflict);

        let moved = depot.lifecycle.move_unit(b.id, "Shelf 9", None).await.unwrap_err();
        assert_eq!(moved.kind(), ErrorKind::Conflict);

        let split = depot
            .lifecycle
            .split(b.id, &[SplitEntry::new(1, "each")], None)
            .await
            .unwrap_err();
        assert_eq!(split.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn checkout_requires_org_and_rolls_back_on_failure() {
        let depot = depot();
        let b = depot.unit("B").await;

        let no_org = depot
            .lifecycle
            .checkout(CheckoutUnit {
                org_id: None,
                ..CheckoutUnit::new(b.id, OrgId::new())
            })
            .await
            .unwrap_err();
        assert_eq!(no_org.kind(), ErrorKind::Validation);

        depot.store.fail_appends_of(EventKind::Checkout);
        let err = depot
            .lifecycle
            .checkout(CheckoutUnit::new(b.id, OrgId::new()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(depot.get(b.id).await.status, UnitStatus::Available);
        assert_eq!(depot.events(b.id).await.len(), 1);
    }

    #[tokio::test]
    async fn move_updates_location() {
        let depot = depot();
        let b = depot.unit("B").await;
        depot.tick();

        let outcome = depot.lifecycle.move_unit(b.id, " Shelf 4 ", None).await.unwrap();
        assert_eq!(outcome.previous_location.as_deref(), Some("Dock 1"));
        assert_eq!(outcome.unit.location.as_deref(), Some("Shelf 4"));

        let stored = depot.get(b.id).await;
        assert_eq!(stored.location.as_deref(), Some("Shelf 4"));
        assert!(stored.updated_at > stored.created_at);
        assert_eq!(
            outcome.event.payload,
            EventPayload::Move(MovePayload::Relocated {
                location: "Shelf 4".to_string(),
                previous_location: Some("Dock 1".to_string()),
            })
        );

        let missing = depot.lifecycle.move_unit(UnitId::new(), "Shelf 4", None).await.unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        let blank = depot.lifecycle.move_unit(b.id, "  ", None).await.unwrap_err();
        assert_eq!(blank.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn ledger_timestamps_never_decrease_for_a_unit() {
        let depot = depot();
        let b = depot.unit("B").await;
        let d = depot.unit("D").await;
        depot.contain(&d, &b).await;

        // The wall clock steps backwards.
        depot.clock.advance(Duration::seconds(-30));
        depot.lifecycle.move_unit(b.id, "Shelf 2", None).await.unwrap();
        depot.lifecycle.split(b.id, &[SplitEntry::new(2, "each")], None).await.unwrap();

        let events = depot.events(b.id).await;
        assert_eq!(
            events.iter().map(|e| e.kind()).collect::<Vec<_>>(),
            vec![EventKind::Intake, EventKind::Move, EventKind::Move, EventKind::Split]
        );
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn every_mutation_appends_exactly_one_entry() {
        let depot = depot();
        let a = depot.unit("A").await;
        let b = depot.unit("B").await;
        let c = depot.unit("C").await;
        let mut expected = 3;
        assert_eq!(depot.ledger_len().await, expected);

        depot.contain(&a, &b).await;
        expected += 1;
        assert_eq!(depot.ledger_len().await, expected);

        depot.lifecycle.split(b.id, &vec![SplitEntry::new(1, "each"); 3], None).await.unwrap();
        expected += 1;
        assert_eq!(depot.ledger_len().await, expected);

        depot.lifecycle.combine(&[b.id], c.id, None).await.unwrap();
        expected += 1;
        assert_eq!(depot.ledger_len().await, expected);

        depot.lifecycle.move_unit(c.id, "Bay 3", None).await.unwrap();
        expected += 1;
        assert_eq!(depot.ledger_len().await, expected);

        depot.lifecycle.checkout(CheckoutUnit::new(c.id, OrgId::new())).await.unwrap();
        expected += 1;
        assert_eq!(depot.ledger_len().await, expected);
    }

    #[tokio::test]
    async fn batch_intake_reports_per_entry() {
        let depot = depot();
        let requests = vec![
            CreateUnit {
                barcode: Some("BATCH-1".to_string()),
                ..CreateUnit::for_item(depot.item)
            },
            CreateUnit::default(),
            CreateUnit::for_item(depot.item),
            CreateUnit {
                barcode: Some("BATCH-1".to_string()),
                ..CreateUnit::for_item(depot.item)
            },
        ];

        let report = depot.lifecycle.intake_batch(requests).await;
        assert!(!report.is_complete());
        assert_eq!(report.created.len(), 2);
        assert_eq!(
            report.failures.iter().map(|f| (f.index, f.kind)).collect::<Vec<_>>(),
            vec![(1, ErrorKind::Validation), (3, ErrorKind::Conflict)]
        );

        // A second call starts from an empty report.
        let again = depot.lifecycle.intake_batch(vec![CreateUnit::for_item(depot.item)]).await;
        assert!(again.is_complete());
        assert_eq!(again.created.len(), 1);
        assert_eq!(depot.unit_count().await, 3);
    }
}
