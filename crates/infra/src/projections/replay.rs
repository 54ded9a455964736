//! Ledger replay: rebuild units and containment intervals from entries.
//!
//! Entries are applied in commit order. Each kind maps to the same state
//! change the lifecycle made when it was written:
//! - `intake` creates a unit
//! - `move` either opens an edge or changes a location
//! - `split` creates the outputs and closes the source's inbound edges
//! - `combine` closes every edge touching a source and marks it adjusted
//! - `checkout` marks the unit checked out

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use depot_core::{ContainmentId, EventId, UnitId};
use depot_events::{EventPayload, LedgerEntry, MovePayload};
use depot_units::{
    Barcode, Containment, ContainmentGraph, EdgeEndpoint, PhysicalUnit, Quantity, UnitAttributes,
    UnitLabel, VisualCode,
};

use crate::error::DepotError;
use crate::ledger::AuditLedger;
use crate::store::UnitStore;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("ledger error: {0}")]
    Ledger(#[from] DepotError),

    #[error("entry {event_id} cannot be applied: {reason}")]
    Inconsistent { event_id: EventId, reason: String },
}

/// Units and containment graph as implied by the ledger.
#[derive(Debug, Clone, Default)]
pub struct LedgerProjection {
    units: HashMap<UnitId, PhysicalUnit>,
    graph: ContainmentGraph,
    applied: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

impl LedgerProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay `entries` (commit order) into a fresh projection.
    pub fn replay<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Result<Self, ReplayError> {
        let mut projection = Self::new();
        for entry in entries {
            projection.apply(entry)?;
        }
        Ok(projection)
    }

    /// Rebuild from every entry the ledger holds.
    pub async fn rebuild<S: UnitStore>(ledger: &AuditLedger<S>) -> Result<Self, ReplayError> {
        let entries = ledger.all().await?;
        let projection = Self::replay(&entries)?;
        tracing::info!(
            entries = projection.applied,
            units = projection.units.len(),
            edges = projection.graph.edges().len(),
            "ledger replayed"
        );
        Ok(projection)
    }

    pub fn unit(&self, id: UnitId) -> Option<&PhysicalUnit> {
        self.units.get(&id)
    }

    pub fn units(&self) -> impl Iterator<Item = &PhysicalUnit> {
        self.units.values()
    }

    pub fn graph(&self) -> &ContainmentGraph {
        &self.graph
    }

    /// Number of entries applied so far.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    pub fn apply(&mut self, entry: &LedgerEntry) -> Result<(), ReplayError> {
        let fail = |reason: String| ReplayError::Inconsistent {
            event_id: entry.id,
            reason,
        };
        if self.last_timestamp.is_some_and(|last| entry.timestamp < last) {
            return Err(fail("entries are out of order".to_string()));
        }
        let at = entry.timestamp;

        match &entry.payload {
            EventPayload::Intake(intake) => {
                let barcode = Barcode::parse(&intake.barcode).map_err(|e| fail(e.to_string()))?;
                let attributes = UnitAttributes {
                    item_id: intake.item_id,
                    lot_number: intake.lot_number.clone(),
                    expiration_date: intake.expiration_date,
                    photo_url: intake.photo_url.clone(),
                    location: intake.location.clone(),
                };
                self.insert_unit(entry.unit_id, barcode, attributes, at)
                    .map_err(fail)?;
            }
            EventPayload::Move(MovePayload::Contained {
                containment_id,
                parent_unit_id,
                child_unit_id,
                quantity,
                unit,
            }) => {
                let edge = open_edge(*containment_id, *parent_unit_id, *child_unit_id, *quantity, unit, at)
                    .map_err(fail)?;
                self.graph.insert(edge).map_err(|e| fail(e.to_string()))?;
            }
            EventPayload::Move(MovePayload::Relocated { location, .. }) => {
                let unit = self.unit_mut(entry.unit_id).map_err(fail)?;
                unit.relocate(location.clone(), at).map_err(|e| fail(e.to_string()))?;
            }
            EventPayload::Split(split) => {
                if split.barcodes.len() != split.target_units.len() {
                    return Err(fail("split entry does not carry a barcode per output".to_string()));
                }
                for source_id in &split.source_units {
                    let source = self
                        .units
                        .get(source_id)
                        .cloned()
                        .ok_or_else(|| fail(format!("unknown source unit {source_id}")))?;
                    for (target_id, barcode) in split.target_units.iter().zip(&split.barcodes) {
                        let barcode = Barcode::parse(barcode).map_err(|e| fail(e.to_string()))?;
                        self.insert_unit(*target_id, barcode, source.inherited_attributes(None), at)
                            .map_err(fail)?;
                    }
                    self.graph.close(*source_id, EdgeEndpoint::Child, at);
                }
            }
            EventPayload::Combine(combine) => {
                for source_id in &combine.source_units {
                    self.graph.close(*source_id, EdgeEndpoint::Either, at);
                    let unit = self.unit_mut(*source_id).map_err(fail)?;
                    unit.mark_adjusted(at).map_err(|e| fail(e.to_string()))?;
                }
            }
            EventPayload::Checkout(_) => {
                let unit = self.unit_mut(entry.unit_id).map_err(fail)?;
                unit.check_out(at).map_err(|e| fail(e.to_string()))?;
            }
        }

        self.applied += 1;
        self.last_timestamp = Some(at);
        Ok(())
    }

    fn insert_unit(
        &mut self,
        id: UnitId,
        barcode: Barcode,
        attributes: UnitAttributes,
        at: DateTime<Utc>,
    ) -> Result<(), String> {
        if self.units.contains_key(&id) {
            return Err(format!("unit {id} received twice"));
        }
        let qr_code = VisualCode::render(&barcode)
            .map_err(|e| e.to_string())?
            .data_url();
        self.units
            .insert(id, PhysicalUnit::intake(id, barcode, qr_code, attributes, at));
        Ok(())
    }

    fn unit_mut(&mut self, id: UnitId) -> Result<&mut PhysicalUnit, String> {
        self.units
            .get_mut(&id)
            .ok_or_else(|| format!("unknown unit {id}"))
    }
}

fn open_edge(
    id: ContainmentId,
    parent: UnitId,
    child: UnitId,
    quantity: rust_decimal::Decimal,
    unit: &str,
    at: DateTime<Utc>,
) -> Result<Containment, String> {
    let quantity = Quantity::new(quantity).map_err(|e| e.to_string())?;
    let unit = UnitLabel::parse(unit).map_err(|e| e.to_string())?;
    let mut edge = Containment::open(parent, child, quantity, unit, at).map_err(|e| e.to_string())?;
    edge.id = id;
    Ok(edge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;

    use depot_core::{ItemId, OrgId};
    use depot_events::{CheckoutPayload, NewLedgerEntry};
    use depot_units::{CheckoutUnit, CreateUnit, SplitEntry, UnitStatus};

    use crate::clock::ManualClock;
    use crate::config::DepotConfig;
    use crate::lifecycle::UnitLifecycle;
    use crate::store::{InMemoryUnitStore, UnitTransaction};

    #[tokio::test]
    async fn replay_matches_committed_state() {
        let clock = Arc::new(ManualClock::starting_at(
            Utc.with_ymd_and_hms(2025, 9, 1, 7, 0, 0).unwrap(),
        ));
        let store = InMemoryUnitStore::with_clock(clock.clone());
        let lifecycle = UnitLifecycle::new(store.clone(), &DepotConfig::default())
            .unwrap()
            .with_clock(clock.clone());
        let item = ItemId::new();

        let mut ids = Vec::new();
        for barcode in ["PALLET", "CASE-A", "CASE-B", "TOTE"] {
            clock.advance(Duration::seconds(1));
            let unit = lifecycle
                .create(CreateUnit {
                    barcode: Some(barcode.to_string()),
                    location: Some("Receiving".to_string()),
                    lot_number: Some("L-1".to_string()),
                    ..CreateUnit::for_item(item)
                })
                .await
                .unwrap();
            ids.push(unit.id);
        }
        let [pallet, case_a, case_b, tote] = ids[..] else {
            unreachable!()
        };

        lifecycle.add_containment(pallet, case_a, Decimal::from(2), Some("case"), None).await.unwrap();
        lifecycle.add_containment(pallet, case_b, Decimal::ONE, None, None).await.unwrap();
        let split = lifecycle
            .split(case_a, &[SplitEntry::new(6, "each"), SplitEntry::new(6, "each")], None)
            .await
            .unwrap();
        lifecycle.add_containment(tote, split.units[0].id, Decimal::ONE, None, None).await.unwrap();
        lifecycle.combine(&[case_b], tote, None).await.unwrap();
        lifecycle.move_unit(tote, "Aisle 7", None).await.unwrap();
        lifecycle.checkout(CheckoutUnit::new(split.units[1].id, OrgId::new())).await.unwrap();

        let projection = LedgerProjection::rebuild(&AuditLedger::new(store.clone())).await.unwrap();
        assert_eq!(projection.applied(), 11);
        assert_eq!(projection.units().count(), 6);

        let mut tx = store.begin().await.unwrap();
        for replayed in projection.units() {
            let stored = tx.unit(replayed.id).await.unwrap().unwrap();
            assert_eq!(replayed.barcode, stored.barcode);
            assert_eq!(replayed.qr_code, stored.qr_code);
            assert_eq!(replayed.item_id, stored.item_id);
            assert_eq!(replayed.lot_number, stored.lot_number);
            assert_eq!(replayed.location, stored.location);
            assert_eq!(replayed.status, stored.status);

            let stored_children: BTreeSet<_> = tx
                .active_children_of(replayed.id)
                .await
                .unwrap()
                .into_iter()
                .map(|e| e.id)
                .collect();
            let replayed_children: BTreeSet<_> = projection
                .graph()
                .active_children_of(replayed.id)
                .into_iter()
                .map(|e| e.id)
                .collect();
            assert_eq!(stored_children, replayed_children);
        }

        assert_eq!(projection.unit(tote).map(|u| u.location.as_deref()), Some(Some("Aisle 7")));
        assert_eq!(projection.unit(case_b).map(|u| u.status), Some(UnitStatus::Adjusted));
        assert_eq!(projection.graph().edges().len(), 3);
    }

    #[test]
    fn checkout_of_unknown_unit_is_inconsistent() {
        let entry = NewLedgerEntry::new(
            UnitId::new(),
            None,
            EventPayload::Checkout(CheckoutPayload {
                org_id: OrgId::new(),
                program_id: None,
                donation_value: None,
                notes: None,
            }),
        )
        .committed_at(Utc::now());

        let err = LedgerProjection::replay([&entry]).unwrap_err();
        assert!(matches!(err, ReplayError::Inconsistent { event_id, .. } if event_id == entry.id));
    }
}
