//! Read facade: unit lookup by barcode, temporal containment and history.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

use depot_core::{ItemId, UnitId};
use depot_events::LedgerEntry;
use depot_units::{Barcode, Containment, PhysicalUnit, UnitStatus};

use crate::catalog::{CatalogItem, ItemCatalog};
use crate::error::DepotError;
use crate::store::{StatusCounts, StoreError, UnitStore, UnitTransaction};

/// A containment edge plus the unit on its other end.
///
/// Serialized with the same snake_case keys as the unit and edge rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainmentView {
    #[serde(flatten)]
    pub edge: Containment,
    pub counterpart_barcode: String,
    pub counterpart_status: UnitStatus,
}

/// A unit with its catalog item and current containment in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitView {
    #[serde(flatten)]
    pub unit: PhysicalUnit,
    /// `None` when the catalog has no such item.
    pub item: Option<CatalogItem>,
    /// Active edges where this unit is the parent.
    pub contains: Vec<ContainmentView>,
    /// Active edges where this unit is the child.
    pub contained_in: Vec<ContainmentView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Child,
    Parent,
}

async fn decorate(
    tx: &mut Box<dyn UnitTransaction>,
    edges: Vec<Containment>,
    counterpart: Side,
) -> Result<Vec<ContainmentView>, StoreError> {
    let ids: Vec<UnitId> = edges
        .iter()
        .map(|e| match counterpart {
            Side::Child => e.child_unit_id,
            Side::Parent => e.parent_unit_id,
        })
        .collect();
    let units = tx.units(&ids).await?;

    edges
        .into_iter()
        .zip(ids)
        .map(|(edge, id)| -> Result<ContainmentView, StoreError> {
            let unit = units
                .iter()
                .find(|u| u.id == id)
                .ok_or_else(|| {
                    StoreError::Corrupt(format!("containment {} references missing unit {id}", edge.id))
                })?;
            Ok(ContainmentView {
                counterpart_barcode: unit.barcode.as_str().to_string(),
                counterpart_status: unit.status,
                edge,
            })
        })
        .collect()
}

/// Lookups over units, containment and history.
pub struct UnitQuery<S, C> {
    store: S,
    catalog: C,
}

impl<S: UnitStore, C: ItemCatalog> UnitQuery<S, C> {
    pub fn new(store: S, catalog: C) -> Self {
        Self { store, catalog }
    }

    /// Look a unit up by barcode. `Ok(None)` when no unit carries it.
    #[instrument(skip(self), err)]
    pub async fn get_unit_by_barcode(&self, barcode: &str) -> Result<Option<UnitView>, DepotError> {
        let Ok(barcode) = Barcode::parse(barcode) else {
            return Ok(None);
        };

        let mut tx = self.store.begin().await?;
        let Some(unit) = tx.unit_by_barcode(&barcode).await? else {
            return Ok(None);
        };
        let children = tx.active_children_of(unit.id).await?;
        let contains = decorate(&mut tx, children, Side::Child).await?;
        let parents = tx.active_parents_of(unit.id).await?;
        let contained_in = decorate(&mut tx, parents, Side::Parent).await?;
        drop(tx);

        let item = self.catalog.item(unit.item_id).await?;
        Ok(Some(UnitView {
            unit,
            item,
            contains,
            contained_in,
        }))
    }

    /// What `unit_id` contained at `at`.
    #[instrument(skip(self), err)]
    pub async fn contents_as_of(
        &self,
        unit_id: UnitId,
        at: DateTime<Utc>,
    ) -> Result<Vec<ContainmentView>, DepotError> {
        let mut tx = self.store.begin().await?;
        let edges = tx.children_as_of(unit_id, at).await?;
        Ok(decorate(&mut tx, edges, Side::Child).await?)
    }

    /// What contained `unit_id` at `at`.
    #[instrument(skip(self), err)]
    pub async fn containers_as_of(
        &self,
        unit_id: UnitId,
        at: DateTime<Utc>,
    ) -> Result<Vec<ContainmentView>, DepotError> {
        let mut tx = self.store.begin().await?;
        let edges = tx.parents_as_of(unit_id, at).await?;
        Ok(decorate(&mut tx, edges, Side::Parent).await?)
    }

    /// Ledger entries concerning the unit carrying `barcode`, oldest first.
    ///
    /// Includes entries filed under another unit that reference this one,
    /// such as the combine that consumed it or the split that created it.
    #[instrument(skip(self), err)]
    pub async fn history_by_barcode(&self, barcode: &str) -> Result<Option<Vec<LedgerEntry>>, DepotError> {
        let Ok(barcode) = Barcode::parse(barcode) else {
            return Ok(None);
        };
        let mut tx = self.store.begin().await?;
        let Some(unit) = tx.unit_by_barcode(&barcode).await? else {
            return Ok(None);
        };
        Ok(Some(tx.events_touching_unit(unit.id).await?))
    }

    /// Units per status, optionally for one item.
    pub async fn status_counts(&self, item_id: Option<ItemId>) -> Result<StatusCounts, DepotError> {
        let mut tx = self.store.begin().await?;
        Ok(tx.status_counts(item_id).await?)
    }
}
