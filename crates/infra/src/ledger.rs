//! Audit ledger: the single append path plus history and reporting reads.
//!
//! Entries are immutable once committed. Nothing here updates or deletes them.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::instrument;

use chrono::{DateTime, Utc};

use depot_core::{OrgId, ProgramId, UnitId, UserId};
use depot_events::{EventKind, EventPayload, LedgerEntry, NewLedgerEntry};

use crate::error::DepotError;
use crate::store::{LedgerFilter, LedgerPage, Pagination, StoreError, UnitStore, UnitTransaction};

/// Append one entry inside the caller's transaction.
///
/// Every lifecycle mutation goes through here exactly once, before commit.
pub(crate) async fn append(
    tx: &mut Box<dyn UnitTransaction>,
    unit_id: UnitId,
    user_id: Option<UserId>,
    payload: EventPayload,
) -> Result<LedgerEntry, StoreError> {
    let entry = tx
        .append_event(NewLedgerEntry::new(unit_id, user_id, payload))
        .await?;
    tracing::debug!(
        event_id = %entry.id,
        unit_id = %entry.unit_id,
        kind = %entry.kind(),
        timestamp = %entry.timestamp,
        "ledger entry appended"
    );
    Ok(entry)
}

/// One checkout, as reported to distribution reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionRecord {
    pub timestamp: DateTime<Utc>,
    pub unit_id: UnitId,
    /// `None` only if the unit row is missing, which the schema forbids.
    pub barcode: Option<String>,
    pub org_id: OrgId,
    pub program_id: Option<ProgramId>,
    pub donation_value: Option<Decimal>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionReport {
    /// Newest first.
    pub records: Vec<DistributionRecord>,
    pub total_donation_value: Decimal,
}

/// Read side of the ledger.
#[derive(Debug, Clone)]
pub struct AuditLedger<S> {
    store: S,
}

impl<S: UnitStore> AuditLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Entries for `unit_id`, oldest first.
    #[instrument(skip(self), fields(unit_id = %unit_id), err)]
    pub async fn events_for(&self, unit_id: UnitId) -> Result<Vec<LedgerEntry>, DepotError> {
        let mut tx = self.store.begin().await?;
        Ok(tx.events_for_unit(unit_id).await?)
    }

    /// Filtered entries, newest first.
    #[instrument(skip(self), err)]
    pub async fn query(
        &self,
        filter: &LedgerFilter,
        pagination: Pagination,
    ) -> Result<LedgerPage, DepotError> {
        let mut tx = self.store.begin().await?;
        Ok(tx.query_events(filter, pagination).await?)
    }

    /// Every entry in commit order. Used by replay.
    pub async fn all(&self) -> Result<Vec<LedgerEntry>, DepotError> {
        let mut tx = self.store.begin().await?;
        let mut pagination = Pagination::new(Some(Pagination::MAX_LIMIT), None);
        let mut entries = Vec::new();
        loop {
            let page = tx.query_events(&LedgerFilter::default(), pagination).await?;
            entries.extend(page.entries);
            if !page.has_more {
                break;
            }
            pagination = pagination.next();
        }
        entries.reverse();
        Ok(entries)
    }

    /// Checkout entries matching `filter` (its `kind` is forced to checkout),
    /// with each unit's barcode and the summed donation value.
    #[instrument(skip(self), err)]
    pub async fn distributions(&self, filter: &LedgerFilter) -> Result<DistributionReport, DepotError> {
        let filter = LedgerFilter {
            kind: Some(EventKind::Checkout),
            ..filter.clone()
        };

        let mut tx = self.store.begin().await?;
        let mut pagination = Pagination::new(Some(Pagination::MAX_LIMIT), None);
        let mut entries = Vec::new();
        loop {
            let page = tx.query_events(&filter, pagination).await?;
            entries.extend(page.entries);
            if !page.has_more {
                break;
            }
            pagination = pagination.next();
        }

        let unit_ids: Vec<UnitId> = entries.iter().map(|e| e.unit_id).collect();
        let units = tx.units(&unit_ids).await?;

        let mut total_donation_value = Decimal::ZERO;
        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            let EventPayload::Checkout(checkout) = entry.payload else {
                continue;
            };
            total_donation_value += checkout.donation_value.unwrap_or_default();
            records.push(DistributionRecord {
                timestamp: entry.timestamp,
                unit_id: entry.unit_id,
                barcode: units
                    .iter()
                    .find(|u| u.id == entry.unit_id)
                    .map(|u| u.barcode.as_str().to_string()),
                org_id: checkout.org_id,
                program_id: checkout.program_id,
                donation_value: checkout.donation_value,
                notes: checkout.notes,
            });
        }

        tracing::debug!(records = records.len(), %total_donation_value, "distribution report built");
        Ok(DistributionReport {
            records,
            total_donation_value,
        })
    }
}
