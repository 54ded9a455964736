//! Caller-facing request shapes and their validation.
//!
//! Requests arrive from the HTTP layer with optional fields; validation turns
//! them into the domain types above or fails with `DomainError::Validation`.

use std::collections::HashSet;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use depot_core::{DomainError, DomainResult, ItemId, OrgId, ProgramId, UnitId, UserId};
use depot_events::CheckoutPayload;

use crate::barcode::Barcode;
use crate::containment::{Quantity, UnitLabel};
use crate::unit::UnitAttributes;

/// Blank strings are treated as absent.
fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Intake request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUnit {
    pub item_id: Option<ItemId>,
    pub barcode: Option<String>,
    pub lot_number: Option<String>,
    pub expiration_date: Option<NaiveDate>,
    pub photo_url: Option<String>,
    pub location: Option<String>,
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidCreate {
    pub attributes: UnitAttributes,
    pub barcode: Option<Barcode>,
    pub user_id: Option<UserId>,
}

impl CreateUnit {
    pub fn for_item(item_id: ItemId) -> Self {
        Self {
            item_id: Some(item_id),
            ..Self::default()
        }
    }

    pub fn validate(self) -> DomainResult<ValidCreate> {
        let item_id = self
            .item_id
            .ok_or_else(|| DomainError::validation("itemId is required"))?;
        let barcode = non_blank(self.barcode).map(Barcode::parse).transpose()?;

        Ok(ValidCreate {
            attributes: UnitAttributes {
                item_id,
                lot_number: non_blank(self.lot_number),
                expiration_date: self.expiration_date,
                photo_url: non_blank(self.photo_url),
                location: non_blank(self.location),
            },
            barcode,
            user_id: self.user_id,
        })
    }
}

/// One output of a split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitEntry {
    pub quantity: Decimal,
    pub unit_label: Option<String>,
    pub new_barcode: Option<String>,
    pub photo_url: Option<String>,
}

impl SplitEntry {
    pub fn new(quantity: impl Into<Decimal>, unit_label: impl Into<String>) -> Self {
        Self {
            quantity: quantity.into(),
            unit_label: Some(unit_label.into()),
            new_barcode: None,
            photo_url: None,
        }
    }

    pub fn with_barcode(mut self, barcode: impl Into<String>) -> Self {
        self.new_barcode = Some(barcode.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidSplit {
    pub quantity: Quantity,
    pub unit: UnitLabel,
    pub barcode: Option<Barcode>,
    pub photo_url: Option<String>,
}

impl ValidSplit {
    /// Validate a whole split request. Empty requests and duplicate explicit
    /// barcodes are rejected before anything is written.
    pub fn validate_all(entries: &[SplitEntry]) -> DomainResult<Vec<ValidSplit>> {
        if entries.is_empty() {
            return Err(DomainError::validation("splits cannot be empty"));
        }

        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(entries.len());
        for (idx, entry) in entries.iter().enumerate() {
            let quantity = Quantity::new(entry.quantity)
                .map_err(|e| DomainError::validation(format!("splits[{idx}]: {e}")))?;
            let unit = UnitLabel::or_default(entry.unit_label.as_deref())
                .map_err(|e| DomainError::validation(format!("splits[{idx}]: {e}")))?;
            let barcode = non_blank(entry.new_barcode.clone())
                .map(Barcode::parse)
                .transpose()
                .map_err(|e| DomainError::validation(format!("splits[{idx}]: {e}")))?;

            if let Some(code) = &barcode {
                if !seen.insert(code.clone()) {
                    return Err(DomainError::validation(format!(
                        "splits[{idx}]: barcode {code} requested twice"
                    )));
                }
            }

            out.push(ValidSplit {
                quantity,
                unit,
                barcode,
                photo_url: non_blank(entry.photo_url.clone()),
            });
        }
        Ok(out)
    }
}

/// Check the source list of a combine.
pub fn validate_combine(source_unit_ids: &[UnitId], target_unit_id: UnitId) -> DomainResult<()> {
    if source_unit_ids.is_empty() {
        return Err(DomainError::validation("sourceUnitIds cannot be empty"));
    }
    let mut seen = HashSet::new();
    for id in source_unit_ids {
        if *id == target_unit_id {
            return Err(DomainError::validation(format!(
                "unit {id} cannot be combined into itself"
            )));
        }
        if !seen.insert(*id) {
            return Err(DomainError::validation(format!("unit {id} listed twice")));
        }
    }
    Ok(())
}

/// Validate a new free-text location.
pub fn validate_location(location: &str) -> DomainResult<String> {
    let location = location.trim();
    if location.is_empty() {
        return Err(DomainError::validation("location is required"));
    }
    Ok(location.to_string())
}

/// Distribution of a unit to an external organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutUnit {
    pub unit_id: UnitId,
    pub org_id: Option<OrgId>,
    pub program_id: Option<ProgramId>,
    pub donation_value: Option<Decimal>,
    pub notes: Option<String>,
    pub user_id: Option<UserId>,
}

impl CheckoutUnit {
    pub fn new(unit_id: UnitId, org_id: OrgId) -> Self {
        Self {
            unit_id,
            org_id: Some(org_id),
            program_id: None,
            donation_value: None,
            notes: None,
            user_id: None,
        }
    }

    pub fn validate(self) -> DomainResult<ValidCheckout> {
        let org_id = self
            .org_id
            .ok_or_else(|| DomainError::validation("orgId is required"))?;
        if let Some(value) = self.donation_value {
            if value < Decimal::ZERO {
                return Err(DomainError::validation("donationValue cannot be negative"));
            }
        }
        Ok(ValidCheckout {
            unit_id: self.unit_id,
            user_id: self.user_id,
            payload: CheckoutPayload {
                org_id,
                program_id: self.program_id,
                donation_value: self.donation_value,
                notes: non_blank(self.notes),
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidCheckout {
    pub unit_id: UnitId,
    pub user_id: Option<UserId>,
    pub payload: CheckoutPayload,
}
