use core::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use depot_core::{DomainError, DomainResult, Entity, ItemId, UnitId};
use depot_events::IntakePayload;

use crate::barcode::Barcode;

/// Lifecycle status of a physical unit.
///
/// ```text
/// available ──checkout──▶ checked-out   (terminal)
///     │
///     └──────combine────▶ adjusted      (terminal)
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitStatus {
    Available,
    CheckedOut,
    Adjusted,
}

impl UnitStatus {
    pub const ALL: [UnitStatus; 3] = [
        UnitStatus::Available,
        UnitStatus::CheckedOut,
        UnitStatus::Adjusted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Available => "available",
            UnitStatus::CheckedOut => "checked-out",
            UnitStatus::Adjusted => "adjusted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, UnitStatus::Available)
    }

    pub fn can_transition_to(&self, next: UnitStatus) -> bool {
        matches!(
            (self, next),
            (UnitStatus::Available, UnitStatus::CheckedOut)
                | (UnitStatus::Available, UnitStatus::Adjusted)
        )
    }

    pub fn transition(self, next: UnitStatus) -> DomainResult<UnitStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DomainError::conflict(format!(
                "illegal status transition {} -> {}",
                self.as_str(),
                next.as_str()
            )))
        }
    }
}

impl core::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UnitStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown unit status '{s}'")))
    }
}

/// Descriptive attributes recorded at intake and inherited by split outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitAttributes {
    pub item_id: ItemId,
    pub lot_number: Option<String>,
    pub expiration_date: Option<NaiveDate>,
    pub photo_url: Option<String>,
    pub location: Option<String>,
}

/// One trackable inventory instance (a box, pallet, or item).
///
/// Only `status`, `location` and `updated_at` change after creation; every
/// other historical fact lives in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalUnit {
    pub id: UnitId,
    pub barcode: Barcode,
    pub qr_code: String,
    pub item_id: ItemId,
    pub lot_number: Option<String>,
    pub expiration_date: Option<NaiveDate>,
    pub photo_url: Option<String>,
    pub location: Option<String>,
    pub status: UnitStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for PhysicalUnit {
    type Id = UnitId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl PhysicalUnit {
    /// A freshly received unit; always starts `available`.
    pub fn intake(
        id: UnitId,
        barcode: Barcode,
        qr_code: String,
        attributes: UnitAttributes,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            barcode,
            qr_code,
            item_id: attributes.item_id,
            lot_number: attributes.lot_number,
            expiration_date: attributes.expiration_date,
            photo_url: attributes.photo_url,
            location: attributes.location,
            status: UnitStatus::Available,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attributes a split output inherits from this unit. Photo is per output.
    pub fn inherited_attributes(&self, photo_url: Option<String>) -> UnitAttributes {
        UnitAttributes {
            item_id: self.item_id,
            lot_number: self.lot_number.clone(),
            expiration_date: self.expiration_date,
            photo_url,
            location: self.location.clone(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == UnitStatus::Available
    }

    /// Fail with a conflict unless the unit can still take part in `operation`.
    pub fn ensure_available(&self, operation: &str) -> DomainResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "cannot {operation} unit {} in status {}",
                self.barcode, self.status
            )))
        }
    }

    pub fn check_out(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.status = self.status.transition(UnitStatus::CheckedOut)?;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_adjusted(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.status = self.status.transition(UnitStatus::Adjusted)?;
        self.updated_at = now;
        Ok(())
    }

    /// Move to a new location; returns the previous one.
    pub fn relocate(&mut self, location: String, now: DateTime<Utc>) -> DomainResult<Option<String>> {
        self.ensure_available("move")?;
        let previous = self.location.replace(location);
        self.updated_at = now;
        Ok(previous)
    }

    pub fn intake_payload(&self) -> IntakePayload {
        IntakePayload {
            item_id: self.item_id,
            barcode: self.barcode.as_str().to_string(),
            location: self.location.clone(),
            lot_number: self.lot_number.clone(),
            expiration_date: self.expiration_date,
            photo_url: self.photo_url.clone(),
        }
    }
}
