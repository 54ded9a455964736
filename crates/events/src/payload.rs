//! Typed payloads for each ledger entry type.
//!
//! Externally the ledger is a single table with an open JSON `metadata` column;
//! internally each type has a fixed shape. Field names are camelCase on the wire
//! so existing reporting queries (`metadata->>'orgId'`, ...) keep working.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use depot_core::{ContainmentId, ItemId, OrgId, ProgramId, UnitId};

use crate::event::EventKind;

/// A unit entered the depot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakePayload {
    pub item_id: ItemId,
    pub barcode: String,
    pub location: Option<String>,
    pub lot_number: Option<String>,
    pub expiration_date: Option<NaiveDate>,
    pub photo_url: Option<String>,
}

/// A unit moved: either into a container or to a new free-text location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MovePayload {
    #[serde(rename_all = "camelCase")]
    Contained {
        containment_id: ContainmentId,
        parent_unit_id: UnitId,
        child_unit_id: UnitId,
        quantity: Decimal,
        unit: String,
    },
    #[serde(rename_all = "camelCase")]
    Relocated {
        location: String,
        previous_location: Option<String>,
    },
}

/// A unit was divided into new units.
///
/// The three vectors are parallel: `target_units[i]` was created for the
/// requested `quantities[i]` of `unit_labels[i]`, and carries `barcodes[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitPayload {
    pub source_units: Vec<UnitId>,
    pub target_units: Vec<UnitId>,
    pub quantities: Vec<Decimal>,
    #[serde(default)]
    pub unit_labels: Vec<String>,
    #[serde(default)]
    pub barcodes: Vec<String>,
}

/// Source units were consumed into a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinePayload {
    pub source_units: Vec<UnitId>,
    pub target_units: Vec<UnitId>,
}

/// A unit was distributed to an external organization.
///
/// This is the only record distribution reporting reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutPayload {
    pub org_id: OrgId,
    pub program_id: Option<ProgramId>,
    pub donation_value: Option<Decimal>,
    pub notes: Option<String>,
}

/// Tagged ledger payload. The variant determines `events.type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    Intake(IntakePayload),
    Move(MovePayload),
    Split(SplitPayload),
    Combine(CombinePayload),
    Checkout(CheckoutPayload),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Intake(_) => EventKind::Intake,
            EventPayload::Move(_) => EventKind::Move,
            EventPayload::Split(_) => EventKind::Split,
            EventPayload::Combine(_) => EventKind::Combine,
            EventPayload::Checkout(_) => EventKind::Checkout,
        }
    }

    /// Serialize to the open `metadata` JSON stored next to the type column.
    pub fn to_metadata(&self) -> Result<JsonValue, serde_json::Error> {
        match self {
            EventPayload::Intake(p) => serde_json::to_value(p),
            EventPayload::Move(p) => serde_json::to_value(p),
            EventPayload::Split(p) => serde_json::to_value(p),
            EventPayload::Combine(p) => serde_json::to_value(p),
            EventPayload::Checkout(p) => serde_json::to_value(p),
        }
    }

    /// Decode a persisted `(type, metadata)` pair.
    pub fn from_metadata(kind: EventKind, metadata: JsonValue) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            EventKind::Intake => EventPayload::Intake(serde_json::from_value(metadata)?),
            EventKind::Move => EventPayload::Move(serde_json::from_value(metadata)?),
            EventKind::Split => EventPayload::Split(serde_json::from_value(metadata)?),
            EventKind::Combine => EventPayload::Combine(serde_json::from_value(metadata)?),
            EventKind::Checkout => EventPayload::Checkout(serde_json::from_value(metadata)?),
        })
    }

    /// Every unit id the payload mentions, principal unit excluded.
    pub fn referenced_units(&self) -> Vec<UnitId> {
        match self {
            EventPayload::Intake(_) | EventPayload::Checkout(_) => Vec::new(),
            EventPayload::Move(MovePayload::Contained {
                parent_unit_id,
                child_unit_id,
                ..
            }) => vec![*parent_unit_id, *child_unit_id],
            EventPayload::Move(MovePayload::Relocated { .. }) => Vec::new(),
            EventPayload::Split(p) => p.source_units.iter().chain(&p.target_units).copied().collect(),
            EventPayload::Combine(p) => p.source_units.iter().chain(&p.target_units).copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn checkout_metadata_uses_reporting_field_names() {
        let org_id = OrgId::new();
        let payload = EventPayload::Checkout(CheckoutPayload {
            org_id,
            program_id: None,
            donation_value: Some(Decimal::new(4250, 2)),
            notes: Some("food bank".to_string()),
        });

        let metadata = payload.to_metadata().unwrap();
        assert_eq!(metadata["orgId"], json!(org_id.to_string()));
        assert_eq!(metadata["donationValue"], json!(42.5));
        assert_eq!(metadata["notes"], json!("food bank"));
        assert!(metadata["programId"].is_null());
    }

    #[test]
    fn move_variants_decode_by_shape() {
        let relocated = json!({ "location": "B-12" });
        let decoded = EventPayload::from_metadata(EventKind::Move, relocated).unwrap();
        assert_eq!(
            decoded,
            EventPayload::Move(MovePayload::Relocated {
                location: "B-12".to_string(),
                previous_location: None,
            })
        );

        let parent = UnitId::new();
        let child = UnitId::new();
        let containment_id = ContainmentId::new();
        let contained = json!({
            "containmentId": containment_id,
            "parentUnitId": parent,
            "childUnitId": child,
            "quantity": 12,
            "unit": "each",
        });
        match EventPayload::from_metadata(EventKind::Move, contained).unwrap() {
            EventPayload::Move(MovePayload::Contained {
                parent_unit_id,
                child_unit_id,
                quantity,
                ..
            }) => {
                assert_eq!(parent_unit_id, parent);
                assert_eq!(child_unit_id, child);
                assert_eq!(quantity, Decimal::from(12));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn split_metadata_without_labels_still_decodes() {
        let source = UnitId::new();
        let targets = [UnitId::new(), UnitId::new()];
        let metadata = json!({
            "sourceUnits": [source],
            "targetUnits": targets,
            "quantities": [5, 3],
        });

        let EventPayload::Split(split) = EventPayload::from_metadata(EventKind::Split, metadata).unwrap()
        else {
            panic!("expected split payload");
        };
        assert_eq!(split.source_units, vec![source]);
        assert_eq!(split.quantities, vec![Decimal::from(5), Decimal::from(3)]);
        assert!(split.unit_labels.is_empty());
    }

    #[test]
    fn payload_of_wrong_shape_is_rejected() {
        let err = EventPayload::from_metadata(EventKind::Combine, json!({ "orgId": "x" }));
        assert!(err.is_err());
    }

    #[test]
    fn referenced_units_cover_sources_and_targets() {
        let a = UnitId::new();
        let b = UnitId::new();
        let d = UnitId::new();
        let payload = EventPayload::Combine(CombinePayload {
            source_units: vec![a, b],
            target_units: vec![d],
        });
        assert_eq!(payload.referenced_units(), vec![a, b, d]);
        assert_eq!(payload.kind(), EventKind::Combine);
    }
}
