//! Temporal containment edges between physical units.
//!
//! An edge is never deleted: "ending" it sets `effective_to`, so the graph can
//! be queried as of any instant. An edge is active on `[effective_from, effective_to)`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use depot_core::{ContainmentId, DomainError, DomainResult, Entity, UnitId, ValueObject};
use depot_events::MovePayload;

/// Strictly positive quantity of a child held by its parent.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Quantity(Decimal);

impl ValueObject for Quantity {}

impl Quantity {
    pub fn new(value: Decimal) -> DomainResult<Self> {
        if value <= Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "quantity must be greater than zero (got {value})"
            )));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Quantity {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Quantity::new(value)
    }
}

impl From<Quantity> for Decimal {
    fn from(value: Quantity) -> Self {
        value.0
    }
}

impl core::fmt::Display for Quantity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Measurement unit label ("each", "case", "kg", ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitLabel(String);

impl ValueObject for UnitLabel {}

impl UnitLabel {
    pub const DEFAULT: &'static str = "each";

    pub fn parse(raw: impl AsRef<str>) -> DomainResult<Self> {
        let value = raw.as_ref().trim();
        if value.is_empty() {
            return Err(DomainError::validation("unit label cannot be empty"));
        }
        Ok(Self(value.to_string()))
    }

    /// Parse an optional label, falling back to `each`.
    pub fn or_default(raw: Option<&str>) -> DomainResult<Self> {
        match raw {
            Some(label) => Self::parse(label),
            None => Ok(Self(Self::DEFAULT.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for UnitLabel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// "parent contains child" over a time interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Containment {
    pub id: ContainmentId,
    pub parent_unit_id: UnitId,
    pub child_unit_id: UnitId,
    pub quantity: Quantity,
    pub unit: UnitLabel,
    pub effective_from: DateTime<Utc>,
    /// `None` while the edge is active.
    pub effective_to: Option<DateTime<Utc>>,
}

impl Entity for Containment {
    type Id = ContainmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Containment {
    pub fn open(
        parent_unit_id: UnitId,
        child_unit_id: UnitId,
        quantity: Quantity,
        unit: UnitLabel,
        effective_from: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if parent_unit_id == child_unit_id {
            return Err(DomainError::invariant("a unit cannot contain itself"));
        }
        Ok(Self {
            id: ContainmentId::new(),
            parent_unit_id,
            child_unit_id,
            quantity,
            unit,
            effective_from,
            effective_to: None,
        })
    }

    pub fn is_active(&self) -> bool {
        self.effective_to.is_none()
    }

    pub fn active_at(&self, at: DateTime<Utc>) -> bool {
        self.effective_from <= at && self.effective_to.is_none_or(|to| at < to)
    }

    /// Soft-close. Closing an already closed edge keeps its original end.
    pub fn close(&mut self, at: DateTime<Utc>) {
        if self.effective_to.is_none() {
            self.effective_to = Some(at.max(self.effective_from));
        }
    }

    pub fn touches(&self, unit_id: UnitId, endpoint: EdgeEndpoint) -> bool {
        match endpoint {
            EdgeEndpoint::Parent => self.parent_unit_id == unit_id,
            EdgeEndpoint::Child => self.child_unit_id == unit_id,
            EdgeEndpoint::Either => self.parent_unit_id == unit_id || self.child_unit_id == unit_id,
        }
    }

    pub fn move_payload(&self) -> MovePayload {
        MovePayload::Contained {
            containment_id: self.id,
            parent_unit_id: self.parent_unit_id,
            child_unit_id: self.child_unit_id,
            quantity: self.quantity.value(),
            unit: self.unit.as_str().to_string(),
        }
    }
}

/// Which endpoint of an edge a unit filter applies to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EdgeEndpoint {
    /// Edges where the unit is the container.
    Parent,
    /// Edges where the unit is contained.
    Child,
    Either,
}

/// Outcome of a bounded reachability search over active edges.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    Unreachable,
    /// The search hit the depth bound without an answer.
    DepthExceeded,
}

/// In-memory temporal containment graph.
///
/// Backs the in-memory store and ledger replay. Enforces at most one active
/// edge per (parent, child) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainmentGraph {
    edges: Vec<Containment>,
}

impl ContainmentGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edges(&self) -> &[Containment] {
        &self.edges
    }

    pub fn insert(&mut self, edge: Containment) -> DomainResult<()> {
        if !edge.is_active() {
            return Err(DomainError::validation("new containment edges must be active"));
        }
        let duplicate = self.edges.iter().any(|e| {
            e.is_active()
                && e.parent_unit_id == edge.parent_unit_id
                && e.child_unit_id == edge.child_unit_id
        });
        if duplicate {
            return Err(DomainError::conflict(format!(
                "unit {} already actively contains unit {}",
                edge.parent_unit_id, edge.child_unit_id
            )));
        }
        self.edges.push(edge);
        Ok(())
    }

    /// Close every active edge touching `unit_id` at `endpoint`; returns how many.
    pub fn close(&mut self, unit_id: UnitId, endpoint: EdgeEndpoint, at: DateTime<Utc>) -> u64 {
        let mut closed = 0;
        for edge in self.edges.iter_mut().filter(|e| e.is_active() && e.touches(unit_id, endpoint)) {
            edge.close(at);
            closed += 1;
        }
        closed
    }

    pub fn active_children_of(&self, unit_id: UnitId) -> Vec<Containment> {
        self.collect(|e| e.is_active() && e.parent_unit_id == unit_id)
    }

    pub fn active_parents_of(&self, unit_id: UnitId) -> Vec<Containment> {
        self.collect(|e| e.is_active() && e.child_unit_id == unit_id)
    }

    pub fn children_as_of(&self, unit_id: UnitId, at: DateTime<Utc>) -> Vec<Containment> {
        self.collect(|e| e.parent_unit_id == unit_id && e.active_at(at))
    }

    pub fn parents_as_of(&self, unit_id: UnitId, at: DateTime<Utc>) -> Vec<Containment> {
        self.collect(|e| e.child_unit_id == unit_id && e.active_at(at))
    }

    /// Breadth-first search from `from` down active edges, at most `max_depth` levels.
    ///
    /// `DepthExceeded` means an active edge below the last explored level was
    /// left unexplored; a chain that simply ends at the bound is `Unreachable`.
    pub fn reaches(&self, from: UnitId, to: UnitId, max_depth: u32) -> Reachability {
        let mut seen = HashSet::from([from]);
        let mut frontier = vec![from];

        for depth in 1..=max_depth {
            let mut next = Vec::new();
            for node in frontier {
                for child in self.active_child_ids(node) {
                    if child == to {
                        tracing::debug!(%from, %to, depth, "containment path found");
                        return Reachability::Reachable;
                    }
                    if seen.insert(child) {
                        next.push(child);
                    }
                }
            }
            if next.is_empty() {
                return Reachability::Unreachable;
            }
            frontier = next;
        }

        let truncated = frontier
            .iter()
            .any(|&node| self.active_child_ids(node).any(|child| !seen.contains(&child)));
        if truncated {
            tracing::debug!(%from, %to, max_depth, "containment search truncated");
            Reachability::DepthExceeded
        } else {
            Reachability::Unreachable
        }
    }

    fn active_child_ids(&self, unit_id: UnitId) -> impl Iterator<Item = UnitId> + '_ {
        self.edges
            .iter()
            .filter(move |e| e.is_active() && e.parent_unit_id == unit_id)
            .map(|e| e.child_unit_id)
    }

    fn collect(&self, keep: impl Fn(&Containment) -> bool) -> Vec<Containment> {
        let mut out: Vec<Containment> = self.edges.iter().filter(|e| keep(e)).cloned().collect();
        out.sort_by_key(|e| (e.effective_from, e.id));
        out
    }
}
