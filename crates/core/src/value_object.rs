//! Value object trait: equality by value, not identity.
//!
//! Value objects have **no identity**; two with the same attributes are equal.
//! In the depot, quantities, barcodes and measurement-unit labels are values,
//! while physical units and containment edges are entities.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. To "modify" one,
/// construct a new one.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct UnitLabel(String);
///
/// impl ValueObject for UnitLabel {}
///
/// assert_eq!(UnitLabel("each".into()), UnitLabel("each".into()));
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
