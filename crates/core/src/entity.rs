//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// A physical unit keeps its identity for life even though its status and
/// location change; containment edges keep theirs across the soft-close.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
