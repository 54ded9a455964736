//! `depot-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the unit ledger
//! (identifiers, the domain error model, marker traits). No infrastructure concerns.

pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{ContainmentId, EventId, ItemId, OrgId, ProgramId, UnitId, UserId};
pub use value_object::ValueObject;
