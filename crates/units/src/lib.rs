//! Physical-unit domain module.
//!
//! Business rules for trackable inventory units: identity and printable codes,
//! the status state machine, temporal containment edges, and request
//! validation. Implemented purely as deterministic domain logic (no IO, no
//! storage); the infrastructure layer drives these types inside transactions.

pub mod barcode;
pub mod containment;
pub mod request;
pub mod unit;

pub use barcode::{Barcode, BarcodeGenerator, VisualCode};
pub use containment::{Containment, ContainmentGraph, EdgeEndpoint, Quantity, Reachability, UnitLabel};
pub use request::{CheckoutUnit, CreateUnit, SplitEntry, ValidCheckout, ValidCreate, ValidSplit};
pub use unit::{PhysicalUnit, UnitAttributes, UnitStatus};
