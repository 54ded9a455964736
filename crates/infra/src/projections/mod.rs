//! Read models rebuilt from the audit ledger.
//!
//! Unit and containment rows are a projection of the ledger; the replay here
//! reconstructs them from ledger entries alone.

pub mod replay;

pub use replay::{LedgerProjection, ReplayError};
