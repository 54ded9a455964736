//! Audit ledger model.
//!
//! Every lifecycle or containment mutation of a physical unit produces exactly
//! one ledger entry. Entries are immutable facts; the unit and containment rows
//! are a projection that can be rebuilt by replaying them in timestamp order.

pub mod entry;
pub mod event;
pub mod payload;

pub use entry::{LedgerEntry, NewLedgerEntry};
pub use event::{EventKind, UnknownEventKind};
pub use payload::{
    CheckoutPayload, CombinePayload, EventPayload, IntakePayload, MovePayload, SplitPayload,
};
