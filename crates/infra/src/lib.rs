//! Infrastructure layer: storage adapters, lifecycle service, ledger and
//! query facades, configuration and migrations.

pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod migrations;
pub mod projections;
pub mod query;
pub mod store;

pub use catalog::{CatalogItem, InMemoryItemCatalog, ItemCatalog, PostgresItemCatalog};
pub use clock::{Clock, SystemClock};
pub use config::{ConfigError, DepotConfig};
pub use error::{DepotError, ErrorKind};
pub use ledger::{AuditLedger, DistributionRecord, DistributionReport};
pub use lifecycle::{
    CheckoutOutcome, CombineOutcome, IntakeFailure, IntakeReport, MoveOutcome, SplitOutcome,
    UnitLifecycle,
};
pub use projections::{LedgerProjection, ReplayError};
pub use query::{ContainmentView, UnitQuery, UnitView};
pub use store::{
    InMemoryUnitStore, LedgerFilter, LedgerPage, Pagination, PostgresUnitStore, StatusCounts,
    StoreError, UnitStore, UnitTransaction,
};
