//! Tracing/logging setup shared by depot binaries.

/// Subscriber configuration (filters, output format).
pub mod subscriber;

pub use subscriber::{init, init_with, LogFormat};
