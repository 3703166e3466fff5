//! Shared building blocks for the stemline processing engine:
//! error taxonomy, layered config resolution, the append-only event log,
//! filesystem primitives, the lock manager, and the small persisted
//! state store.

pub mod config;
pub mod error;
pub mod events;
pub mod fs;
pub mod lock;
pub mod store;

pub use error::{Error, Result};
pub use events::{Event, EventLog, Severity};
