//! # Pitcrew
//!
//! Coroutine-native workshop management backend core on the `may` runtime.
//!
//! The interesting part is the work-order / inventory consistency core:
//! line-item mutations run inside a single transaction per call, pairing the
//! cancelled-order guard with a `FOR UPDATE` lock on the product row so stock
//! counts stay correct under concurrent access. Appointment booking uses the
//! same discipline against the slot row so a slot can never be overbooked.

pub mod appointments;
pub mod config;
pub mod connection;
pub mod entities;
pub mod error;
pub mod executor;
pub mod guard;
pub mod line_items;
pub mod migrate;
pub mod patch;
pub mod stock;
pub mod transaction;
pub mod work_orders;

#[cfg(feature = "tracing")]
pub mod trace;

pub use config::DatabaseConfig;
pub use connection::connect;
pub use error::WorkshopError;
pub use executor::{ClientExecutor, Executor};
pub use transaction::{IsolationLevel, Transaction};
