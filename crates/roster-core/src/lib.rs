//! Core types and merge engine for the Roster contact store.
//!
//! This crate is deliberately free of database dependencies. Backends
//! implement [`store::ContactTx`] and run the engine inside their own
//! transactions.

pub mod contact;
pub mod error;
pub mod finder;
pub mod maintain;
pub mod merger;
pub mod migrate;
pub mod reconcile;
pub mod relation;
pub mod store;

#[cfg(test)]
mod memory;

pub use error::{Error, Result};
