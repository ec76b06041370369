//! `aixi-memory` – The loop's record of itself.
//!
//! # Modules
//!
//! - [`history`] – [`History`][history::History]: the append-only, strictly
//!   ordered log of completed [`Cycle`][aixi_types::Cycle]s that the Ideator
//!   reads in full every cycle.
//! - [`cycle_store`] – [`CycleStore`][cycle_store::CycleStore]: persists
//!   completed cycles to a local SQLite database so runs can be inspected
//!   after the process exits.

pub mod cycle_store;
pub mod history;

pub use cycle_store::{CycleStore, CycleStoreError};
pub use history::History;
