//! History storage for the Chronicle turn and history core.
//!
//! The historian only needs [`HistoryAccess`](chronicle_core::HistoryAccess)
//! to read and write checkpoints. Applications also need to list the
//! histories they have, pick one to resume, start new ones, and delete old
//! ones. This crate defines those contracts and an in-memory implementation.
//!
//! # Modules
//!
//! - [`store`] -- [`History`] and [`HistoryStore`] traits.
//! - [`memory`] -- [`InMemoryHistoryStore`], which keeps every turn in memory.

pub mod memory;
pub mod store;

pub use memory::{InMemoryHistory, InMemoryHistoryStore};
pub use store::{History, HistoryStore};
