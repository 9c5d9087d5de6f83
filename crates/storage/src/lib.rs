//! In-memory backing store for sessionbind
//!
//! This crate implements the session contracts against process-local state:
//! - MemoryStore: session factory with lifecycle counters and fault injection
//! - MemorySession: read-your-writes session over a buffered transaction
//! - MemoryTransaction: native transaction with savepoints
//! - ShardedStore: label-sharded committed entities

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod query;
pub mod session;
pub mod sharded;
pub mod store;
pub mod transaction;

pub use session::MemorySession;
pub use sharded::{Mutation, ShardedStore};
pub use store::{FaultPoint, MemoryStore, StoreCounts, StoreStats};
pub use transaction::MemoryTransaction;
