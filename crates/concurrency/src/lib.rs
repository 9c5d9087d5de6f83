//! Resource binding for sessionbind
//!
//! This crate holds the per-thread state the transaction coordinator works on:
//! - ResourceHolder: a session plus its transaction-scoped flags
//! - ResourceRegistry: factory-keyed holders with parent delegation
//! - Synchronization: ordered lifecycle listeners and thread-global
//!   transaction flags

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod holder;
pub mod registry;
pub mod synchronization;

#[cfg(test)]
mod testing;

pub use holder::ResourceHolder;
pub use registry::{RegistryScope, ResourceRegistry};
pub use synchronization::{SynchronizationRef, TransactionSynchronization, DEFAULT_ORDER};
