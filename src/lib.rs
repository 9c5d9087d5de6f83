//! # sessionbind
//!
//! Thread-scoped session binding and transaction coordination.
//!
//! Business code running inside a transaction shares exactly one session per
//! transaction and thread; code outside a transaction gets a short-lived
//! session opened and closed around each call.
//!
//! ## Quick Start
//!
//! ```ignore
//! use sessionbind::prelude::*;
//!
//! let persistence = Persistence::in_memory(["Person"])?;
//! let template = persistence.template();
//!
//! // One session, one native transaction, however deep the call chain
//! persistence.in_transaction(&TransactionDefinition::new(), |_| {
//!     template.save(Entity::new("Person").with("name", "Ada"))?;
//!     persistence.in_transaction(&TransactionDefinition::new(), |_| {
//!         template.save(Entity::new("Person").with("name", "Grace"))
//!     })
//! })?;
//!
//! // A short-lived session for this call only
//! assert_eq!(template.count("Person")?, 2);
//! ```
//!
//! ## Layers
//!
//! - [`sessionbind_core`] - session, factory and native transaction
//!   contracts, errors, exception translation
//! - [`sessionbind_concurrency`] - resource registry, resource holder,
//!   synchronization listeners
//! - [`sessionbind_engine`] - transaction coordinator, shared session proxy,
//!   template
//! - [`sessionbind_storage`] - in-memory reference store

#![warn(missing_docs)]

mod persistence;

pub mod prelude;

pub use persistence::{Persistence, PersistenceBuilder, PersistenceMetrics};

pub use sessionbind_concurrency;
pub use sessionbind_core;
pub use sessionbind_engine;
pub use sessionbind_storage;

pub use sessionbind_core::{Error, Result};
