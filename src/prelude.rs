//! Convenient imports for sessionbind.
//!
//! ```ignore
//! use sessionbind::prelude::*;
//!
//! let persistence = Persistence::in_memory(["Person"])?;
//! persistence.template().save(Entity::new("Person"))?;
//! ```

// Main entry point
pub use crate::persistence::{Persistence, PersistenceBuilder, PersistenceMetrics};

// Error handling
pub use sessionbind_core::{DataAccessKind, Error, Result, StoreErrorKind};

// Contracts and core types
pub use sessionbind_core::{
    CompletionStatus, Entity, EntityId, Propagation, Session, SessionFactory,
    TransactionDefinition,
};

// Transactions
pub use sessionbind_concurrency::TransactionSynchronization;
pub use sessionbind_engine::{
    CoordinatorConfig, SessionTemplate, SharedSession, TransactionCoordinator, TransactionStatus,
};

// Re-export serde_json for convenience
pub use serde_json::json;
