//! Transaction coordination for sessionbind
//!
//! This crate drives transactions over the bindings kept by
//! `sessionbind-concurrency`:
//! - TransactionCoordinator: propagation, suspend/resume, commit/rollback
//! - SharedSession: a session proxy resolving the current session per call
//! - SessionTemplate: translated access to any session
//! - Session utilities and the listener tying sessions to a transaction
//! - Coordinator configuration and metrics

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod coordinator;
pub mod metrics;
pub mod session_utils;
pub mod shared;
pub mod status;
pub mod template;

pub use config::{ConfigError, CoordinatorConfig};
pub use coordinator::TransactionCoordinator;
pub use metrics::TransactionMetrics;
pub use session_utils::{
    get_session, transactional_session, ResolvedSession, SessionSynchronization,
    SCOPED_SESSION_SYNCHRONIZATION_ORDER, SESSION_SYNCHRONIZATION_ORDER,
};
pub use shared::SharedSession;
pub use status::{SuspendedResources, TransactionStatus};
pub use template::SessionTemplate;
