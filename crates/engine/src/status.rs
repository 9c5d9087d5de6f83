//! Transaction status
//!
//! A [`TransactionStatus`] is what [`get_transaction`] hands back and what
//! `commit`/`rollback` consume. It records how the request was satisfied:
//!
//! | flag | meaning |
//! |------|---------|
//! | `new_transaction` | this status began the native transaction and completes it |
//! | `new_synchronization` | this status activated synchronization and triggers callbacks |
//! | `new_holder` | the holder was bound for this status and is unbound at cleanup |
//! | `new_session` | the session was opened for this status and is closed at cleanup |
//!
//! A status without a holder runs non-transactionally (SUPPORTS and friends
//! with nothing to join, or NOT_SUPPORTED).
//!
//! Statuses are bound to the thread that created them.
//!
//! [`get_transaction`]: crate::TransactionCoordinator::get_transaction

use sessionbind_concurrency::{synchronization, ResourceHolder, ResourceRegistry, SynchronizationRef};
use sessionbind_core::{Savepoint, Session, TransactionState};
use std::sync::Arc;
use tracing::warn;

/// A suspended holder and how it was detached from the registry
#[derive(Debug)]
pub(crate) struct SuspendedHolder {
    pub(crate) holder: Arc<ResourceHolder>,
    /// Unbound from the current registry; bound again on resume
    pub(crate) local: bool,
    /// The key was hidden in the current registry; unhidden on resume
    pub(crate) hid_parent: bool,
}

/// Resources detached from the thread while an inner scope runs
pub struct SuspendedResources {
    pub(crate) holder: Option<SuspendedHolder>,
    pub(crate) synchronizations: Option<Vec<SynchronizationRef>>,
    pub(crate) name: Option<String>,
    pub(crate) read_only: bool,
    pub(crate) was_active: bool,
}

impl SuspendedResources {
    /// The suspended transaction's holder, if a transaction was suspended
    pub fn holder(&self) -> Option<&Arc<ResourceHolder>> {
        self.holder.as_ref().map(|suspended| &suspended.holder)
    }

    /// Number of suspended synchronization listeners
    pub fn synchronization_count(&self) -> usize {
        self.synchronizations.as_ref().map(Vec::len).unwrap_or(0)
    }
}

impl std::fmt::Debug for SuspendedResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuspendedResources")
            .field("holder", &self.holder())
            .field("synchronizations", &self.synchronization_count())
            .field("name", &self.name)
            .field("read_only", &self.read_only)
            .field("was_active", &self.was_active)
            .finish()
    }
}

/// Outcome of a transaction request
pub struct TransactionStatus {
    pub(crate) registry: Arc<ResourceRegistry>,
    pub(crate) holder: Option<Arc<ResourceHolder>>,
    pub(crate) new_holder: bool,
    pub(crate) new_session: bool,
    pub(crate) new_transaction: bool,
    pub(crate) new_synchronization: bool,
    pub(crate) read_only: bool,
    pub(crate) debug: bool,
    pub(crate) name: Option<String>,
    pub(crate) suspended: Option<SuspendedResources>,
    pub(crate) savepoint: Option<Savepoint>,
    pub(crate) rollback_only: bool,
    pub(crate) completed: bool,
}

impl TransactionStatus {
    pub(crate) fn new(registry: Arc<ResourceRegistry>, read_only: bool, debug: bool) -> Self {
        Self {
            registry,
            holder: None,
            new_holder: false,
            new_session: false,
            new_transaction: false,
            new_synchronization: false,
            read_only,
            debug,
            name: None,
            suspended: None,
            savepoint: None,
            rollback_only: false,
            completed: false,
        }
    }

    /// Whether this status began the native transaction
    pub fn is_new_transaction(&self) -> bool {
        self.new_transaction
    }

    /// Whether this status activated synchronization
    pub fn is_new_synchronization(&self) -> bool {
        self.new_synchronization
    }

    /// Whether a transaction (new or joined) backs this status
    pub fn has_transaction(&self) -> bool {
        self.holder.is_some()
    }

    /// Whether this status runs inside a savepoint of an outer transaction
    pub fn has_savepoint(&self) -> bool {
        self.savepoint.is_some()
    }

    /// Whether the request was read-only
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether debug logging was enabled when the status was created
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Transaction name, if the definition carried one
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether commit or rollback already ran
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Resources suspended for this status
    pub fn suspended_resources(&self) -> Option<&SuspendedResources> {
        self.suspended.as_ref()
    }

    /// The holder this status runs on
    pub fn holder(&self) -> Option<&Arc<ResourceHolder>> {
        self.holder.as_ref()
    }

    /// The transactional session, if any
    pub fn session(&self) -> Option<&Arc<dyn Session>> {
        self.holder.as_ref().map(|h| h.session())
    }

    /// State of the native transaction, if any
    pub fn transaction_state(&self) -> Option<TransactionState> {
        self.holder.as_ref().and_then(|h| h.transaction_state())
    }

    /// Request rollback of this scope
    ///
    /// Commit of this status then rolls back instead; a participating scope
    /// passes the request on to the transaction owner.
    pub fn set_rollback_only(&mut self) {
        self.rollback_only = true;
    }

    /// Whether this scope asked for rollback
    pub fn is_local_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// Whether a participant marked the shared transaction rollback-only
    pub fn is_global_rollback_only(&self) -> bool {
        self.holder
            .as_ref()
            .map(|h| h.is_rollback_only())
            .unwrap_or(false)
    }

    /// Local or global rollback-only
    pub fn is_rollback_only(&self) -> bool {
        self.is_local_rollback_only() || self.is_global_rollback_only()
    }

    /// Flush registered listeners' pending work
    pub fn flush(&self) {
        if self.new_synchronization {
            synchronization::trigger_flush();
        }
    }
}

impl Drop for TransactionStatus {
    fn drop(&mut self) {
        if !self.completed && self.new_transaction {
            warn!(
                name = ?self.name,
                "transaction status dropped without commit or rollback"
            );
        }
    }
}

impl std::fmt::Debug for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionStatus")
            .field("registry", &self.registry.name())
            .field("holder", &self.holder)
            .field("new_holder", &self.new_holder)
            .field("new_session", &self.new_session)
            .field("new_transaction", &self.new_transaction)
            .field("new_synchronization", &self.new_synchronization)
            .field("read_only", &self.read_only)
            .field("savepoint", &self.savepoint)
            .field("rollback_only", &self.rollback_only)
            .field("completed", &self.completed)
            .finish()
    }
}
