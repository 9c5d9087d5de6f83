//! Resource holder
//!
//! A [`ResourceHolder`] ties one session to the ambient transaction. Holders
//! are shared through `Arc`; identity (`Arc::ptr_eq`) is what the registry
//! and the coordinator compare.
//!
//! State carried next to the session:
//! - the native transaction handle bound to it, if any
//! - `synchronized_with_transaction`: enlisted in the current synchronization
//! - `rollback_only`: monotonic within one transaction, reset by [`clear`]
//! - `reference_count`: owners plus participants currently using the holder
//!
//! [`clear`]: ResourceHolder::clear

use parking_lot::Mutex;
use sessionbind_core::{NativeTransaction, Savepoint, Session, SessionId, TransactionState};
use std::sync::Arc;

#[derive(Default)]
struct HolderState {
    transaction: Option<Arc<dyn NativeTransaction>>,
    synchronized_with_transaction: bool,
    rollback_only: bool,
    reference_count: u32,
    savepoints: Vec<Savepoint>,
}

/// Session plus transaction-scoped state
pub struct ResourceHolder {
    session: Arc<dyn Session>,
    session_id: Option<SessionId>,
    state: Mutex<HolderState>,
}

impl ResourceHolder {
    /// Wrap `session`
    pub fn new(session: Arc<dyn Session>) -> Self {
        let session_id = session.id().ok();
        Self {
            session,
            session_id,
            state: Mutex::new(HolderState::default()),
        }
    }

    /// The held session
    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    /// Id of the held session, captured at construction
    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    /// Bound native transaction
    pub fn transaction(&self) -> Option<Arc<dyn NativeTransaction>> {
        self.state.lock().transaction.clone()
    }

    /// Bind a native transaction
    pub fn set_transaction(&self, transaction: Arc<dyn NativeTransaction>) {
        self.state.lock().transaction = Some(transaction);
    }

    /// State of the bound native transaction
    pub fn transaction_state(&self) -> Option<TransactionState> {
        self.transaction().map(|tx| tx.state())
    }

    /// Whether a bound native transaction is Open, CommitPending or RollbackPending
    pub fn has_active_transaction(&self) -> bool {
        self.transaction_state()
            .map(|s| s.is_active())
            .unwrap_or(false)
    }

    /// Whether the holder is enlisted in transaction synchronization
    pub fn is_synchronized_with_transaction(&self) -> bool {
        self.state.lock().synchronized_with_transaction
    }

    /// Enlist or release the holder
    pub fn set_synchronized_with_transaction(&self, synchronized: bool) {
        self.state.lock().synchronized_with_transaction = synchronized;
    }

    /// Mark the transaction rollback-only
    ///
    /// There is no way to unset the flag short of [`clear`](Self::clear).
    pub fn set_rollback_only(&self) {
        self.state.lock().rollback_only = true;
    }

    /// Whether a participant marked the transaction rollback-only
    pub fn is_rollback_only(&self) -> bool {
        self.state.lock().rollback_only
    }

    /// A caller started using the holder
    pub fn requested(&self) {
        self.state.lock().reference_count += 1;
    }

    /// A caller stopped using the holder; returns the remaining count
    pub fn released(&self) -> u32 {
        let mut state = self.state.lock();
        state.reference_count = state.reference_count.saturating_sub(1);
        state.reference_count
    }

    /// Current reference count
    pub fn reference_count(&self) -> u32 {
        self.state.lock().reference_count
    }

    /// Whether any caller still uses the holder
    pub fn is_open(&self) -> bool {
        self.reference_count() > 0
    }

    /// Remember a savepoint created for a nested scope
    pub fn push_savepoint(&self, savepoint: Savepoint) {
        self.state.lock().savepoints.push(savepoint);
    }

    /// Forget `savepoint` and every savepoint created after it
    pub fn pop_savepoint(&self, savepoint: Savepoint) {
        let mut state = self.state.lock();
        if let Some(pos) = state.savepoints.iter().position(|s| *s == savepoint) {
            state.savepoints.truncate(pos);
        }
    }

    /// Number of nested savepoints currently open
    pub fn savepoint_depth(&self) -> usize {
        self.state.lock().savepoints.len()
    }

    /// Reset transaction-scoped state
    ///
    /// Used when a pre-bound holder outlives the transaction it served.
    /// The reference count is left alone.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.transaction = None;
        state.synchronized_with_transaction = false;
        state.rollback_only = false;
        state.savepoints.clear();
    }
}

impl std::fmt::Debug for ResourceHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ResourceHolder")
            .field("session", &self.session_id)
            .field(
                "transaction",
                &state.transaction.as_ref().map(|tx| tx.state()),
            )
            .field(
                "synchronized_with_transaction",
                &state.synchronized_with_transaction,
            )
            .field("rollback_only", &state.rollback_only)
            .field("reference_count", &state.reference_count)
            .finish()
    }
}
