//! Transaction synchronization
//!
//! Per-thread list of [`TransactionSynchronization`] listeners plus the
//! thread-global flags describing the transaction the thread is running:
//! its name, whether it is read-only, and whether a native transaction is
//! actually active (a SUPPORTS scope can have synchronization without one).
//!
//! Synchronization is active between [`init_synchronization`] and
//! [`clear_synchronization`]. Only the call chain that initialized it
//! triggers callbacks; participants just register listeners.
//!
//! Listeners run sorted by [`TransactionSynchronization::order`], lowest
//! first. Sorting is stable, so equal orders keep registration order.
//!
//! No callback is ever invoked while the thread-local state is borrowed, so
//! listeners may register further listeners or query the flags.

use sessionbind_core::{CompletionStatus, Error, Result};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Order used by listeners that do not override [`TransactionSynchronization::order`]
pub const DEFAULT_ORDER: i32 = i32::MAX;

/// Shared listener handle
pub type SynchronizationRef = Arc<dyn TransactionSynchronization>;

/// Callbacks observing one transaction's lifecycle
///
/// Every method has an empty default. Listeners are thread-bound; they are
/// never invoked from a thread other than the one that registered them.
pub trait TransactionSynchronization {
    /// Position in the callback sequence, lower runs first
    fn order(&self) -> i32 {
        DEFAULT_ORDER
    }

    /// The transaction is being suspended; unbind resources
    fn suspend(&self) {}

    /// The transaction is being resumed; rebind resources
    fn resume(&self) {}

    /// Flush pending work to the store, if applicable
    fn flush(&self) {}

    /// Before commit; an error here turns the commit into a rollback
    fn before_commit(&self, _read_only: bool) -> Result<()> {
        Ok(())
    }

    /// Before commit or rollback
    fn before_completion(&self) {}

    /// After a successful commit
    fn after_commit(&self) {}

    /// After commit or rollback
    fn after_completion(&self, _status: CompletionStatus) {}
}

#[derive(Default)]
struct SynchronizationState {
    listeners: Option<SmallVec<[SynchronizationRef; 4]>>,
    name: Option<String>,
    read_only: bool,
    actual_transaction_active: bool,
}

thread_local! {
    static STATE: RefCell<SynchronizationState> = RefCell::new(SynchronizationState::default());
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Whether synchronization is active on this thread
pub fn is_synchronization_active() -> bool {
    STATE.with(|s| s.borrow().listeners.is_some())
}

/// Activate synchronization on this thread
pub fn init_synchronization() -> Result<()> {
    STATE.with(|s| {
        let mut state = s.borrow_mut();
        if state.listeners.is_some() {
            return Err(Error::IllegalState(
                "cannot activate transaction synchronization - already active".into(),
            ));
        }
        trace!("initializing transaction synchronization");
        state.listeners = Some(SmallVec::new());
        Ok(())
    })
}

/// Deactivate synchronization, dropping all registered listeners
pub fn clear_synchronization() -> Result<()> {
    STATE.with(|s| {
        let mut state = s.borrow_mut();
        if state.listeners.is_none() {
            return Err(Error::IllegalState(
                "cannot deactivate transaction synchronization - not active".into(),
            ));
        }
        trace!("clearing transaction synchronization");
        state.listeners = None;
        Ok(())
    })
}

/// Deactivate synchronization if it is active
///
/// Returns whether anything was cleared.
pub fn clear_synchronization_if_active() -> bool {
    STATE.with(|s| {
        let cleared = s.borrow_mut().listeners.take().is_some();
        if cleared {
            trace!("clearing transaction synchronization");
        }
        cleared
    })
}

/// Register a listener with the active synchronization
pub fn register_synchronization(listener: SynchronizationRef) -> Result<()> {
    STATE.with(|s| match s.borrow_mut().listeners.as_mut() {
        Some(listeners) => {
            listeners.push(listener);
            Ok(())
        }
        None => Err(Error::IllegalState(
            "transaction synchronization is not active".into(),
        )),
    })
}

/// Register a listener that only cares about completion
///
/// With synchronization inactive there is nothing to defer to, so the
/// listener's `after_completion` runs immediately with
/// [`CompletionStatus::Unknown`]. Callers must not rely on it running after
/// any particular transaction's completion in that case.
pub fn register_after_completion(listener: SynchronizationRef) {
    let unregistered = STATE.with(|s| match s.borrow_mut().listeners.as_mut() {
        Some(listeners) => {
            listeners.push(listener);
            None
        }
        None => Some(listener),
    });
    if let Some(listener) = unregistered {
        debug!("synchronization not active, invoking after-completion immediately");
        invoke_after_completion(&[listener], CompletionStatus::Unknown);
    }
}

/// Snapshot of the registered listeners, sorted by order
pub fn synchronizations() -> Result<Vec<SynchronizationRef>> {
    STATE.with(|s| match s.borrow().listeners.as_ref() {
        Some(listeners) => {
            let mut sorted: Vec<_> = listeners.iter().cloned().collect();
            sorted.sort_by_key(|l| l.order());
            Ok(sorted)
        }
        None => Err(Error::IllegalState(
            "transaction synchronization is not active".into(),
        )),
    })
}

/// Snapshot of the registered listeners, or nothing when inactive
fn synchronizations_if_active() -> Vec<SynchronizationRef> {
    synchronizations().unwrap_or_default()
}

// ============================================================================
// Thread-global transaction flags
// ============================================================================

/// Name the current transaction
pub fn set_current_transaction_name(name: Option<String>) {
    STATE.with(|s| s.borrow_mut().name = name);
}

/// Name of the current transaction
pub fn current_transaction_name() -> Option<String> {
    STATE.with(|s| s.borrow().name.clone())
}

/// Mark the current transaction read-only
pub fn set_current_transaction_read_only(read_only: bool) {
    STATE.with(|s| s.borrow_mut().read_only = read_only);
}

/// Whether the current transaction is read-only
pub fn is_current_transaction_read_only() -> bool {
    STATE.with(|s| s.borrow().read_only)
}

/// Record whether a native transaction is active
pub fn set_actual_transaction_active(active: bool) {
    STATE.with(|s| s.borrow_mut().actual_transaction_active = active);
}

/// Whether a native transaction is active
pub fn is_actual_transaction_active() -> bool {
    STATE.with(|s| s.borrow().actual_transaction_active)
}

/// Reset listeners and flags
pub fn clear() {
    STATE.with(|s| *s.borrow_mut() = SynchronizationState::default());
}

// ============================================================================
// Triggers
// ============================================================================

/// Call `flush` on every listener
pub fn trigger_flush() {
    for listener in synchronizations_if_active() {
        listener.flush();
    }
}

/// Call `before_commit` on every listener, stopping at the first error
pub fn trigger_before_commit(read_only: bool) -> Result<()> {
    for listener in synchronizations_if_active() {
        listener.before_commit(read_only)?;
    }
    Ok(())
}

/// Call `before_completion` on every listener
pub fn trigger_before_completion() {
    for listener in synchronizations_if_active() {
        listener.before_completion();
    }
}

/// Call `after_commit` on every listener
pub fn trigger_after_commit() {
    for listener in synchronizations_if_active() {
        listener.after_commit();
    }
}

/// Call `after_completion` on every listener
pub fn trigger_after_completion(status: CompletionStatus) {
    let listeners = synchronizations_if_active();
    invoke_after_completion(&listeners, status);
}

/// Call `after_completion` on `listeners`
pub fn invoke_after_completion(listeners: &[SynchronizationRef], status: CompletionStatus) {
    if listeners.is_empty() {
        return;
    }
    trace!(count = listeners.len(), status = ?status, "invoking after-completion");
    for listener in listeners {
        // A panicking listener must not keep the rest from running
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            listener.after_completion(status)
        }));
        if outcome.is_err() {
            error!(status = ?status, "after-completion callback panicked");
        }
    }
}
