//! Session lookup and release helpers
//!
//! These resolve "the current session" for a factory the way data-access
//! code needs it:
//!
//! 1. a holder bound in the registry wins (transactional or pre-bound);
//! 2. with synchronization active, a session is opened, bound for the rest of
//!    the transaction and released by a [`SessionSynchronization`];
//! 3. otherwise the caller gets nothing, or an ad hoc session it must close.

use sessionbind_concurrency::{
    synchronization, ResourceHolder, ResourceRegistry, TransactionSynchronization,
};
use sessionbind_core::{CompletionStatus, Error, Result, Session, SessionFactory};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Order of listeners managing transaction-synchronized sessions
pub const SESSION_SYNCHRONIZATION_ORDER: i32 = 1000;

/// Order of listeners managing transaction-scoped, unsynchronized sessions
pub const SCOPED_SESSION_SYNCHRONIZATION_ORDER: i32 = 900;

/// Close `session`, logging instead of failing
pub fn close_session(factory: &dyn SessionFactory, session: &dyn Session) {
    match factory.close_session(session) {
        Ok(()) => debug!(session = ?session.id().ok(), "closed session"),
        Err(e) => warn!(error = %e, "could not close session"),
    }
}

/// Listener that ties a bound session to the current transaction
///
/// Transactional listeners (order 1000) clear the session's pending work
/// when the transaction does not commit and release the holder's
/// synchronized flag. Scoped listeners (order 900) only unbind and close.
/// A listener for a session it opened itself unbinds the holder before
/// completion and closes the session afterwards.
pub struct SessionSynchronization {
    holder: Arc<ResourceHolder>,
    factory: Arc<dyn SessionFactory>,
    registry: Arc<ResourceRegistry>,
    new_session: bool,
    transactional: bool,
    holder_active: AtomicBool,
}

impl SessionSynchronization {
    /// Listener for a session synchronized with the transaction
    pub fn transactional(
        holder: Arc<ResourceHolder>,
        factory: Arc<dyn SessionFactory>,
        registry: Arc<ResourceRegistry>,
        new_session: bool,
    ) -> Self {
        Self {
            holder,
            factory,
            registry,
            new_session,
            transactional: true,
            holder_active: AtomicBool::new(true),
        }
    }

    /// Listener for a session that only lives as long as the transaction
    pub fn scoped(
        holder: Arc<ResourceHolder>,
        factory: Arc<dyn SessionFactory>,
        registry: Arc<ResourceRegistry>,
    ) -> Self {
        Self {
            holder,
            factory,
            registry,
            new_session: true,
            transactional: false,
            holder_active: AtomicBool::new(true),
        }
    }
}

impl TransactionSynchronization for SessionSynchronization {
    fn order(&self) -> i32 {
        if self.transactional {
            SESSION_SYNCHRONIZATION_ORDER
        } else {
            SCOPED_SESSION_SYNCHRONIZATION_ORDER
        }
    }

    fn suspend(&self) {
        if self.holder_active.load(Ordering::Acquire) {
            self.registry.unbind_if_possible(self.factory.key());
        }
    }

    fn resume(&self) {
        if self.holder_active.load(Ordering::Acquire) {
            if let Err(e) = self.registry.bind(self.factory.key(), self.holder.clone()) {
                warn!(error = %e, "could not rebind session on resume");
            }
        }
    }

    fn before_completion(&self) {
        if self.new_session {
            self.registry.unbind_if_possible(self.factory.key());
            self.holder_active.store(false, Ordering::Release);
        }
    }

    fn after_completion(&self, status: CompletionStatus) {
        if self.transactional {
            if status != CompletionStatus::Committed {
                // Pending work of a failed transaction must not leak into later use
                if let Err(e) = self.holder.session().clear() {
                    warn!(error = %e, "could not clear session after rollback");
                }
            }
            self.holder.set_synchronized_with_transaction(false);
        }
        if self.new_session {
            close_session(self.factory.as_ref(), self.holder.session().as_ref());
        }
    }
}

/// The session bound to the current transaction for `factory`
///
/// Returns `None` when nothing is bound and synchronization is inactive.
/// With `synchronized_with_transaction`, a pre-bound holder found during
/// active synchronization is enlisted so its session is cleared if the
/// transaction does not commit.
pub fn transactional_session(
    factory: &Arc<dyn SessionFactory>,
    synchronized_with_transaction: bool,
) -> Result<Option<Arc<dyn Session>>> {
    let registry = ResourceRegistry::current();
    let key = factory.key();

    if let Some(holder) = registry.lookup(key) {
        if synchronized_with_transaction
            && !holder.is_synchronized_with_transaction()
            && synchronization::is_synchronization_active()
        {
            debug!(factory = %key, "enlisting pre-bound session in current transaction");
            synchronization::register_synchronization(Arc::new(
                SessionSynchronization::transactional(
                    holder.clone(),
                    factory.clone(),
                    registry.clone(),
                    false,
                ),
            ))?;
            holder.set_synchronized_with_transaction(true);
        }
        return Ok(Some(holder.session().clone()));
    }

    if !synchronization::is_synchronization_active() {
        return Ok(None);
    }

    debug!(factory = %key, "opening session for current transaction");
    let session = factory.open_session()?;
    let holder = Arc::new(ResourceHolder::new(session.clone()));
    let listener = if synchronized_with_transaction {
        holder.set_synchronized_with_transaction(true);
        SessionSynchronization::transactional(holder.clone(), factory.clone(), registry.clone(), true)
    } else {
        SessionSynchronization::scoped(holder.clone(), factory.clone(), registry.clone())
    };
    let bound = synchronization::register_synchronization(Arc::new(listener))
        .and_then(|()| registry.bind(key, holder));
    if let Err(e) = bound {
        close_session(factory.as_ref(), session.as_ref());
        return Err(e);
    }
    Ok(Some(session))
}

/// A session resolved for one call
pub enum ResolvedSession {
    /// Owned by the current transaction; never closed by the caller
    Transactional(Arc<dyn Session>),
    /// Opened for this call only; the caller closes it
    AdHoc(Arc<dyn Session>),
}

impl ResolvedSession {
    /// The resolved session
    pub fn session(&self) -> &Arc<dyn Session> {
        match self {
            ResolvedSession::Transactional(s) | ResolvedSession::AdHoc(s) => s,
        }
    }

    /// Whether the caller must close the session
    pub fn is_ad_hoc(&self) -> bool {
        matches!(self, ResolvedSession::AdHoc(_))
    }
}

/// The current session, or a fresh one when `allow_create` permits
pub fn get_session(
    factory: &Arc<dyn SessionFactory>,
    synchronized_with_transaction: bool,
    allow_create: bool,
) -> Result<ResolvedSession> {
    if let Some(session) = transactional_session(factory, synchronized_with_transaction)? {
        return Ok(ResolvedSession::Transactional(session));
    }
    if !allow_create {
        return Err(Error::IllegalState(
            "No session bound to thread, and configuration does not allow creation of non-transactional one here"
                .into(),
        ));
    }
    debug!(factory = %factory.key(), "opening non-transactional session");
    Ok(ResolvedSession::AdHoc(factory.open_session()?))
}
