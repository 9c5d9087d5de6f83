//! Shared session proxy
//!
//! [`SharedSession`] implements [`Session`] but owns no session. Every call
//! resolves the current session for its factory and delegates to it:
//!
//! - a session bound to the thread (transactional or pre-bound) is used and
//!   left open; only the coordinator closes it
//! - otherwise an ad hoc session is opened for the one call and closed when
//!   the call returns, whether it succeeded or not
//!
//! Transactions cannot be started through the proxy. Equality and hashing
//! use the proxy's own identity.

use crate::session_utils::{self, close_session, ResolvedSession};
use sessionbind_core::{
    Entity, EntityId, Error, Metadata, NativeTransaction, Parameters, QueryResult, Result,
    Session, SessionFactory, SessionId, TransactionDefinition,
};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_PROXY_ID: AtomicU64 = AtomicU64::new(1);

/// Closes an ad hoc session when dropped
struct AdHocGuard<'a> {
    factory: &'a dyn SessionFactory,
    session: Arc<dyn Session>,
}

impl Drop for AdHocGuard<'_> {
    fn drop(&mut self) {
        close_session(self.factory, self.session.as_ref());
    }
}

/// Session proxy that delegates to the current session of a factory
pub struct SharedSession {
    id: u64,
    factory: Arc<dyn SessionFactory>,
    synchronized_with_transaction: bool,
    allow_create: bool,
}

impl SharedSession {
    /// Proxy whose sessions are synchronized with the current transaction
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            id: NEXT_PROXY_ID.fetch_add(1, Ordering::Relaxed),
            factory,
            synchronized_with_transaction: true,
            allow_create: true,
        }
    }

    /// Proxy whose transaction-scoped sessions are only bound, not cleared
    /// on rollback
    pub fn unsynchronized(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            synchronized_with_transaction: false,
            ..Self::new(factory)
        }
    }

    /// Whether calls outside a transaction may open an ad hoc session
    pub fn allow_create(mut self, allow_create: bool) -> Self {
        self.allow_create = allow_create;
        self
    }

    /// The target factory
    pub fn factory(&self) -> &Arc<dyn SessionFactory> {
        &self.factory
    }

    /// The session bound to the current transaction
    ///
    /// Never opens an ad hoc session.
    pub fn target_session(&self) -> Result<Arc<dyn Session>> {
        session_utils::transactional_session(&self.factory, self.synchronized_with_transaction)?
            .ok_or_else(|| Error::IllegalState("No transactional Session available".into()))
    }

    /// Always fails: transactions are demarcated through the coordinator
    pub fn open_transaction(&self) -> Result<()> {
        Err(reject())
    }

    fn with_current<T>(&self, call: impl FnOnce(&dyn Session) -> Result<T>) -> Result<T> {
        match session_utils::get_session(
            &self.factory,
            self.synchronized_with_transaction,
            self.allow_create,
        )? {
            ResolvedSession::Transactional(session) => call(session.as_ref()),
            ResolvedSession::AdHoc(session) => {
                let guard = AdHocGuard {
                    factory: self.factory.as_ref(),
                    session,
                };
                call(guard.session.as_ref())
            }
        }
    }
}

fn reject() -> Error {
    Error::IllegalState(
        "Not allowed to create transaction on shared Session - use the transaction coordinator instead"
            .into(),
    )
}

impl Session for SharedSession {
    fn id(&self) -> Result<SessionId> {
        self.with_current(|s| s.id())
    }

    fn metadata(&self) -> Result<Arc<Metadata>> {
        Ok(self.factory.metadata())
    }

    fn save(&self, entity: Entity) -> Result<EntityId> {
        self.with_current(|s| s.save(entity))
    }

    fn load(&self, label: &str, id: EntityId) -> Result<Option<Entity>> {
        self.with_current(|s| s.load(label, id))
    }

    fn load_all(&self, label: &str) -> Result<Vec<Entity>> {
        self.with_current(|s| s.load_all(label))
    }

    fn delete(&self, label: &str, id: EntityId) -> Result<bool> {
        self.with_current(|s| s.delete(label, id))
    }

    fn count(&self, label: &str) -> Result<u64> {
        self.with_current(|s| s.count(label))
    }

    fn query(&self, statement: &str, parameters: &Parameters) -> Result<QueryResult> {
        self.with_current(|s| s.query(statement, parameters))
    }

    fn clear(&self) -> Result<()> {
        self.with_current(|s| s.clear())
    }

    fn begin_transaction(
        &self,
        _definition: &TransactionDefinition,
    ) -> Result<Arc<dyn NativeTransaction>> {
        Err(reject())
    }

    fn transaction(&self) -> Result<Option<Arc<dyn NativeTransaction>>> {
        self.with_current(|s| s.transaction())
    }
}

impl PartialEq for SharedSession {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SharedSession {}

impl Hash for SharedSession {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for SharedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Shared Session proxy for target factory [{}]",
            self.factory.describe()
        )
    }
}

impl std::fmt::Debug for SharedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSession")
            .field("id", &self.id)
            .field("factory", &self.factory.describe())
            .field("synchronized_with_transaction", &self.synchronized_with_transaction)
            .field("allow_create", &self.allow_create)
            .finish()
    }
}
