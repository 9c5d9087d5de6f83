//! In-memory session factory
//!
//! [`MemoryStore`] is a complete, process-local backing store: it opens
//! [`MemorySession`]s, keeps committed entities in a [`ShardedStore`] and
//! counts every lifecycle event so callers can check how often sessions
//! were opened and transactions completed.
//!
//! Failures can be injected per [`FaultPoint`]; the next operation reaching
//! that point fails once with the requested [`StoreErrorKind`].

use crate::session::MemorySession;
use crate::sharded::ShardedStore;
use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use sessionbind_core::{
    Entity, EntityId, Error, FactoryKey, Metadata, Result, Session, SessionFactory, SessionId,
    StoreErrorKind, TransactionDefinition,
};
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

thread_local! {
    /// Factory-managed current sessions of this thread
    static CURRENT_SESSIONS: RefCell<FxHashMap<FactoryKey, Arc<MemorySession>>> =
        RefCell::new(FxHashMap::default());
}

/// Where an injected failure fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// Opening a session
    Open,
    /// Closing a session
    Close,
    /// Beginning a native transaction
    Begin,
    /// Committing a native transaction
    Commit,
    /// Rolling back a native transaction
    Rollback,
    /// Any data operation on a session
    Operation,
}

impl std::fmt::Display for FaultPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FaultPoint::Open => "open",
            FaultPoint::Close => "close",
            FaultPoint::Begin => "begin",
            FaultPoint::Commit => "commit",
            FaultPoint::Rollback => "rollback",
            FaultPoint::Operation => "operation",
        };
        f.write_str(name)
    }
}

/// Lifecycle counters
#[derive(Debug, Default)]
pub struct StoreStats {
    opened: AtomicU64,
    closed: AtomicU64,
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    cleared: AtomicU64,
}

/// Point-in-time copy of [`StoreStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    /// Sessions opened
    pub opened: u64,
    /// Sessions closed
    pub closed: u64,
    /// Native transactions begun
    pub begun: u64,
    /// Native transactions committed
    pub committed: u64,
    /// Native transactions rolled back
    pub rolled_back: u64,
    /// Session clears
    pub cleared: u64,
}

impl StoreStats {
    pub(crate) fn record_open(&self) {
        self.opened.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn record_close(&self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn record_begin(&self) {
        self.begun.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn record_commit(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn record_rollback(&self) {
        self.rolled_back.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn record_clear(&self) {
        self.cleared.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot all counters
    pub fn snapshot(&self) -> StoreCounts {
        StoreCounts {
            opened: self.opened.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            begun: self.begun.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            cleared: self.cleared.load(Ordering::Relaxed),
        }
    }
}

/// State shared by a store, its sessions and their transactions
pub(crate) struct StoreShared {
    key: FactoryKey,
    pub(crate) metadata: Arc<Metadata>,
    pub(crate) data: ShardedStore,
    pub(crate) stats: StoreStats,
    faults: Mutex<FxHashMap<FaultPoint, StoreErrorKind>>,
    available: AtomicBool,
    savepoints: AtomicBool,
    open_sessions: DashMap<SessionId, Weak<MemorySession>>,
    last_definition: Mutex<Option<TransactionDefinition>>,
}

impl StoreShared {
    /// Fire the fault armed for `point`, if any
    pub(crate) fn inject(&self, point: FaultPoint) -> Result<()> {
        match self.faults.lock().remove(&point) {
            Some(kind) => Err(Error::store(kind, format!("injected {point} failure"))),
            None => Ok(()),
        }
    }

    pub(crate) fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::store(
                StoreErrorKind::Connection,
                format!("store '{}' is unavailable", self.metadata.store_name),
            ))
        }
    }

    pub(crate) fn savepoints_supported(&self) -> bool {
        self.savepoints.load(Ordering::Acquire)
    }

    pub(crate) fn record_definition(&self, definition: &TransactionDefinition) {
        *self.last_definition.lock() = Some(definition.clone());
    }
}

/// In-process [`SessionFactory`]
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<StoreShared>,
}

impl MemoryStore {
    /// Create a store accepting the labels in `metadata`
    pub fn new(metadata: Metadata) -> Self {
        Self {
            shared: Arc::new(StoreShared {
                key: FactoryKey::allocate(),
                metadata: Arc::new(metadata),
                data: ShardedStore::new(),
                stats: StoreStats::default(),
                faults: Mutex::new(FxHashMap::default()),
                available: AtomicBool::new(true),
                savepoints: AtomicBool::new(true),
                open_sessions: DashMap::new(),
                last_definition: Mutex::new(None),
            }),
        }
    }

    /// Create a store named `name` accepting `labels`
    pub fn with_labels<I, S>(name: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Metadata::new(name, labels))
    }

    /// Lifecycle counters
    pub fn stats(&self) -> &StoreStats {
        &self.shared.stats
    }

    /// Snapshot of the lifecycle counters
    pub fn counts(&self) -> StoreCounts {
        self.shared.stats.snapshot()
    }

    /// Make the next operation reaching `point` fail with `kind`
    pub fn fail_next(&self, point: FaultPoint, kind: StoreErrorKind) {
        self.shared.faults.lock().insert(point, kind);
    }

    /// Simulate losing (or regaining) the connection
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::Release);
    }

    /// Whether new transactions offer savepoints
    pub fn set_savepoints_supported(&self, supported: bool) {
        self.shared.savepoints.store(supported, Ordering::Release);
    }

    /// Sessions opened and not yet closed
    pub fn open_session_count(&self) -> usize {
        self.shared.open_sessions.len()
    }

    /// Definition passed to the most recent native begin
    pub fn last_definition(&self) -> Option<TransactionDefinition> {
        self.shared.last_definition.lock().clone()
    }

    /// Committed entity, bypassing any session
    pub fn committed(&self, label: &str, id: EntityId) -> Option<Entity> {
        self.shared.data.get(label, id)
    }

    /// Number of committed entities of `label`, bypassing any session
    pub fn committed_count(&self, label: &str) -> usize {
        self.shared.data.count(label)
    }

    fn open_memory_session(&self) -> Result<Arc<MemorySession>> {
        self.shared.check_available()?;
        self.shared.inject(FaultPoint::Open)?;
        let session = MemorySession::open(self.shared.clone());
        self.shared
            .open_sessions
            .insert(session.session_id(), Arc::downgrade(&session));
        self.shared.stats.record_open();
        debug!(session = %session.session_id(), store = %self.shared.metadata.store_name, "opened session");
        Ok(session)
    }
}

impl SessionFactory for MemoryStore {
    fn key(&self) -> FactoryKey {
        self.shared.key
    }

    fn metadata(&self) -> Arc<Metadata> {
        self.shared.metadata.clone()
    }

    fn open_session(&self) -> Result<Arc<dyn Session>> {
        let session: Arc<dyn Session> = self.open_memory_session()?;
        Ok(session)
    }

    fn current_session(&self) -> Result<Arc<dyn Session>> {
        let key = self.shared.key;
        let existing = CURRENT_SESSIONS.with(|current| current.borrow().get(&key).cloned());
        let session = match existing {
            Some(session) if !session.is_closed() => session,
            _ => {
                let session = self.open_memory_session()?;
                CURRENT_SESSIONS
                    .with(|current| current.borrow_mut().insert(key, session.clone()));
                session
            }
        };
        let session: Arc<dyn Session> = session;
        Ok(session)
    }

    fn close_session(&self, session: &dyn Session) -> Result<()> {
        let id = session.id()?;
        self.shared.inject(FaultPoint::Close)?;
        let key = self.shared.key;
        CURRENT_SESSIONS.with(|current| {
            let mut current = current.borrow_mut();
            if current.get(&key).map(|s| s.session_id()) == Some(id) {
                current.remove(&key);
            }
        });
        match self.shared.open_sessions.remove(&id) {
            Some((_, weak)) => {
                if let Some(session) = weak.upgrade() {
                    session.abandon();
                }
                self.shared.stats.record_close();
                debug!(session = %id, "closed session");
            }
            None => warn!(session = %id, "session already closed"),
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("key", &self.shared.key)
            .field("store_name", &self.shared.metadata.store_name)
            .field("open_sessions", &self.open_session_count())
            .field("data", &self.shared.data)
            .finish()
    }
}
