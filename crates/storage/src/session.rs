//! Sessions of the in-memory store
//!
//! Outside a transaction every write is applied immediately. Inside one,
//! writes are buffered in the [`MemoryTransaction`] and reads see them
//! (read-your-writes) until commit or rollback.

use crate::query::{self, Statement, Verb};
use crate::sharded::Mutation;
use crate::store::{FaultPoint, StoreShared};
use crate::transaction::MemoryTransaction;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use sessionbind_core::{
    Entity, EntityId, Error, Metadata, NativeTransaction, Parameters, QueryResult, Result,
    Session, SessionId, StoreErrorKind, TransactionDefinition,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Default)]
struct SessionState {
    transaction: Option<Arc<MemoryTransaction>>,
    /// Entities this session has loaded or saved
    tracked: FxHashSet<(String, EntityId)>,
}

/// Session against a [`MemoryStore`](crate::MemoryStore)
pub struct MemorySession {
    id: SessionId,
    shared: Arc<StoreShared>,
    closed: AtomicBool,
    state: Mutex<SessionState>,
}

impl MemorySession {
    pub(crate) fn open(shared: Arc<StoreShared>) -> Arc<Self> {
        Arc::new(Self {
            id: SessionId::new(),
            shared,
            closed: AtomicBool::new(false),
            state: Mutex::new(SessionState::default()),
        })
    }

    /// Session id
    pub fn session_id(&self) -> SessionId {
        self.id
    }

    /// Whether the store closed this session
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of entities the session tracks
    pub fn tracked(&self) -> usize {
        self.state.lock().tracked.len()
    }

    /// Mark closed, rolling back a transaction left open
    pub(crate) fn abandon(&self) {
        self.closed.store(true, Ordering::Release);
        let open = self.active_transaction();
        if let Some(tx) = open {
            warn!(session = %self.id, "closing session with an open transaction, rolling back");
            if let Err(e) = tx.rollback() {
                warn!(session = %self.id, error = %e, "rollback on close failed");
            }
        }
        self.state.lock().tracked.clear();
    }

    fn active_transaction(&self) -> Option<Arc<MemoryTransaction>> {
        self.state
            .lock()
            .transaction
            .clone()
            .filter(|tx| tx.state().is_active())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::IllegalState(format!("session {} is closed", self.id)));
        }
        Ok(())
    }

    /// Common preamble of every data operation
    fn operation(&self, label: &str) -> Result<()> {
        self.ensure_open()?;
        self.shared.check_available()?;
        self.shared.inject(FaultPoint::Operation)?;
        if !self.shared.metadata.is_mapped(label) {
            return Err(Error::store(
                StoreErrorKind::BaseTypeNotFound,
                format!("no mapping for label '{label}'"),
            ));
        }
        Ok(())
    }

    fn write(&self, mutation: Mutation) -> Result<()> {
        match self.active_transaction() {
            Some(tx) => tx.record(mutation),
            None => {
                self.shared.data.apply(std::slice::from_ref(&mutation));
                Ok(())
            }
        }
    }

    fn track(&self, label: &str, id: EntityId) {
        self.state.lock().tracked.insert((label.to_string(), id));
    }

    fn rows(&self, label: &str) -> Vec<Entity> {
        let mut rows: BTreeMap<EntityId, Entity> = self
            .shared
            .data
            .scan(label)
            .into_iter()
            .filter_map(|e| e.id.map(|id| (id, e)))
            .collect();
        if let Some(tx) = self.active_transaction() {
            tx.overlay(label, &mut rows);
        }
        rows.into_values().collect()
    }

    fn find(&self, label: &str, id: EntityId) -> Option<Entity> {
        match self.active_transaction().and_then(|tx| tx.lookup(label, id)) {
            Some(buffered) => buffered,
            None => self.shared.data.get(label, id),
        }
    }
}

impl Session for MemorySession {
    fn id(&self) -> Result<SessionId> {
        Ok(self.id)
    }

    fn metadata(&self) -> Result<Arc<Metadata>> {
        Ok(self.shared.metadata.clone())
    }

    fn save(&self, mut entity: Entity) -> Result<EntityId> {
        self.operation(&entity.label)?;
        let id = match entity.id {
            Some(id) => id,
            None => {
                let id = self.shared.data.next_id();
                entity.id = Some(id);
                id
            }
        };
        let label = entity.label.clone();
        self.write(Mutation::Put(entity))?;
        self.track(&label, id);
        Ok(id)
    }

    fn load(&self, label: &str, id: EntityId) -> Result<Option<Entity>> {
        self.operation(label)?;
        let found = self.find(label, id);
        if found.is_some() {
            self.track(label, id);
        }
        Ok(found)
    }

    fn load_all(&self, label: &str) -> Result<Vec<Entity>> {
        self.operation(label)?;
        Ok(self.rows(label))
    }

    fn delete(&self, label: &str, id: EntityId) -> Result<bool> {
        self.operation(label)?;
        if self.find(label, id).is_none() {
            return Ok(false);
        }
        self.write(Mutation::Delete {
            label: label.to_string(),
            id,
        })?;
        self.state.lock().tracked.remove(&(label.to_string(), id));
        Ok(true)
    }

    fn count(&self, label: &str) -> Result<u64> {
        self.operation(label)?;
        Ok(self.rows(label).len() as u64)
    }

    fn query(&self, statement: &str, parameters: &Parameters) -> Result<QueryResult> {
        self.ensure_open()?;
        let parsed = Statement::parse(statement)?;
        self.operation(parsed.label)?;
        let matching: Vec<Entity> = self
            .rows(parsed.label)
            .into_iter()
            .filter(|e| query::matches(e, parameters))
            .collect();
        match parsed.verb {
            Verb::Match => Ok(QueryResult {
                affected: 0,
                entities: matching,
            }),
            Verb::Count => Ok(QueryResult {
                affected: matching.len() as u64,
                entities: Vec::new(),
            }),
            Verb::Delete => {
                let affected = matching.len() as u64;
                for entity in matching {
                    if let Some(id) = entity.id {
                        self.write(Mutation::Delete {
                            label: entity.label,
                            id,
                        })?;
                    }
                }
                Ok(QueryResult {
                    affected,
                    entities: Vec::new(),
                })
            }
        }
    }

    fn clear(&self) -> Result<()> {
        self.ensure_open()?;
        if let Some(tx) = self.active_transaction() {
            tx.discard_pending();
        }
        self.state.lock().tracked.clear();
        self.shared.stats.record_clear();
        debug!(session = %self.id, "cleared session");
        Ok(())
    }

    fn begin_transaction(
        &self,
        definition: &TransactionDefinition,
    ) -> Result<Arc<dyn NativeTransaction>> {
        self.ensure_open()?;
        self.shared.check_available()?;
        if self.active_transaction().is_some() {
            return Err(Error::store(
                StoreErrorKind::Transaction,
                format!("session {} already has an open transaction", self.id),
            ));
        }
        self.shared.inject(FaultPoint::Begin)?;
        let tx = Arc::new(MemoryTransaction::begin(self.shared.clone(), definition));
        self.state.lock().transaction = Some(tx.clone());
        self.shared.record_definition(definition);
        self.shared.stats.record_begin();
        debug!(
            session = %self.id,
            read_only = definition.read_only,
            timeout = ?definition.timeout,
            "began memory transaction"
        );
        let tx: Arc<dyn NativeTransaction> = tx;
        Ok(tx)
    }

    fn transaction(&self) -> Result<Option<Arc<dyn NativeTransaction>>> {
        Ok(self
            .active_transaction()
            .map(|tx| tx as Arc<dyn NativeTransaction>))
    }
}

impl std::fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySession")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("transaction", &self.active_transaction())
            .finish()
    }
}
