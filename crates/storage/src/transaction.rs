//! Native transactions of the in-memory store
//!
//! A [`MemoryTransaction`] buffers mutations until commit, when the whole
//! buffer is applied to the committed state in one batch. Savepoints are
//! positions in that buffer.

use crate::sharded::Mutation;
use crate::store::{FaultPoint, StoreShared};
use parking_lot::Mutex;
use sessionbind_core::{
    Entity, EntityId, Error, NativeTransaction, Result, Savepoint, StoreErrorKind,
    TransactionDefinition, TransactionState,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

struct TransactionInner {
    state: TransactionState,
    pending: Vec<Mutation>,
    savepoints: Vec<(Savepoint, usize)>,
    next_savepoint: u64,
}

/// Buffered transaction against a [`MemoryStore`](crate::MemoryStore)
pub struct MemoryTransaction {
    shared: Arc<StoreShared>,
    read_only: bool,
    timeout: Option<Duration>,
    supports_savepoints: bool,
    inner: Mutex<TransactionInner>,
}

impl MemoryTransaction {
    pub(crate) fn begin(shared: Arc<StoreShared>, definition: &TransactionDefinition) -> Self {
        let supports_savepoints = shared.savepoints_supported();
        Self {
            shared,
            read_only: definition.read_only,
            timeout: definition.timeout,
            supports_savepoints,
            inner: Mutex::new(TransactionInner {
                state: TransactionState::Open,
                pending: Vec::new(),
                savepoints: Vec::new(),
                next_savepoint: 0,
            }),
        }
    }

    /// Timeout the transaction was begun with
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Number of buffered mutations
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub(crate) fn record(&self, mutation: Mutation) -> Result<()> {
        if self.read_only {
            return Err(Error::store(
                StoreErrorKind::Transaction,
                "cannot write in a read-only transaction",
            ));
        }
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Open {
            return Err(Error::store(
                StoreErrorKind::Transaction,
                format!("cannot write in a transaction in state {}", inner.state),
            ));
        }
        inner.pending.push(mutation);
        Ok(())
    }

    /// Buffered view of one entity: `Some(None)` when deleted in this transaction
    pub(crate) fn lookup(&self, label: &str, id: EntityId) -> Option<Option<Entity>> {
        let inner = self.inner.lock();
        inner.pending.iter().rev().find_map(|m| match m {
            Mutation::Put(e) if e.label == label && e.id == Some(id) => Some(Some(e.clone())),
            Mutation::Delete { label: l, id: i } if l == label && *i == id => Some(None),
            _ => None,
        })
    }

    /// Apply buffered mutations of `label` over committed rows
    pub(crate) fn overlay(&self, label: &str, rows: &mut BTreeMap<EntityId, Entity>) {
        let inner = self.inner.lock();
        for mutation in inner.pending.iter().filter(|m| m.label() == label) {
            match mutation {
                Mutation::Put(e) => {
                    if let Some(id) = e.id {
                        rows.insert(id, e.clone());
                    }
                }
                Mutation::Delete { id, .. } => {
                    rows.remove(id);
                }
            }
        }
    }

    pub(crate) fn discard_pending(&self) {
        let mut inner = self.inner.lock();
        inner.pending.clear();
        inner.savepoints.clear();
    }
}

impl NativeTransaction for MemoryTransaction {
    fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn commit(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.state.can_commit() {
            return Err(Error::store(
                StoreErrorKind::Transaction,
                format!("cannot commit a transaction in state {}", inner.state),
            ));
        }
        inner.state = TransactionState::CommitPending;
        if let Err(e) = self.shared.inject(FaultPoint::Commit) {
            inner.state = TransactionState::RollbackPending;
            return Err(e);
        }
        self.shared.data.apply(&inner.pending);
        debug!(mutations = inner.pending.len(), "committed memory transaction");
        inner.pending.clear();
        inner.savepoints.clear();
        inner.state = TransactionState::Committed;
        self.shared.stats.record_commit();
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.state.can_rollback() {
            return Err(Error::store(
                StoreErrorKind::Transaction,
                format!("cannot roll back a transaction in state {}", inner.state),
            ));
        }
        inner.state = TransactionState::RollbackPending;
        let discarded = inner.pending.len();
        inner.pending.clear();
        inner.savepoints.clear();
        inner.state = TransactionState::RolledBack;
        // The buffer is gone either way; an injected fault only changes what is reported
        self.shared.inject(FaultPoint::Rollback)?;
        debug!(discarded, "rolled back memory transaction");
        self.shared.stats.record_rollback();
        Ok(())
    }

    fn supports_savepoints(&self) -> bool {
        self.supports_savepoints
    }

    fn create_savepoint(&self) -> Result<Savepoint> {
        if !self.supports_savepoints {
            return Err(Error::UnsupportedPropagation(
                "store configured without savepoints".into(),
            ));
        }
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Open {
            return Err(Error::store(
                StoreErrorKind::Transaction,
                format!("cannot create a savepoint in state {}", inner.state),
            ));
        }
        inner.next_savepoint += 1;
        let savepoint = Savepoint(inner.next_savepoint);
        let position = inner.pending.len();
        inner.savepoints.push((savepoint, position));
        Ok(savepoint)
    }

    fn rollback_to_savepoint(&self, savepoint: Savepoint) -> Result<()> {
        let mut inner = self.inner.lock();
        let index = inner
            .savepoints
            .iter()
            .position(|(s, _)| *s == savepoint)
            .ok_or_else(|| {
                Error::store(
                    StoreErrorKind::Transaction,
                    format!("unknown savepoint {}", savepoint.0),
                )
            })?;
        let position = inner.savepoints[index].1;
        inner.pending.truncate(position);
        inner.savepoints.truncate(index);
        debug!(savepoint = savepoint.0, "rolled back to savepoint");
        Ok(())
    }

    fn release_savepoint(&self, savepoint: Savepoint) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(index) = inner.savepoints.iter().position(|(s, _)| *s == savepoint) {
            inner.savepoints.truncate(index);
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MemoryTransaction")
            .field("state", &inner.state)
            .field("read_only", &self.read_only)
            .field("pending", &inner.pending.len())
            .field("savepoints", &inner.savepoints.len())
            .finish()
    }
}
