//! Minimal session and transaction stand-ins for unit tests

use parking_lot::Mutex;
use sessionbind_core::{
    Entity, EntityId, Error, Metadata, NativeTransaction, Parameters, QueryResult, Result,
    Session, SessionId, TransactionDefinition, TransactionState,
};
use std::sync::Arc;

pub(crate) struct StubTransaction {
    state: Mutex<TransactionState>,
}

impl StubTransaction {
    pub(crate) fn new(state: TransactionState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

impl NativeTransaction for StubTransaction {
    fn state(&self) -> TransactionState {
        *self.state.lock()
    }
    fn is_read_only(&self) -> bool {
        false
    }
    fn commit(&self) -> Result<()> {
        *self.state.lock() = TransactionState::Committed;
        Ok(())
    }
    fn rollback(&self) -> Result<()> {
        *self.state.lock() = TransactionState::RolledBack;
        Ok(())
    }
}

pub(crate) struct StubSession {
    id: SessionId,
    cleared: Mutex<u32>,
}

impl StubSession {
    pub(crate) fn new() -> Self {
        Self {
            id: SessionId::new(),
            cleared: Mutex::new(0),
        }
    }

    pub(crate) fn cleared(&self) -> u32 {
        *self.cleared.lock()
    }
}

impl Session for StubSession {
    fn id(&self) -> Result<SessionId> {
        Ok(self.id)
    }
    fn metadata(&self) -> Result<Arc<Metadata>> {
        Ok(Arc::new(Metadata::default()))
    }
    fn save(&self, _entity: Entity) -> Result<EntityId> {
        Ok(1)
    }
    fn load(&self, _label: &str, _id: EntityId) -> Result<Option<Entity>> {
        Ok(None)
    }
    fn load_all(&self, _label: &str) -> Result<Vec<Entity>> {
        Ok(Vec::new())
    }
    fn delete(&self, _label: &str, _id: EntityId) -> Result<bool> {
        Ok(false)
    }
    fn count(&self, _label: &str) -> Result<u64> {
        Ok(0)
    }
    fn query(&self, _statement: &str, _parameters: &Parameters) -> Result<QueryResult> {
        Ok(QueryResult::default())
    }
    fn clear(&self) -> Result<()> {
        *self.cleared.lock() += 1;
        Ok(())
    }
    fn begin_transaction(
        &self,
        _definition: &TransactionDefinition,
    ) -> Result<Arc<dyn NativeTransaction>> {
        Err(Error::IllegalState("stub sessions do not begin".into()))
    }
    fn transaction(&self) -> Result<Option<Arc<dyn NativeTransaction>>> {
        Ok(None)
    }
}
