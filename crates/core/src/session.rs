//! Session, factory and native transaction contracts
//!
//! A [`Session`] is one unit of work against a backing store. It is used by
//! exactly one call chain at a time; the `Send + Sync` bounds only allow a
//! holder to sit in a registry that several threads can read.
//!
//! A [`SessionFactory`] lives for the whole application, opens sessions and
//! carries immutable [`Metadata`].
//!
//! A [`NativeTransaction`] is the store's own transaction handle, begun on a
//! session and driven by the coordinator.

use crate::error::{Error, Result};
use crate::types::{FactoryKey, Savepoint, SessionId, TransactionDefinition, TransactionState};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Identifier of a persisted entity
pub type EntityId = u64;

/// Named query parameters
pub type Parameters = BTreeMap<String, serde_json::Value>;

/// A persisted (or to-be-persisted) entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Assigned on first save
    pub id: Option<EntityId>,
    /// Type label, must be known to the factory's metadata
    pub label: String,
    /// Property values
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl Entity {
    /// New, unsaved entity
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: None,
            label: label.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Add a property
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Get a property
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }
}

/// Rows returned by a query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Matching entities
    pub entities: Vec<Entity>,
    /// Number of entities affected by a mutating statement
    pub affected: u64,
}

/// Static description of what a factory can persist
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Human-readable store name
    pub store_name: String,
    /// Labels that sessions may save and load
    pub labels: BTreeSet<String>,
}

impl Metadata {
    /// Metadata for `store_name` accepting `labels`
    pub fn new<I, S>(store_name: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            store_name: store_name.into(),
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `label` is mapped
    pub fn is_mapped(&self, label: &str) -> bool {
        self.labels.contains(label)
    }
}

/// The store's own transaction handle
pub trait NativeTransaction: Send + Sync {
    /// Current lifecycle state
    fn state(&self) -> TransactionState;

    /// Whether the handle was begun read-only
    fn is_read_only(&self) -> bool;

    /// Make the transaction's work durable
    fn commit(&self) -> Result<()>;

    /// Discard the transaction's work
    fn rollback(&self) -> Result<()>;

    /// Whether savepoints are available
    fn supports_savepoints(&self) -> bool {
        false
    }

    /// Mark the current position so it can be rolled back to
    fn create_savepoint(&self) -> Result<Savepoint> {
        Err(Error::UnsupportedPropagation(
            "backing store does not support savepoints".into(),
        ))
    }

    /// Discard work done after `savepoint`
    fn rollback_to_savepoint(&self, _savepoint: Savepoint) -> Result<()> {
        Err(Error::UnsupportedPropagation(
            "backing store does not support savepoints".into(),
        ))
    }

    /// Forget `savepoint`, keeping the work done after it
    fn release_savepoint(&self, _savepoint: Savepoint) -> Result<()> {
        Ok(())
    }
}

/// One unit of work against a backing store
pub trait Session: Send + Sync {
    /// Identity of the underlying session
    fn id(&self) -> Result<SessionId>;

    /// Metadata of the factory that created this session
    fn metadata(&self) -> Result<Arc<Metadata>>;

    /// Insert or update `entity`, returning its id
    fn save(&self, entity: Entity) -> Result<EntityId>;

    /// Load one entity
    fn load(&self, label: &str, id: EntityId) -> Result<Option<Entity>>;

    /// Load every entity with `label`
    fn load_all(&self, label: &str) -> Result<Vec<Entity>>;

    /// Delete one entity, returning whether it existed
    fn delete(&self, label: &str, id: EntityId) -> Result<bool>;

    /// Count entities with `label`
    fn count(&self, label: &str) -> Result<u64>;

    /// Run a statement in the store's own query language
    fn query(&self, statement: &str, parameters: &Parameters) -> Result<QueryResult>;

    /// Drop pending mutations and cached state
    fn clear(&self) -> Result<()>;

    /// Begin a native transaction on this session
    fn begin_transaction(
        &self,
        definition: &TransactionDefinition,
    ) -> Result<Arc<dyn NativeTransaction>>;

    /// The session's current native transaction, if one is active
    fn transaction(&self) -> Result<Option<Arc<dyn NativeTransaction>>>;
}

/// Long-lived creator of sessions
pub trait SessionFactory: Send + Sync {
    /// Registry key of this factory
    fn key(&self) -> FactoryKey;

    /// Immutable metadata
    fn metadata(&self) -> Arc<Metadata>;

    /// Open a fresh session
    fn open_session(&self) -> Result<Arc<dyn Session>>;

    /// The factory's own notion of the current session
    ///
    /// Only consulted when the coordinator is configured to trust
    /// factory-managed sessions.
    fn current_session(&self) -> Result<Arc<dyn Session>>;

    /// Release a session
    fn close_session(&self, session: &dyn Session) -> Result<()>;

    /// Short description used in log lines and proxy descriptions
    fn describe(&self) -> String {
        format!("{} ({})", self.metadata().store_name, self.key())
    }
}
