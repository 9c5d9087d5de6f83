//! Persistence facade

use sessionbind_core::{Result, SessionFactory, TransactionDefinition};
use sessionbind_engine::{
    CoordinatorConfig, SessionTemplate, SharedSession, TransactionCoordinator, TransactionStatus,
};
use sessionbind_storage::MemoryStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Session factory, coordinator and shared session, wired together.
///
/// This is the main entry point. Create one with [`Persistence::in_memory`]
/// or [`Persistence::builder`].
///
/// # Example
///
/// ```ignore
/// use sessionbind::prelude::*;
///
/// let persistence = Persistence::in_memory(["Person"])?;
///
/// persistence.in_transaction(&TransactionDefinition::new(), |_| {
///     persistence.template().save(Entity::new("Person").with("name", "Ada"))
/// })?;
///
/// // Outside a transaction every call gets its own short-lived session
/// assert_eq!(persistence.template().count("Person")?, 1);
/// ```
pub struct Persistence {
    factory: Arc<dyn SessionFactory>,
    coordinator: TransactionCoordinator,
    session: Arc<SharedSession>,
    template: SessionTemplate,
}

impl Persistence {
    /// Persistence over a fresh in-memory store accepting `labels`.
    ///
    /// Uses the default coordinator configuration.
    pub fn in_memory<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::builder().labels(labels).open()
    }

    /// Create a builder.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let persistence = Persistence::builder()
    ///     .factory(Arc::new(store))
    ///     .config_file("sessionbind.toml")
    ///     .open()?;
    /// ```
    pub fn builder() -> PersistenceBuilder {
        PersistenceBuilder::new()
    }

    /// The session factory.
    pub fn factory(&self) -> &Arc<dyn SessionFactory> {
        &self.factory
    }

    /// The transaction coordinator.
    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    /// The shared session proxy.
    ///
    /// Hand this to data-access code; it always talks to the session of the
    /// current transaction, or to a short-lived one outside transactions.
    pub fn session(&self) -> &Arc<SharedSession> {
        &self.session
    }

    /// Translating template over the shared session.
    pub fn template(&self) -> &SessionTemplate {
        &self.template
    }

    /// Run `work` in a transaction described by `definition`.
    ///
    /// Commits on `Ok`, rolls back on `Err`.
    pub fn in_transaction<T, F>(&self, definition: &TransactionDefinition, work: F) -> Result<T>
    where
        F: FnOnce(&mut TransactionStatus) -> Result<T>,
    {
        self.coordinator.execute(definition, work)
    }

    /// Get transaction metrics.
    pub fn metrics(&self) -> PersistenceMetrics {
        let txn_metrics = self.coordinator.metrics();
        PersistenceMetrics {
            transactions_committed: txn_metrics.total_committed,
            transactions_rolled_back: txn_metrics.total_rolled_back,
            transactions_active: txn_metrics.active_count,
            transactions_participating: txn_metrics.total_participating,
            commit_rate: txn_metrics.commit_rate,
            operations: txn_metrics.total_committed + txn_metrics.total_rolled_back,
        }
    }
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("factory", &self.factory.describe())
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

/// Transaction metrics.
#[derive(Debug, Clone)]
pub struct PersistenceMetrics {
    /// Total committed transactions
    pub transactions_committed: u64,
    /// Total rolled-back transactions
    pub transactions_rolled_back: u64,
    /// Currently active transactions
    pub transactions_active: u64,
    /// Requests that joined an existing transaction
    pub transactions_participating: u64,
    /// Commit success rate (0.0 - 1.0)
    pub commit_rate: f64,
    /// Total completions (commits + rollbacks)
    pub operations: u64,
}

/// Builder for [`Persistence`].
///
/// # Example
///
/// ```ignore
/// // Own backing store, configuration from a file
/// let persistence = Persistence::builder()
///     .factory(factory)
///     .config_file("sessionbind.toml")
///     .open()?;
///
/// // In-memory store, inline configuration
/// let persistence = Persistence::builder()
///     .labels(["Person", "Movie"])
///     .config(CoordinatorConfig { nested_transactions_allowed: false, ..Default::default() })
///     .open()?;
/// ```
pub struct PersistenceBuilder {
    factory: Option<Arc<dyn SessionFactory>>,
    labels: Vec<String>,
    config: CoordinatorConfig,
    config_file: Option<PathBuf>,
    synchronized_with_transaction: bool,
    allow_create: bool,
}

impl PersistenceBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            factory: None,
            labels: Vec::new(),
            config: CoordinatorConfig::default(),
            config_file: None,
            synchronized_with_transaction: true,
            allow_create: true,
        }
    }

    /// Use `factory` as the backing store.
    ///
    /// Without a factory, an in-memory store is created at open.
    pub fn factory(mut self, factory: Arc<dyn SessionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Labels accepted by the in-memory store created when no factory is set.
    pub fn labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Coordinator configuration.
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Load the coordinator configuration from a TOML file at open.
    ///
    /// Takes precedence over [`config`](Self::config).
    pub fn config_file(mut self, path: impl AsRef<Path>) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Transaction-scoped sessions opened by the proxy are bound but never
    /// cleared on rollback.
    pub fn unsynchronized(mut self) -> Self {
        self.synchronized_with_transaction = false;
        self
    }

    /// Whether the proxy may open short-lived sessions outside transactions.
    pub fn allow_create(mut self, allow_create: bool) -> Self {
        self.allow_create = allow_create;
        self
    }

    /// Assemble the facade.
    pub fn open(self) -> Result<Persistence> {
        let config = match &self.config_file {
            Some(path) => CoordinatorConfig::from_file(path)?,
            None => self.config,
        };
        let factory: Arc<dyn SessionFactory> = match self.factory {
            Some(factory) => factory,
            None => Arc::new(MemoryStore::with_labels("memory", self.labels)),
        };

        let session = if self.synchronized_with_transaction {
            SharedSession::new(factory.clone())
        } else {
            SharedSession::unsynchronized(factory.clone())
        };
        let session = Arc::new(session.allow_create(self.allow_create));
        let template = SessionTemplate::new(session.clone());
        debug!(factory = %factory.describe(), ?config, "opened persistence");

        Ok(Persistence {
            coordinator: TransactionCoordinator::with_config(factory.clone(), config),
            factory,
            session,
            template,
        })
    }
}

impl Default for PersistenceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
