//! Error types for session binding and transaction coordination.
//!
//! Two layers:
//! - [`StoreError`]: a failure reported by the backing store, tagged with
//!   its native [`StoreErrorKind`].
//! - [`Error`]: the canonical error for every operation in this workspace.
//!   Native failures either pass through unchanged as [`Error::Store`] or are
//!   categorized into [`Error::DataAccess`] by the exception translator.

use thiserror::Error;

/// Native failure kinds a backing store can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    /// More than one type mapping matched
    AmbiguousBaseType,
    /// No type mapping for the requested label
    BaseTypeNotFound,
    /// Load/save depth out of range
    InvalidDepth,
    /// Object-graph mapping failed
    Mapping,
    /// Query-language error
    Query,
    /// Malformed operator in a query
    MissingOperator,
    /// Entity not found
    NotFound,
    /// Statement type not understood by the store
    UnknownStatementType,
    /// Backing store unreachable
    Connection,
    /// Native transaction manager failure
    TransactionManager,
    /// Entity could not be accessed
    EntityAccess,
    /// Native transaction failure (begin/commit/rollback)
    Transaction,
    /// Required store service missing
    ServiceNotFound,
    /// Result could not be processed
    ResultProcessing,
    /// Store returned result errors
    ResultErrors,
    /// Raised by application code, not by the store
    Application,
}

impl StoreErrorKind {
    /// Get kind as string
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreErrorKind::AmbiguousBaseType => "AmbiguousBaseType",
            StoreErrorKind::BaseTypeNotFound => "BaseTypeNotFound",
            StoreErrorKind::InvalidDepth => "InvalidDepth",
            StoreErrorKind::Mapping => "Mapping",
            StoreErrorKind::Query => "Query",
            StoreErrorKind::MissingOperator => "MissingOperator",
            StoreErrorKind::NotFound => "NotFound",
            StoreErrorKind::UnknownStatementType => "UnknownStatementType",
            StoreErrorKind::Connection => "Connection",
            StoreErrorKind::TransactionManager => "TransactionManager",
            StoreErrorKind::EntityAccess => "EntityAccess",
            StoreErrorKind::Transaction => "Transaction",
            StoreErrorKind::ServiceNotFound => "ServiceNotFound",
            StoreErrorKind::ResultProcessing => "ResultProcessing",
            StoreErrorKind::ResultErrors => "ResultErrors",
            StoreErrorKind::Application => "Application",
        }
    }
}

impl std::fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure reported by the backing store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct StoreError {
    /// Native kind
    pub kind: StoreErrorKind,
    /// Human-readable message
    pub message: String,
}

impl StoreError {
    /// Create a store error
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Categorized kind of a translated store failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataAccessKind {
    /// The API was used incorrectly (mapping, depth, statement type)
    InvalidUsage,
    /// The store rejected the request (query language, operators)
    InvalidResourceUsage,
    /// Requested data could not be retrieved
    RetrievalFailure,
    /// The store could not be reached
    ResourceFailure,
    /// Failure inside the store's own machinery
    SystemError,
}

impl DataAccessKind {
    /// Get kind as string
    pub fn as_str(&self) -> &'static str {
        match self {
            DataAccessKind::InvalidUsage => "invalid usage",
            DataAccessKind::InvalidResourceUsage => "invalid resource usage",
            DataAccessKind::RetrievalFailure => "retrieval failure",
            DataAccessKind::ResourceFailure => "resource failure",
            DataAccessKind::SystemError => "system error",
        }
    }
}

impl std::fmt::Display for DataAccessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A store failure after categorization
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {}", .kind, .source.message)]
pub struct DataAccessError {
    /// Categorized kind
    pub kind: DataAccessKind,
    /// Original store failure
    #[source]
    pub source: StoreError,
}

impl DataAccessError {
    /// Create a categorized error
    pub fn new(kind: DataAccessKind, source: StoreError) -> Self {
        Self { kind, source }
    }
}

/// All errors raised by session binding and transaction coordination.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Misuse: nothing bound, duplicate binding, transaction on shared session
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Misuse of a transaction status (e.g. completing it twice)
    #[error("illegal transaction state: {0}")]
    IllegalTransactionState(String),

    /// Requested propagation cannot be honored
    #[error("unsupported propagation: {0}")]
    UnsupportedPropagation(String),

    /// Beginning a transaction failed
    #[error("cannot create transaction: {message}")]
    CannotCreateTransaction {
        /// What was being attempted
        message: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Commit requested but the transaction was marked rollback-only
    #[error("unexpected rollback: {0}")]
    UnexpectedRollback(String),

    /// Native commit or rollback itself failed
    #[error("transaction system error: {message}")]
    TransactionSystem {
        /// What was being attempted
        message: String,
        /// Underlying native failure
        #[source]
        source: StoreError,
    },

    /// Categorized store failure
    #[error(transparent)]
    DataAccess(#[from] DataAccessError),

    /// Untranslated store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type for all operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for a native store failure
    pub fn store(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Error::Store(StoreError::new(kind, message))
    }

    /// Misuse of a registry, proxy or status
    pub fn is_illegal_state(&self) -> bool {
        matches!(
            self,
            Error::IllegalState(_) | Error::IllegalTransactionState(_)
        )
    }

    /// Check if this is an unexpected-rollback error.
    pub fn is_unexpected_rollback(&self) -> bool {
        matches!(self, Error::UnexpectedRollback(_))
    }

    /// Check if beginning a transaction failed.
    pub fn is_cannot_create_transaction(&self) -> bool {
        matches!(self, Error::CannotCreateTransaction { .. })
    }

    /// Categorized kind, if this error was translated
    pub fn data_access_kind(&self) -> Option<DataAccessKind> {
        match self {
            Error::DataAccess(e) => Some(e.kind),
            _ => None,
        }
    }

    /// The native store failure carried by this error, if any
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Error::Store(e) => Some(e),
            Error::DataAccess(e) => Some(&e.source),
            Error::TransactionSystem { source, .. } => Some(source),
            Error::CannotCreateTransaction { source, .. } => source.store_error(),
            _ => None,
        }
    }
}
