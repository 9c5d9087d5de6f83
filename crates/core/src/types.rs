//! Core types for session binding and transaction demarcation
//!
//! This module defines the fundamental types used throughout the system:
//! - [`SessionId`]: Unique identifier for one session (unit of work)
//! - [`FactoryKey`]: Identity of a session factory, used as the registry key
//! - [`Propagation`] and [`TransactionDefinition`]: what a caller asks for
//! - [`TransactionState`]: lifecycle of a native transaction handle
//! - [`CompletionStatus`]: outcome reported to synchronization listeners

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a session
///
/// Every session opened by a factory gets its own id. The id is what log
/// lines and tests use to tell two sessions apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random SessionId using UUID v4
    ///
    /// # Examples
    ///
    /// ```
    /// use sessionbind_core::SessionId;
    ///
    /// let id1 = SessionId::new();
    /// let id2 = SessionId::new();
    /// assert_ne!(id1, id2);
    /// ```
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }

    /// Get raw bytes representation
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_FACTORY_KEY: AtomicU64 = AtomicU64::new(1);

/// Identity of a session factory
///
/// Factories live for the whole application. Each one allocates a key once,
/// at construction, and the registry stores holders under that key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FactoryKey(u64);

impl FactoryKey {
    /// Allocate a fresh, process-unique key
    pub fn allocate() -> Self {
        FactoryKey(NEXT_FACTORY_KEY.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for FactoryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "factory#{}", self.0)
    }
}

/// Propagation behavior of a transaction request
///
/// | Mode | Existing transaction | No transaction |
/// |------|----------------------|----------------|
/// | Required | participate | begin new |
/// | Supports | participate | run non-transactionally |
/// | Mandatory | participate | fail |
/// | RequiresNew | suspend, begin new | begin new |
/// | NotSupported | suspend, run without | run without |
/// | Never | fail | run without |
/// | Nested | savepoint (or participate) | begin new |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Propagation {
    /// Join the current transaction, or begin one
    #[default]
    Required,
    /// Join the current transaction, or run without one
    Supports,
    /// Join the current transaction, fail if there is none
    Mandatory,
    /// Always begin a fresh transaction, suspending the current one
    RequiresNew,
    /// Run without a transaction, suspending the current one
    NotSupported,
    /// Run without a transaction, fail if one exists
    Never,
    /// Run inside a savepoint of the current transaction, or begin one
    Nested,
}

impl Propagation {
    /// Canonical upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Propagation::Required => "REQUIRED",
            Propagation::Supports => "SUPPORTS",
            Propagation::Mandatory => "MANDATORY",
            Propagation::RequiresNew => "REQUIRES_NEW",
            Propagation::NotSupported => "NOT_SUPPORTED",
            Propagation::Never => "NEVER",
            Propagation::Nested => "NESTED",
        }
    }
}

impl std::fmt::Display for Propagation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Propagation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        let name = upper.strip_prefix("PROPAGATION_").unwrap_or(&upper);
        match name {
            "REQUIRED" => Ok(Propagation::Required),
            "SUPPORTS" => Ok(Propagation::Supports),
            "MANDATORY" => Ok(Propagation::Mandatory),
            "REQUIRES_NEW" => Ok(Propagation::RequiresNew),
            "NOT_SUPPORTED" => Ok(Propagation::NotSupported),
            "NEVER" => Ok(Propagation::Never),
            "NESTED" => Ok(Propagation::Nested),
            _ => Err(Error::UnsupportedPropagation(format!(
                "unknown propagation behavior '{}'",
                s
            ))),
        }
    }
}

/// What a caller asks the coordinator for
///
/// A definition is an input and is never mutated by the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionDefinition {
    /// Propagation behavior
    pub propagation: Propagation,
    /// Whether the transaction only reads
    pub read_only: bool,
    /// Timeout forwarded to the native layer (not enforced here)
    pub timeout: Option<Duration>,
    /// Optional name, exposed through synchronization state
    pub name: Option<String>,
}

impl TransactionDefinition {
    /// REQUIRED, read-write, no timeout, unnamed
    pub fn new() -> Self {
        Self::default()
    }

    /// Definition with the given propagation and defaults otherwise
    pub fn with_propagation(propagation: Propagation) -> Self {
        Self {
            propagation,
            ..Self::default()
        }
    }

    /// Set the read-only flag
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Set the timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Lifecycle of a native transaction handle
///
/// ```text
/// Open → {CommitPending | RollbackPending} → {Committed | RolledBack} → Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionState {
    /// Begun, accepting work
    Open,
    /// Commit in progress
    CommitPending,
    /// Rollback in progress
    RollbackPending,
    /// Committed
    Committed,
    /// Rolled back
    RolledBack,
    /// Released by the backing store
    Closed,
}

impl TransactionState {
    /// Open, CommitPending or RollbackPending
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TransactionState::Open
                | TransactionState::CommitPending
                | TransactionState::RollbackPending
        )
    }

    /// Committed, RolledBack or Closed
    pub fn is_completed(&self) -> bool {
        !self.is_active()
    }

    /// Whether a native commit may be issued in this state
    pub fn can_commit(&self) -> bool {
        matches!(
            self,
            TransactionState::Open | TransactionState::CommitPending
        )
    }

    /// Whether a native rollback may be issued in this state
    pub fn can_rollback(&self) -> bool {
        matches!(
            self,
            TransactionState::Open | TransactionState::RollbackPending
        )
    }

    /// Get status as string
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Open => "Open",
            TransactionState::CommitPending => "CommitPending",
            TransactionState::RollbackPending => "RollbackPending",
            TransactionState::Committed => "Committed",
            TransactionState::RolledBack => "RolledBack",
            TransactionState::Closed => "Closed",
        }
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome reported to `after_completion` callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionStatus {
    /// The transaction committed
    Committed,
    /// The transaction rolled back
    RolledBack,
    /// Outcome not known (heuristic failure, or no synchronization to defer to)
    Unknown,
}

impl CompletionStatus {
    /// Get status as string
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionStatus::Committed => "Committed",
            CompletionStatus::RolledBack => "RolledBack",
            CompletionStatus::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marker for a savepoint inside a native transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Savepoint(pub u64);
