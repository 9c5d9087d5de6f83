//! Transaction Coordination Test Suite
//!
//! Cross-crate tests driving the coordinator, the shared session proxy and
//! the in-memory store together.
//!
//! ## Key Verification Points
//!
//! 1. One session and one native transaction per logical transaction
//! 2. Propagation, suspension and resumption restore the registry exactly
//! 3. Rollback-only requests surface as one native rollback
//! 4. Listener callbacks run in order and always complete
//! 5. Ad hoc sessions never outlive the call that opened them
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test transactions
//!
//! # Propagation tests only
//! cargo test --test transactions propagation::
//! ```

use std::sync::{Arc, Once};

use parking_lot::Mutex;
use sessionbind::prelude::*;
use sessionbind::sessionbind_concurrency::{synchronization, ResourceRegistry};
use sessionbind::sessionbind_storage::MemoryStore;

// Test modules
pub mod config;
pub mod lifecycle;
pub mod propagation;
pub mod rollback;
pub mod shared_session;

// =============================================================================
// SHARED TEST UTILITIES
// =============================================================================

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

/// A fresh in-memory store and a persistence facade over it
pub fn create_persistence() -> (MemoryStore, Persistence) {
    create_persistence_with(CoordinatorConfig::default())
}

/// Same as [`create_persistence`] with explicit coordinator configuration
pub fn create_persistence_with(config: CoordinatorConfig) -> (MemoryStore, Persistence) {
    init_tracing();
    synchronization::clear();
    let store = MemoryStore::with_labels("graph", ["Person", "Movie"]);
    let persistence = Persistence::builder()
        .factory(Arc::new(store.clone()))
        .config(config)
        .open()
        .expect("Failed to open persistence");
    (store, persistence)
}

/// Definition with the given propagation
pub fn definition(propagation: Propagation) -> TransactionDefinition {
    TransactionDefinition::with_propagation(propagation)
}

/// A person entity
pub fn person(name: &str) -> Entity {
    Entity::new("Person").with("name", name)
}

/// Whether the current thread has a session bound for the facade's factory
pub fn has_bound_session(persistence: &Persistence) -> bool {
    ResourceRegistry::current().has_resource(persistence.factory().key())
}

/// Shared event log written by [`Recorder`]
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Listener appending `name:event` for every callback
pub struct Recorder {
    name: String,
    order: i32,
    log: EventLog,
}

impl Recorder {
    /// Register a recorder with the current synchronization
    pub fn register(name: &str, order: i32, log: &EventLog) {
        synchronization::register_synchronization(Arc::new(Recorder {
            name: name.to_string(),
            order,
            log: log.clone(),
        }))
        .expect("synchronization must be active");
    }

    fn push(&self, event: impl std::fmt::Display) {
        self.log.lock().push(format!("{}:{}", self.name, event));
    }
}

impl TransactionSynchronization for Recorder {
    fn order(&self) -> i32 {
        self.order
    }
    fn suspend(&self) {
        self.push("suspend");
    }
    fn resume(&self) {
        self.push("resume");
    }
    fn before_commit(&self, read_only: bool) -> Result<()> {
        self.push(format_args!("before_commit({read_only})"));
        Ok(())
    }
    fn before_completion(&self) {
        self.push("before_completion");
    }
    fn after_commit(&self) {
        self.push("after_commit");
    }
    fn after_completion(&self, status: CompletionStatus) {
        self.push(format_args!("after_completion({status})"));
    }
}

/// A new, empty event log
pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}
