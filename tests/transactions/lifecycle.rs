//! Session Lifecycle Tests
//!
//! Begin failures, pre-bound holders, factory-managed sessions, registry
//! scopes and metrics.

use crate::*;
use sessionbind::sessionbind_concurrency::ResourceHolder;
use sessionbind::sessionbind_storage::FaultPoint;

// =============================================================================
// BEGIN FAILURE
// =============================================================================

#[test]
fn test_begin_failure_releases_session() {
    let (store, persistence) = create_persistence();
    store.fail_next(FaultPoint::Begin, StoreErrorKind::Transaction);
    let err = persistence
        .in_transaction(&TransactionDefinition::new(), |_| Ok(()))
        .unwrap_err();

    assert!(err.is_cannot_create_transaction());
    assert_eq!(err.store_error().unwrap().kind, StoreErrorKind::Transaction);
    assert_eq!(store.open_session_count(), 0);
    assert!(!has_bound_session(&persistence));
    assert!(!synchronization::is_synchronization_active());

    // The coordinator is usable afterwards
    persistence
        .in_transaction(&TransactionDefinition::new(), |_| Ok(()))
        .unwrap();
}

#[test]
fn test_store_unavailable() {
    let (store, persistence) = create_persistence();
    store.set_available(false);
    let err = persistence
        .in_transaction(&TransactionDefinition::new(), |_| Ok(()))
        .unwrap_err();
    assert!(err.is_cannot_create_transaction());

    let err = persistence.template().count("Person").unwrap_err();
    assert_eq!(err.data_access_kind(), Some(DataAccessKind::ResourceFailure));
}

// =============================================================================
// PRE-BOUND HOLDER
// =============================================================================

#[test]
fn test_pre_bound_session_spans_transactions() {
    let (store, persistence) = create_persistence();
    let factory = persistence.factory();
    let registry = ResourceRegistry::current();
    let session = factory.open_session().unwrap();
    let holder = Arc::new(ResourceHolder::new(session.clone()));
    registry.bind(factory.key(), holder.clone()).unwrap();

    for name in ["first", "second"] {
        persistence
            .in_transaction(&TransactionDefinition::new(), |status| {
                assert!(status.is_new_transaction());
                assert_eq!(status.session().unwrap().id()?, session.id()?);
                persistence.template().save(person(name))
            })
            .unwrap();
        assert!(registry.has_resource(factory.key()));
        assert!(holder.transaction().is_none());
    }

    let _: Result<()> = persistence.in_transaction(&TransactionDefinition::new(), |_| {
        persistence.template().save(person("discarded"))?;
        Err(Error::store(StoreErrorKind::Application, "fail"))
    });

    let counts = store.counts();
    assert_eq!(counts.opened, 1);
    assert_eq!(counts.closed, 0);
    assert_eq!(counts.begun, 3);
    assert_eq!(counts.cleared, 1);
    assert_eq!(store.committed_count("Person"), 2);

    // Outside a transaction the pre-bound session serves the proxy too
    assert_eq!(persistence.session().id().unwrap(), session.id().unwrap());
    assert_eq!(store.counts().opened, 1);

    registry.unbind(factory.key()).unwrap();
    factory.close_session(session.as_ref()).unwrap();
    assert_eq!(store.open_session_count(), 0);
}

#[test]
fn test_pre_bound_session_enlisted_by_proxy() {
    let (store, persistence) = create_persistence();
    let other_store = MemoryStore::with_labels("other", ["Movie"]);
    let other_factory: Arc<dyn SessionFactory> = Arc::new(other_store.clone());
    let other = SharedSession::new(other_factory.clone());
    let registry = ResourceRegistry::current();
    let holder = Arc::new(ResourceHolder::new(other_factory.open_session().unwrap()));
    registry.bind(other_factory.key(), holder.clone()).unwrap();

    let _: Result<()> = persistence.in_transaction(&TransactionDefinition::new(), |_| {
        other.count("Movie")?;
        assert!(holder.is_synchronized_with_transaction());
        Err(Error::store(StoreErrorKind::Application, "fail"))
    });

    // Cleared because the transaction did not commit, but left bound and open
    assert_eq!(other_store.counts().cleared, 1);
    assert!(!holder.is_synchronized_with_transaction());
    assert!(registry.has_resource(other_factory.key()));
    assert_eq!(other_store.open_session_count(), 1);
    assert_eq!(store.open_session_count(), 0);

    let unbound = registry.unbind(other_factory.key()).unwrap();
    other_factory.close_session(unbound.session().as_ref()).unwrap();
}

// =============================================================================
// FACTORY-MANAGED SESSIONS
// =============================================================================

#[test]
fn test_factory_managed_session_outlives_transaction() {
    let (store, persistence) = create_persistence_with(CoordinatorConfig {
        factory_managed_sessions: true,
        ..CoordinatorConfig::default()
    });
    let current = persistence.factory().current_session().unwrap();

    let used = persistence
        .in_transaction(&TransactionDefinition::new(), |status| {
            persistence.template().save(person("a"))?;
            status.session().unwrap().id()
        })
        .unwrap();
    assert_eq!(used, current.id().unwrap());
    assert_eq!(store.committed_count("Person"), 1);
    assert_eq!(store.open_session_count(), 1);
    assert!(!has_bound_session(&persistence));

    // Rollback does not clear a factory-managed session
    let _: Result<()> = persistence.in_transaction(&TransactionDefinition::new(), |_| {
        Err(Error::store(StoreErrorKind::Application, "fail"))
    });
    assert_eq!(store.counts().cleared, 0);

    persistence.factory().close_session(current.as_ref()).unwrap();
}

#[test]
fn test_factory_managed_session_failure_is_resource_failure() {
    let (store, persistence) = create_persistence_with(CoordinatorConfig {
        factory_managed_sessions: true,
        ..CoordinatorConfig::default()
    });
    store.set_available(false);
    let err = persistence
        .in_transaction(&TransactionDefinition::new(), |_| Ok(()))
        .unwrap_err();
    assert_eq!(err.data_access_kind(), Some(DataAccessKind::ResourceFailure));
}

// =============================================================================
// REGISTRY SCOPES
// =============================================================================

#[test]
fn test_child_registry_sees_parent_transaction() {
    let (store, persistence) = create_persistence();
    persistence
        .in_transaction(&TransactionDefinition::new(), |outer| {
            let outer_id = outer.session().unwrap().id()?;
            {
                let _scope = ResourceRegistry::enter_child("request");
                assert!(has_bound_session(&persistence));
                assert!(!ResourceRegistry::current().has_local_resource(persistence.factory().key()));
                assert_eq!(persistence.session().id()?, outer_id);
            }
            Ok(())
        })
        .unwrap();
    assert_eq!(store.counts().opened, 1);
}

#[test]
fn test_separate_registry_isolates_bindings() {
    let (store, persistence) = create_persistence();
    persistence
        .in_transaction(&TransactionDefinition::new(), |_| {
            let _scope = ResourceRegistry::enter(Arc::new(ResourceRegistry::new("isolated")));
            assert!(!has_bound_session(&persistence));
            Ok(())
        })
        .unwrap();
    assert!(!has_bound_session(&persistence));
    assert_eq!(store.open_session_count(), 0);
}

// =============================================================================
// METRICS
// =============================================================================

#[test]
fn test_metrics_track_completions() {
    let (_store, persistence) = create_persistence();
    persistence
        .in_transaction(&TransactionDefinition::new(), |_| {
            persistence.in_transaction(&definition(Propagation::Required), |_| Ok(()))
        })
        .unwrap();
    let _: Result<()> = persistence.in_transaction(&TransactionDefinition::new(), |_| {
        Err(Error::store(StoreErrorKind::Application, "fail"))
    });

    let metrics = persistence.metrics();
    assert_eq!(metrics.transactions_committed, 1);
    assert_eq!(metrics.transactions_rolled_back, 1);
    assert_eq!(metrics.transactions_participating, 1);
    assert_eq!(metrics.transactions_active, 0);
    assert_eq!(metrics.operations, 2);
    assert!((metrics.commit_rate - 0.5).abs() < f64::EPSILON);
}
