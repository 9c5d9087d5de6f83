//! Rollback-Only Tests
//!
//! Local and global rollback-only, UnexpectedRollback reporting and native
//! commit/rollback failures.

use crate::*;
use sessionbind::sessionbind_storage::FaultPoint;

#[test]
fn test_failed_participant_rolls_back_once() {
    let (store, persistence) = create_persistence();
    let err = persistence
        .in_transaction(&TransactionDefinition::new(), |_| {
            persistence.template().save(person("outer"))?;
            let inner: Result<()> =
                persistence.in_transaction(&TransactionDefinition::new(), |_| {
                    Err(Error::store(StoreErrorKind::Application, "inner failed"))
                });
            assert!(inner.is_err());
            // Swallowed by the outer scope, which still asks to commit
            Ok(())
        })
        .unwrap_err();

    assert!(err.is_unexpected_rollback());
    let counts = store.counts();
    assert_eq!(counts.rolled_back, 1);
    assert_eq!(counts.committed, 0);
    assert_eq!(store.committed_count("Person"), 0);
    assert_eq!(store.open_session_count(), 0);
}

#[test]
fn test_failure_propagated_by_owner_is_reported_as_is() {
    let (store, persistence) = create_persistence();
    let err = persistence
        .in_transaction(&TransactionDefinition::new(), |_| {
            persistence.in_transaction(&TransactionDefinition::new(), |_| -> Result<()> {
                Err(Error::store(StoreErrorKind::Application, "inner failed"))
            })
        })
        .unwrap_err();
    assert_eq!(err.store_error().unwrap().kind, StoreErrorKind::Application);
    assert_eq!(store.counts().rolled_back, 1);
}

#[test]
fn test_local_rollback_only_is_silent() {
    let (store, persistence) = create_persistence();
    persistence
        .in_transaction(&TransactionDefinition::new(), |status| {
            persistence.template().save(person("discarded"))?;
            status.set_rollback_only();
            Ok(())
        })
        .unwrap();
    assert_eq!(store.committed_count("Person"), 0);
    assert_eq!(store.counts().rolled_back, 1);
    assert_eq!(persistence.metrics().transactions_rolled_back, 1);
}

#[test]
fn test_participant_local_rollback_only_marks_owner() {
    let (store, persistence) = create_persistence_with(CoordinatorConfig {
        global_rollback_on_participation_failure: false,
        ..CoordinatorConfig::default()
    });
    let err = persistence
        .in_transaction(&TransactionDefinition::new(), |_| {
            persistence.in_transaction(&TransactionDefinition::new(), |inner| {
                inner.set_rollback_only();
                Ok(())
            })
        })
        .unwrap_err();
    assert!(err.is_unexpected_rollback());
    assert_eq!(store.counts().committed, 0);
}

#[test]
fn test_participant_failure_left_to_owner() {
    let (store, persistence) = create_persistence_with(CoordinatorConfig {
        global_rollback_on_participation_failure: false,
        ..CoordinatorConfig::default()
    });
    persistence
        .in_transaction(&TransactionDefinition::new(), |_| {
            persistence.template().save(person("kept"))?;
            let inner: Result<()> =
                persistence.in_transaction(&TransactionDefinition::new(), |_| {
                    Err(Error::store(StoreErrorKind::Application, "ignored"))
                });
            assert!(inner.is_err());
            Ok(())
        })
        .unwrap();
    assert_eq!(store.committed_count("Person"), 1);
}

#[test]
fn test_fail_early_reports_to_inner_commit() {
    let (_store, persistence) = create_persistence_with(CoordinatorConfig {
        fail_early_on_global_rollback_only: true,
        ..CoordinatorConfig::default()
    });
    let coordinator = persistence.coordinator();
    let mut outer = coordinator
        .get_transaction(&TransactionDefinition::new())
        .unwrap();
    let mut failing = coordinator
        .get_transaction(&TransactionDefinition::new())
        .unwrap();
    coordinator.rollback(&mut failing).unwrap();

    let mut observer = coordinator
        .get_transaction(&TransactionDefinition::new())
        .unwrap();
    assert!(observer.is_global_rollback_only());
    assert!(coordinator.commit(&mut observer).unwrap_err().is_unexpected_rollback());
    assert!(coordinator.commit(&mut outer).unwrap_err().is_unexpected_rollback());
}

#[test]
fn test_commit_failure_is_transaction_system_error() {
    let (store, persistence) = create_persistence();
    let err = persistence
        .in_transaction(&TransactionDefinition::new(), |_| {
            persistence.template().save(person("lost"))?;
            store.fail_next(FaultPoint::Commit, StoreErrorKind::Transaction);
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, Error::TransactionSystem { .. }));
    assert_eq!(store.committed_count("Person"), 0);
    assert_eq!(store.open_session_count(), 0);
    assert!(!has_bound_session(&persistence));
}

#[test]
fn test_commit_failure_of_other_kind_is_translated() {
    let (store, persistence) = create_persistence();
    let err = persistence
        .in_transaction(&TransactionDefinition::new(), |_| {
            store.fail_next(FaultPoint::Commit, StoreErrorKind::Connection);
            Ok(())
        })
        .unwrap_err();
    assert_eq!(err.data_access_kind(), Some(DataAccessKind::ResourceFailure));
}

#[test]
fn test_rollback_failure_does_not_hide_callback_error() {
    let (store, persistence) = create_persistence();
    let err = persistence
        .in_transaction(&TransactionDefinition::new(), |_| -> Result<()> {
            store.fail_next(FaultPoint::Rollback, StoreErrorKind::Transaction);
            Err(Error::store(StoreErrorKind::Application, "callback failed"))
        })
        .unwrap_err();
    assert_eq!(err.store_error().unwrap().kind, StoreErrorKind::Application);
    assert_eq!(store.open_session_count(), 0);
}
