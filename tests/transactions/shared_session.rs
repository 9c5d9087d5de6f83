//! Shared Session Proxy Tests
//!
//! Identity semantics, rejected transaction demarcation, and session
//! resolution inside and outside transactions.

use crate::*;
use std::collections::HashSet;

#[test]
fn test_proxies_equal_only_to_themselves() {
    let (_store, persistence) = create_persistence();
    let first = SharedSession::new(persistence.factory().clone());
    let second = SharedSession::new(persistence.factory().clone());
    assert_ne!(first, second);
    assert_eq!(persistence.session(), persistence.session());

    let mut set = HashSet::new();
    assert!(set.insert(&first));
    assert!(set.insert(&second));
    assert!(!set.insert(&first));
}

#[test]
fn test_display_names_target_factory() {
    let (store, persistence) = create_persistence();
    let text = persistence.session().to_string();
    assert_eq!(
        text,
        format!(
            "Shared Session proxy for target factory [{}]",
            persistence.factory().describe()
        )
    );
    assert_eq!(store.counts().opened, 0);
}

#[test]
fn test_transaction_demarcation_rejected() {
    let (store, persistence) = create_persistence();
    persistence
        .in_transaction(&TransactionDefinition::new(), |_| {
            let err = persistence
                .session()
                .begin_transaction(&TransactionDefinition::new())
                .err()
                .unwrap();
            assert!(err.is_illegal_state());
            Ok(())
        })
        .unwrap();
    assert_eq!(store.counts().begun, 1);
}

#[test]
fn test_each_call_outside_transaction_gets_own_session() {
    let (store, persistence) = create_persistence();
    let first = persistence.session().id().unwrap();
    let second = persistence.session().id().unwrap();
    assert_ne!(first, second);
    let counts = store.counts();
    assert_eq!((counts.opened, counts.closed), (2, 2));
}

#[test]
fn test_ad_hoc_failure_closes_session_and_passes_error_through() {
    let (store, persistence) = create_persistence();
    let err = persistence.session().count("Unmapped").unwrap_err();
    assert_eq!(
        err.store_error().unwrap().kind,
        StoreErrorKind::BaseTypeNotFound
    );
    assert_eq!(err.data_access_kind(), None);
    assert_eq!(store.open_session_count(), 0);

    // Through the template the same failure is categorized
    let err = persistence.template().count("Unmapped").unwrap_err();
    assert_eq!(err.data_access_kind(), Some(DataAccessKind::InvalidUsage));
}

#[test]
fn test_target_session_only_inside_transaction() {
    let (_store, persistence) = create_persistence();
    assert!(persistence.session().target_session().err().unwrap().is_illegal_state());
    persistence
        .in_transaction(&TransactionDefinition::new(), |status| {
            let target = persistence.session().target_session()?;
            assert_eq!(target.id()?, status.session().unwrap().id()?);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_threads_do_not_share_sessions() {
    let (store, persistence) = create_persistence();
    let persistence = &persistence;
    std::thread::scope(|scope| {
        let workers: Vec<_> = (0..4)
            .map(|n| {
                scope.spawn(move || {
                    persistence.in_transaction(&TransactionDefinition::new(), |status| {
                        let own = status.session().unwrap().id()?;
                        persistence.template().save(person(&format!("worker-{n}")))?;
                        assert_eq!(persistence.session().id()?, own);
                        Ok(own)
                    })
                })
            })
            .collect();
        let ids: HashSet<_> = workers
            .into_iter()
            .map(|w| w.join().unwrap().unwrap())
            .collect();
        assert_eq!(ids.len(), 4);
    });
    assert_eq!(store.committed_count("Person"), 4);
    assert_eq!(store.counts().opened, 4);
    assert_eq!(store.open_session_count(), 0);
}
