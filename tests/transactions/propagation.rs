//! Propagation Tests
//!
//! REQUIRED participation, REQUIRES_NEW suspension, NOT_SUPPORTED, SUPPORTS,
//! MANDATORY, NEVER and NESTED.

use crate::*;
use proptest::prelude::*;

// =============================================================================
// REQUIRED
// =============================================================================

fn nest(persistence: &Persistence, depth: usize) -> Result<()> {
    persistence.in_transaction(&TransactionDefinition::new(), |status| {
        persistence.template().save(person(&format!("level-{depth}")))?;
        if depth > 1 {
            assert!(status.has_transaction());
            nest(persistence, depth - 1)
        } else {
            Ok(())
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_required_nesting_uses_one_transaction(depth in 1usize..8) {
        let (store, persistence) = create_persistence();
        nest(&persistence, depth).unwrap();

        let counts = store.counts();
        prop_assert_eq!(counts.opened, 1);
        prop_assert_eq!(counts.closed, 1);
        prop_assert_eq!(counts.begun, 1);
        prop_assert_eq!(counts.committed, 1);
        prop_assert_eq!(store.committed_count("Person"), depth);
        prop_assert_eq!(persistence.metrics().transactions_participating, depth as u64 - 1);
        prop_assert!(!has_bound_session(&persistence));
    }
}

#[test]
fn test_proxy_sees_one_session_per_transaction() {
    let (store, persistence) = create_persistence();
    persistence
        .in_transaction(&TransactionDefinition::new(), |status| {
            let bound = status.session().unwrap().id()?;
            assert_eq!(persistence.session().id()?, bound);
            persistence.template().save(person("a"))?;
            assert_eq!(persistence.session().id()?, bound);
            Ok(())
        })
        .unwrap();
    assert_eq!(store.counts().opened, 1);
}

// =============================================================================
// REQUIRES_NEW
// =============================================================================

#[test]
fn test_requires_new_uses_distinct_session_and_restores_outer() {
    let (store, persistence) = create_persistence();
    persistence
        .in_transaction(&TransactionDefinition::new(), |outer| {
            let outer_id = outer.session().unwrap().id()?;
            let key = persistence.factory().key();
            let before = ResourceRegistry::current().lookup(key).unwrap();
            persistence.template().save(person("outer"))?;

            persistence.in_transaction(&definition(Propagation::RequiresNew), |inner| {
                assert!(inner.is_new_transaction());
                let inner_id = persistence.session().id()?;
                assert_ne!(inner_id, outer_id);
                // Outer work is invisible to the inner transaction
                assert_eq!(persistence.template().count("Person")?, 0);
                persistence.template().save(person("inner"))
            })?;

            // Inner committed independently
            assert_eq!(store.committed_count("Person"), 1);
            let after = ResourceRegistry::current().lookup(key).unwrap();
            assert!(Arc::ptr_eq(&before, &after));
            assert_eq!(persistence.session().id()?, outer_id);
            assert_eq!(persistence.template().count("Person")?, 2);
            Ok(())
        })
        .unwrap();

    let counts = store.counts();
    assert_eq!((counts.opened, counts.closed, counts.committed), (2, 2, 2));
    assert_eq!(store.committed_count("Person"), 2);
}

#[test]
fn test_requires_new_inner_rollback_leaves_outer_intact() {
    let (store, persistence) = create_persistence();
    persistence
        .in_transaction(&TransactionDefinition::new(), |_| {
            persistence.template().save(person("outer"))?;
            let inner: Result<()> =
                persistence.in_transaction(&definition(Propagation::RequiresNew), |_| {
                    persistence.template().save(person("inner"))?;
                    Err(Error::store(StoreErrorKind::Application, "inner failed"))
                });
            assert!(inner.is_err());
            Ok(())
        })
        .unwrap();
    assert_eq!(store.committed_count("Person"), 1);
}

// =============================================================================
// NOT_SUPPORTED / SUPPORTS
// =============================================================================

#[test]
fn test_supports_without_transaction_uses_ad_hoc_sessions() {
    let (store, persistence) = create_persistence();
    persistence
        .in_transaction(&definition(Propagation::Supports), |status| {
            assert!(!status.has_transaction());
            assert!(!has_bound_session(&persistence));
            persistence.template().save(person("a"))?;
            assert!(!has_bound_session(&persistence));
            assert_eq!(store.open_session_count(), 0);
            Ok(())
        })
        .unwrap();
    // Written immediately by the ad hoc session
    assert_eq!(store.committed_count("Person"), 1);
    assert_eq!(store.counts().begun, 0);
}

#[test]
fn test_supports_inside_transaction_participates() {
    let (store, persistence) = create_persistence();
    persistence
        .in_transaction(&TransactionDefinition::new(), |_| {
            persistence.in_transaction(&definition(Propagation::Supports), |inner| {
                assert!(inner.has_transaction());
                assert!(!inner.is_new_transaction());
                persistence.template().save(person("a"))
            })
        })
        .unwrap();
    assert_eq!(store.counts().opened, 1);
}

#[test]
fn test_not_supported_suspends_transaction() {
    let (store, persistence) = create_persistence();
    let result: Result<()> = persistence.in_transaction(&TransactionDefinition::new(), |_| {
        persistence.template().save(person("transactional"))?;
        persistence.in_transaction(&definition(Propagation::NotSupported), |inner| {
            assert!(!inner.has_transaction());
            assert!(!has_bound_session(&persistence));
            persistence.template().save(person("immediate"))
        })?;
        assert!(has_bound_session(&persistence));
        Err(Error::store(StoreErrorKind::Application, "roll back outer"))
    });
    assert!(result.is_err());

    let names: Vec<_> = persistence
        .template()
        .load_all("Person")
        .unwrap()
        .into_iter()
        .map(|e| e.get("name").cloned())
        .collect();
    assert_eq!(names, vec![Some(json!("immediate"))]);
    assert_eq!(store.open_session_count(), 0);
}

#[test]
fn test_not_supported_in_child_scope_leaves_outer_transaction() {
    let (store, persistence) = create_persistence();
    let result: Result<()> = persistence.in_transaction(&TransactionDefinition::new(), |outer| {
        let outer_id = outer.session().unwrap().id()?;
        let _scope = ResourceRegistry::enter_child("request");

        persistence.in_transaction(&definition(Propagation::NotSupported), |_| {
            assert!(!has_bound_session(&persistence));
            assert_ne!(persistence.session().id()?, outer_id);
            // Ad hoc session: committed on its own
            persistence.template().save(person("auto"))?;
            assert_eq!(store.committed_count("Person"), 1);
            Ok(())
        })?;

        assert!(has_bound_session(&persistence));
        assert_eq!(persistence.session().id()?, outer_id);
        persistence.template().save(person("discarded"))?;
        Err(Error::store(StoreErrorKind::Application, "outer fails"))
    });

    assert!(result.is_err());
    assert_eq!(store.committed_count("Person"), 1);
    assert_eq!(store.counts().rolled_back, 1);
    assert_eq!(store.open_session_count(), 0);
    assert!(!has_bound_session(&persistence));
}

// =============================================================================
// MANDATORY / NEVER
// =============================================================================

#[test]
fn test_mandatory_requires_transaction() {
    let (store, persistence) = create_persistence();
    let err = persistence
        .in_transaction(&definition(Propagation::Mandatory), |_| Ok(()))
        .unwrap_err();
    assert!(matches!(err, Error::IllegalTransactionState(_)));
    assert_eq!(store.counts().opened, 0);

    persistence
        .in_transaction(&TransactionDefinition::new(), |_| {
            persistence.in_transaction(&definition(Propagation::Mandatory), |inner| {
                assert!(inner.has_transaction());
                Ok(())
            })
        })
        .unwrap();
}

#[test]
fn test_never_rejects_transaction() {
    let (_store, persistence) = create_persistence();
    persistence
        .in_transaction(&definition(Propagation::Never), |status| {
            assert!(!status.has_transaction());
            Ok(())
        })
        .unwrap();

    let err = persistence
        .in_transaction(&TransactionDefinition::new(), |_| {
            persistence.in_transaction(&definition(Propagation::Never), |_| Ok(()))
        })
        .unwrap_err();
    assert!(matches!(err, Error::IllegalTransactionState(_)));
}

// =============================================================================
// NESTED
// =============================================================================

#[test]
fn test_nested_rolls_back_only_its_own_work() {
    let (store, persistence) = create_persistence();
    persistence
        .in_transaction(&TransactionDefinition::new(), |_| {
            persistence.template().save(person("kept"))?;
            let nested: Result<()> =
                persistence.in_transaction(&definition(Propagation::Nested), |status| {
                    assert!(status.has_savepoint());
                    persistence.template().save(person("dropped"))?;
                    Err(Error::store(StoreErrorKind::Application, "nested failed"))
                });
            assert!(nested.is_err());
            assert_eq!(persistence.template().count("Person")?, 1);
            Ok(())
        })
        .unwrap();
    assert_eq!(store.committed_count("Person"), 1);
    assert_eq!(store.counts().opened, 1);
}

#[test]
fn test_nested_without_savepoints_joins_outer() {
    let (store, persistence) = create_persistence();
    store.set_savepoints_supported(false);
    let result: Result<()> = persistence.in_transaction(&TransactionDefinition::new(), |_| {
        persistence.template().save(person("outer"))?;
        let nested: Result<()> =
            persistence.in_transaction(&definition(Propagation::Nested), |status| {
                assert!(!status.has_savepoint());
                Err(Error::store(StoreErrorKind::Application, "nested failed"))
            });
        assert!(nested.is_err());
        Ok(())
    });
    // The joined scope failed, so the whole transaction rolls back
    assert!(result.unwrap_err().is_unexpected_rollback());
    assert_eq!(store.committed_count("Person"), 0);
}

#[test]
fn test_nested_disallowed_by_configuration() {
    let (_store, persistence) = create_persistence_with(CoordinatorConfig {
        nested_transactions_allowed: false,
        ..CoordinatorConfig::default()
    });
    let err = persistence
        .in_transaction(&TransactionDefinition::new(), |_| {
            persistence.in_transaction(&definition(Propagation::Nested), |_| Ok(()))
        })
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedPropagation(_)));
}
