//! Configuration Tests

use crate::*;
use std::io::Write;
use std::time::Duration;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_config_file_drives_coordinator() {
    init_tracing();
    let file = write_config(
        "global_rollback_on_participation_failure = false\ndefault_timeout_secs = 12\n",
    );
    let store = MemoryStore::with_labels("graph", ["Person"]);
    let persistence = Persistence::builder()
        .factory(Arc::new(store.clone()))
        .config_file(file.path())
        .open()
        .unwrap();

    persistence
        .in_transaction(&TransactionDefinition::new(), |_| {
            let inner: Result<()> =
                persistence.in_transaction(&TransactionDefinition::new(), |_| {
                    Err(Error::store(StoreErrorKind::Application, "ignored"))
                });
            assert!(inner.is_err());
            Ok(())
        })
        .unwrap();

    assert_eq!(store.counts().committed, 1);
    assert_eq!(
        store.last_definition().unwrap().timeout,
        Some(Duration::from_secs(12))
    );
}

#[test]
fn test_config_file_overrides_inline_config() {
    let file = write_config("nested_transactions_allowed = false\n");
    let persistence = Persistence::builder()
        .labels(["Person"])
        .config(CoordinatorConfig {
            nested_transactions_allowed: true,
            ..CoordinatorConfig::default()
        })
        .config_file(file.path())
        .open()
        .unwrap();
    assert!(!persistence.coordinator().config().nested_transactions_allowed);
}

#[test]
fn test_invalid_config_file() {
    let file = write_config("default_timeout_secs = \"soon\"\n");
    let err = Persistence::builder()
        .config_file(file.path())
        .open()
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_missing_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = Persistence::builder()
        .config_file(dir.path().join("missing.toml"))
        .open()
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}
