//! Exception translation
//!
//! Maps native [`StoreErrorKind`]s onto the categorized [`DataAccessKind`]s.
//!
//! | native kind | categorized kind |
//! |-------------|------------------|
//! | AmbiguousBaseType, BaseTypeNotFound, InvalidDepth, Mapping | InvalidUsage |
//! | Query, MissingOperator | InvalidResourceUsage |
//! | NotFound | RetrievalFailure |
//! | UnknownStatementType | InvalidUsage |
//! | Connection | ResourceFailure |
//! | TransactionManager, EntityAccess, Transaction, ServiceNotFound, ResultProcessing, ResultErrors | SystemError |
//! | Application | not translated |
//!
//! An untranslated error is presumed to come from caller code and is left
//! for the caller to handle.

use crate::error::{DataAccessError, DataAccessKind, Error, StoreError, StoreErrorKind};

/// Classify a native kind, or `None` if it is not a store failure
pub fn classify(kind: StoreErrorKind) -> Option<DataAccessKind> {
    use StoreErrorKind::*;
    match kind {
        AmbiguousBaseType | BaseTypeNotFound | InvalidDepth | Mapping => {
            Some(DataAccessKind::InvalidUsage)
        }
        Query | MissingOperator => Some(DataAccessKind::InvalidResourceUsage),
        NotFound => Some(DataAccessKind::RetrievalFailure),
        UnknownStatementType => Some(DataAccessKind::InvalidUsage),
        Connection => Some(DataAccessKind::ResourceFailure),
        TransactionManager | EntityAccess | Transaction | ServiceNotFound | ResultProcessing
        | ResultErrors => Some(DataAccessKind::SystemError),
        Application => None,
    }
}

/// Translate a store failure if it belongs to the store
pub fn translate_if_possible(error: &StoreError) -> Option<DataAccessError> {
    classify(error.kind).map(|kind| DataAccessError::new(kind, error.clone()))
}

/// Translate the store failure inside `error`, leaving everything else alone
///
/// Only [`Error::Store`] is touched; errors that are already categorized or
/// that describe coordinator misuse are returned unchanged.
pub fn translate_error(error: Error) -> Error {
    match error {
        Error::Store(store) => match classify(store.kind) {
            Some(kind) => Error::DataAccess(DataAccessError::new(kind, store)),
            None => Error::Store(store),
        },
        other => other,
    }
}

/// Pluggable translation seam
///
/// Components that surface store failures to callers take a translator so a
/// store with its own error vocabulary can supply its own table.
pub trait ExceptionTranslator: Send + Sync {
    /// Translate `error`, or `None` if it is not this store's failure
    fn translate_if_possible(&self, error: &StoreError) -> Option<DataAccessError>;
}

/// The default translation table
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreExceptionTranslator;

impl ExceptionTranslator for StoreExceptionTranslator {
    fn translate_if_possible(&self, error: &StoreError) -> Option<DataAccessError> {
        translate_if_possible(error)
    }
}
