//! Core contracts for sessionbind
//!
//! This crate defines the vocabulary shared by every other crate:
//! - Session, SessionFactory and NativeTransaction traits
//! - Transaction definitions, propagation and native transaction states
//! - The canonical error taxonomy and the exception translator

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod session;
pub mod translate;
pub mod types;

pub use error::{DataAccessError, DataAccessKind, Error, Result, StoreError, StoreErrorKind};
pub use session::{
    Entity, EntityId, Metadata, NativeTransaction, Parameters, QueryResult, Session,
    SessionFactory,
};
pub use translate::{
    classify, translate_error, translate_if_possible, ExceptionTranslator,
    StoreExceptionTranslator,
};
pub use types::{
    CompletionStatus, FactoryKey, Propagation, Savepoint, SessionId, TransactionDefinition,
    TransactionState,
};
