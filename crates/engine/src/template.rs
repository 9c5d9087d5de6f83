//! Session template
//!
//! Runs session operations and callbacks through an [`ExceptionTranslator`],
//! so native store failures reach the caller as categorized
//! [`Error::DataAccess`] errors. Failures the translator does not claim
//! (application errors) pass through unchanged.

use sessionbind_core::{
    Entity, EntityId, Error, ExceptionTranslator, Parameters, QueryResult, Result, Session,
    StoreErrorKind, StoreExceptionTranslator,
};
use std::sync::Arc;

/// Translating wrapper around a session, usually the shared proxy
#[derive(Clone)]
pub struct SessionTemplate {
    session: Arc<dyn Session>,
    translator: Arc<dyn ExceptionTranslator>,
}

impl SessionTemplate {
    /// Template using the default translation table
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self::with_translator(session, Arc::new(StoreExceptionTranslator))
    }

    /// Template using a custom translator
    pub fn with_translator(
        session: Arc<dyn Session>,
        translator: Arc<dyn ExceptionTranslator>,
    ) -> Self {
        Self {
            session,
            translator,
        }
    }

    /// The wrapped session
    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    /// Run `callback` against the session, translating its failure
    pub fn execute<T, F>(&self, callback: F) -> Result<T>
    where
        F: FnOnce(&dyn Session) -> Result<T>,
    {
        callback(self.session.as_ref()).map_err(|e| self.translate(e))
    }

    fn translate(&self, error: Error) -> Error {
        match error {
            Error::Store(store) => match self.translator.translate_if_possible(&store) {
                Some(translated) => Error::DataAccess(translated),
                None => Error::Store(store),
            },
            other => other,
        }
    }

    /// Persist `entity`, returning its id
    pub fn save(&self, entity: Entity) -> Result<EntityId> {
        self.execute(|s| s.save(entity))
    }

    /// Load one entity, `None` if absent
    pub fn load(&self, label: &str, id: EntityId) -> Result<Option<Entity>> {
        self.execute(|s| s.load(label, id))
    }

    /// Load one entity that must exist
    pub fn load_required(&self, label: &str, id: EntityId) -> Result<Entity> {
        self.execute(|s| {
            s.load(label, id)?.ok_or_else(|| {
                Error::store(
                    StoreErrorKind::NotFound,
                    format!("no {label} with id {id}"),
                )
            })
        })
    }

    /// All entities of `label`
    pub fn load_all(&self, label: &str) -> Result<Vec<Entity>> {
        self.execute(|s| s.load_all(label))
    }

    /// Delete one entity; `false` if it did not exist
    pub fn delete(&self, label: &str, id: EntityId) -> Result<bool> {
        self.execute(|s| s.delete(label, id))
    }

    /// Delete every entity of `label`, returning how many were removed
    pub fn delete_all(&self, label: &str) -> Result<u64> {
        self.execute(|s| {
            s.query(&format!("DELETE {label}"), &Parameters::new())
                .map(|r| r.affected)
        })
    }

    /// Number of entities of `label`
    pub fn count(&self, label: &str) -> Result<u64> {
        self.execute(|s| s.count(label))
    }

    /// Run a statement
    pub fn query(&self, statement: &str, parameters: &Parameters) -> Result<QueryResult> {
        self.execute(|s| s.query(statement, parameters))
    }

    /// Run a statement expected to match at most one entity
    pub fn query_for_object(
        &self,
        statement: &str,
        parameters: &Parameters,
    ) -> Result<Option<Entity>> {
        self.execute(|s| {
            let mut result = s.query(statement, parameters)?;
            match result.entities.len() {
                0 | 1 => Ok(result.entities.pop()),
                n => Err(Error::store(
                    StoreErrorKind::ResultProcessing,
                    format!("expected at most one result, got {n}"),
                )),
            }
        })
    }

    /// Drop the session's pending work
    pub fn clear(&self) -> Result<()> {
        self.execute(|s| s.clear())
    }
}

impl std::fmt::Debug for SessionTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTemplate").finish_non_exhaustive()
    }
}
