//! Statement parsing for the in-memory store
//!
//! The store understands a deliberately tiny language:
//!
//! ```text
//! MATCH  <label>
//! COUNT  <label>
//! DELETE <label>
//! ```
//!
//! Every named parameter becomes an equality filter on the entity's
//! properties. Verbs are case-insensitive; labels are not.

use sessionbind_core::{Entity, Parameters, StoreError, StoreErrorKind};

/// Statement verb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// Return matching entities
    Match,
    /// Count matching entities
    Count,
    /// Delete matching entities
    Delete,
}

/// A parsed statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement<'a> {
    /// What to do
    pub verb: Verb,
    /// Which label to do it to
    pub label: &'a str,
}

impl<'a> Statement<'a> {
    /// Parse a statement
    pub fn parse(statement: &'a str) -> Result<Self, StoreError> {
        let mut tokens = statement.split_whitespace();
        let verb = match tokens.next() {
            None => return Err(StoreError::new(StoreErrorKind::Query, "empty statement")),
            Some(v) if v.eq_ignore_ascii_case("MATCH") => Verb::Match,
            Some(v) if v.eq_ignore_ascii_case("COUNT") => Verb::Count,
            Some(v) if v.eq_ignore_ascii_case("DELETE") => Verb::Delete,
            Some(other) => {
                return Err(StoreError::new(
                    StoreErrorKind::UnknownStatementType,
                    format!("unknown statement type '{other}'"),
                ))
            }
        };
        let label = tokens.next().ok_or_else(|| {
            StoreError::new(
                StoreErrorKind::MissingOperator,
                format!("statement '{}' names no label", statement.trim()),
            )
        })?;
        if let Some(extra) = tokens.next() {
            return Err(StoreError::new(
                StoreErrorKind::Query,
                format!("unexpected token '{extra}'"),
            ));
        }
        Ok(Self { verb, label })
    }
}

/// Whether `entity` satisfies every parameter filter
pub fn matches(entity: &Entity, parameters: &Parameters) -> bool {
    parameters
        .iter()
        .all(|(key, value)| entity.get(key) == Some(value))
}
