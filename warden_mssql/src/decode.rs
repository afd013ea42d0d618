//! Row accessors and error translation.

use tiberius::error::Error as TdsError;
use tiberius::Row;
use warden_core::{EntityKind, Error, Scope};

/// What a round trip was for, carried into any error it produces.
#[derive(Clone, Debug)]
pub(crate) struct Target<'a> {
    pub(crate) operation: &'static str,
    pub(crate) entity: EntityKind,
    pub(crate) name: &'a str,
    pub(crate) scope: Scope,
}

impl<'a> Target<'a> {
    pub(crate) fn new(
        operation: &'static str,
        entity: EntityKind,
        name: &'a str,
        scope: Scope,
    ) -> Self {
        Self {
            operation,
            entity,
            name,
            scope,
        }
    }

    /// Translate a driver error. Server errors keep their number and
    /// message; transport failures become connectivity errors.
    pub(crate) fn error(&self, err: TdsError) -> Error {
        match err {
            TdsError::Server(token) => Error::EngineRejected {
                operation: self.operation,
                entity: self.entity,
                name: self.name.to_owned(),
                scope: self.scope.clone(),
                message: token.message().to_owned(),
                code: Some(token.code()),
            },
            TdsError::Io { .. } | TdsError::Tls(_) | TdsError::Routing { .. } => {
                Error::connectivity(self.scope.clone(), err)
            }
            other => Error::rejected(
                self.operation,
                self.entity,
                self.name,
                self.scope.clone(),
                other.to_string(),
            ),
        }
    }

    pub(crate) fn not_found(&self) -> Error {
        Error::not_found(self.entity, self.name, self.scope.clone())
    }
}

pub(crate) fn text(row: &Row, idx: usize) -> Result<String, TdsError> {
    Ok(row.try_get::<&str, _>(idx)?.unwrap_or_default().to_owned())
}

pub(crate) fn optional_text(row: &Row, idx: usize) -> Result<Option<String>, TdsError> {
    Ok(row.try_get::<&str, _>(idx)?.map(str::to_owned))
}

pub(crate) fn int(row: &Row, idx: usize) -> Result<i64, TdsError> {
    Ok(row.try_get::<i64, _>(idx)?.unwrap_or_default())
}

pub(crate) fn int32(row: &Row, idx: usize) -> Result<Option<i32>, TdsError> {
    row.try_get::<i32, _>(idx)
}

pub(crate) fn flag(row: &Row, idx: usize) -> Result<Option<bool>, TdsError> {
    row.try_get::<bool, _>(idx)
}
