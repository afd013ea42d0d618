use serde::{Deserialize, Serialize};

use crate::error::{EntityKind, Result};
use crate::securable::{self, Securable};

/// A permission held by a principal, at database scope or on a schema or
/// object.
///
/// `object_type` keeps whatever the caller asked for (`TABLE`, `VIEW`, ..)
/// even though the engine only tracks the `OBJECT` and `SCHEMA` classes.
/// Reads echo the requested type back so repeated reconciliation passes do
/// not report drift. Two types that map to the same class are therefore
/// indistinguishable without the caller's hint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GrantPermission {
    /// Database the permission lives in.
    pub database: String,
    /// Grantee.
    pub principal: String,
    /// Canonical upper-case permission token.
    pub permission: String,
    /// Requested object type, absent for database scope.
    pub object_type: Option<String>,
    /// Possibly schema-qualified object name, absent for database scope.
    pub object_name: Option<String>,
}

/// A permission whose fields have been validated and normalized.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ValidatedPermission {
    /// Database the permission lives in.
    pub database: String,
    /// Grantee.
    pub principal: String,
    /// Canonical permission token.
    pub permission: String,
    /// Resolved target.
    pub securable: Securable,
}

impl GrantPermission {
    /// A database-scope permission.
    pub fn database_scope(database: &str, principal: &str, permission: &str) -> Self {
        Self {
            database: database.to_owned(),
            principal: principal.to_owned(),
            permission: permission.to_owned(),
            object_type: None,
            object_name: None,
        }
    }

    /// A permission on a schema or object.
    pub fn on_object(
        database: &str,
        principal: &str,
        permission: &str,
        object_type: &str,
        object_name: &str,
    ) -> Self {
        Self {
            database: database.to_owned(),
            principal: principal.to_owned(),
            permission: permission.to_owned(),
            object_type: Some(object_type.to_owned()),
            object_name: Some(object_name.to_owned()),
        }
    }

    /// True for database-scope permissions.
    pub fn is_database_scope(&self) -> bool {
        self.object_type.is_none() && self.object_name.is_none()
    }

    /// Normalize and validate every field.
    pub fn validate(&self) -> Result<ValidatedPermission> {
        let database = securable::principal_name(&self.database, EntityKind::Database)?;
        let principal = securable::principal_name(&self.principal, EntityKind::Permission)?;
        let permission = securable::permission(&self.permission)?;
        let securable =
            securable::resolve(self.object_type.as_deref(), self.object_name.as_deref())?;
        Ok(ValidatedPermission {
            database,
            principal,
            permission,
            securable,
        })
    }

    /// The normalized form callers should expect back from a read: the
    /// permission upper-cased, the object type and name as requested.
    pub fn normalized(&self) -> Result<Self> {
        let valid = self.validate()?;
        Ok(Self {
            database: valid.database,
            principal: valid.principal,
            permission: valid.permission,
            object_type: self
                .object_type
                .as_deref()
                .map(|t| t.trim().to_uppercase()),
            object_name: self.object_name.as_deref().map(|n| n.trim().to_owned()),
        })
    }
}
