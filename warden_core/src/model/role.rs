use serde::{Deserialize, Serialize};

/// A database role. Its identifier is its name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Engine-assigned principal id, zero on input.
    pub principal_id: i64,
    /// Role name.
    pub name: String,
}

impl Role {
    /// A role to be created or renamed to `name`.
    pub fn named(name: &str) -> Self {
        Self {
            principal_id: 0,
            name: name.to_owned(),
        }
    }
}

/// Membership of a principal in a role within one database.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMembership {
    /// Encoded `server/database/role/member` identifier.
    pub id: String,
    /// Database the membership lives in.
    pub database: String,
    /// Role name.
    pub role: String,
    /// Member principal name.
    pub member: String,
}
