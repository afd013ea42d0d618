use derive_new::new;
use serde::{Deserialize, Serialize};

use super::user::present;
use crate::error::{EntityKind, Error, Result};
use crate::securable;

/// A server-level SQL login.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Login {
    /// Engine-assigned principal id.
    pub principal_id: i64,
    /// Login name.
    pub name: String,
    /// Security identifier as a hex literal.
    pub sid: String,
    /// Database the login connects to by default.
    pub default_database: String,
    /// Language used for sessions of this login.
    pub default_language: String,
    /// True if the login cannot connect.
    pub disabled: bool,
}

/// Input for creating a login. A password is always required.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct CreateLogin {
    /// Login name.
    pub name: String,
    /// Password.
    pub password: String,
    /// Explicit SID as a hex literal.
    pub sid: Option<String>,
    /// Default database.
    pub default_database: Option<String>,
    /// Default language.
    pub default_language: Option<String>,
    /// Create the login disabled.
    pub disabled: bool,
}

impl CreateLogin {
    /// Check the input.
    pub fn validate(&self) -> Result<()> {
        let name = securable::principal_name(&self.name, EntityKind::Login)?;
        if self.password.is_empty() {
            return Err(Error::validation(
                EntityKind::Login,
                name,
                "logins require a password",
            ));
        }
        if let Some(sid) = present(&self.sid) {
            securable::sid(sid, EntityKind::Login, &name)?;
        }
        if let Some(db) = present(&self.default_database) {
            securable::principal_name(db, EntityKind::Database)?;
        }
        if let Some(language) = present(&self.default_language) {
            securable::token(language, EntityKind::Login, "default language")?;
        }
        Ok(())
    }
}

/// Input for altering a login.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct UpdateLogin {
    /// Login name.
    pub name: String,
    /// New password.
    pub password: Option<String>,
    /// New default database.
    pub default_database: Option<String>,
    /// New default language.
    pub default_language: Option<String>,
    /// Enable (`false`) or disable (`true`) the login.
    pub disabled: Option<bool>,
}

impl UpdateLogin {
    /// Check the input. Returns false if there is nothing to change.
    pub fn validate(&self) -> Result<bool> {
        securable::principal_name(&self.name, EntityKind::Login)?;
        if let Some(db) = present(&self.default_database) {
            securable::principal_name(db, EntityKind::Database)?;
        }
        if let Some(language) = present(&self.default_language) {
            securable::token(language, EntityKind::Login, "default language")?;
        }
        Ok(self.has_options() || self.disabled.is_some())
    }

    /// True if any `WITH` option would be emitted.
    pub fn has_options(&self) -> bool {
        present(&self.password).is_some()
            || present(&self.default_database).is_some()
            || present(&self.default_language).is_some()
    }
}
