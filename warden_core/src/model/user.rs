use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::error::{EntityKind, Error, Result};
use crate::securable;

/// How a database user authenticates. Exactly one mode is active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthMode {
    /// Authenticated by its own password inside the database.
    Contained,
    /// Authentication delegated to a server login.
    LoginMapped,
    /// Authenticated by an external identity provider.
    External,
}

/// A database user as read back from the engine.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Engine-assigned principal id.
    pub principal_id: i64,
    /// User name.
    pub name: String,
    /// Security identifier as a hex literal.
    pub sid: String,
    /// Default schema. Never empty once created.
    pub default_schema: String,
    /// Name of the mapped login, empty unless login-mapped.
    pub login_name: String,
    /// True for users created `FROM EXTERNAL PROVIDER`.
    pub external: bool,
    /// Database roles the user belongs to, sorted.
    pub roles: Vec<String>,
}

impl User {
    /// The authentication mode this user was created with.
    pub fn mode(&self) -> AuthMode {
        if self.external {
            AuthMode::External
        } else if !self.login_name.is_empty() {
            AuthMode::LoginMapped
        } else {
            AuthMode::Contained
        }
    }
}

/// Input for creating a database user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct CreateUser {
    /// User name.
    pub name: String,
    /// Login to map to. Selects login-mapped authentication.
    pub login_name: Option<String>,
    /// Password. Selects contained authentication.
    pub password: Option<String>,
    /// Selects external-provider authentication.
    pub external: bool,
    /// Explicit SID as a hex literal, engine-assigned if absent.
    pub sid: Option<String>,
    /// Default schema. Required.
    pub default_schema: String,
}

impl CreateUser {
    /// A contained user authenticated by `password`.
    pub fn contained(name: &str, password: &str, default_schema: &str) -> Self {
        Self::new(
            name.to_owned(),
            None,
            Some(password.to_owned()),
            false,
            None,
            default_schema.to_owned(),
        )
    }

    /// A user mapped to the server login `login_name`.
    pub fn for_login(name: &str, login_name: &str, default_schema: &str) -> Self {
        Self::new(
            name.to_owned(),
            Some(login_name.to_owned()),
            None,
            false,
            None,
            default_schema.to_owned(),
        )
    }

    /// A user authenticated by the external provider.
    pub fn external(name: &str, default_schema: &str) -> Self {
        Self::new(
            name.to_owned(),
            None,
            None,
            true,
            None,
            default_schema.to_owned(),
        )
    }

    /// Check the authentication-mode rules and return the selected mode.
    pub fn validate(&self) -> Result<AuthMode> {
        let name = securable::principal_name(&self.name, EntityKind::User)?;
        let fail = |rule: &str| Err(Error::validation(EntityKind::User, name.clone(), rule));

        if self.default_schema.trim().is_empty() {
            return fail("default schema is required");
        }
        securable::principal_name(&self.default_schema, EntityKind::User)?;
        let login = present(&self.login_name);
        let password = present(&self.password);
        let sid = present(&self.sid);

        if let Some(login) = login {
            securable::principal_name(login, EntityKind::Login)?;
        }
        if let Some(sid) = sid {
            securable::sid(sid, EntityKind::User, &name)?;
        }

        let mode = match (login.is_some(), self.external) {
            (true, true) => return fail("login-mapped users cannot be external"),
            (true, false) => AuthMode::LoginMapped,
            (false, true) => AuthMode::External,
            (false, false) => AuthMode::Contained,
        };
        match mode {
            AuthMode::LoginMapped if password.is_some() => {
                fail("login-mapped users cannot have a password")
            }
            AuthMode::External if password.is_some() => {
                fail("external users cannot have a password")
            }
            AuthMode::External if sid.is_some() => fail("external users cannot have a SID"),
            AuthMode::Contained if password.is_none() => {
                fail("contained users require a password")
            }
            _ => Ok(mode),
        }
    }
}

/// Input for altering a database user. Only the password and the default
/// schema can change; anything else requires replacing the user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct UpdateUser {
    /// User name.
    pub name: String,
    /// New password.
    pub password: Option<String>,
    /// New default schema.
    pub default_schema: Option<String>,
}

impl UpdateUser {
    /// Check the input. Returns false if there is nothing to change.
    pub fn validate(&self) -> Result<bool> {
        let name = securable::principal_name(&self.name, EntityKind::User)?;
        if let Some(schema) = &self.default_schema {
            if schema.trim().is_empty() {
                return Err(Error::validation(
                    EntityKind::User,
                    name,
                    "default schema must not be empty",
                ));
            }
            securable::principal_name(schema, EntityKind::User)?;
        }
        Ok(present(&self.password).is_some() || self.default_schema.is_some())
    }
}

pub(crate) fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn rule_of(err: Error) -> String {
        match err {
            Error::Validation { rule, name, .. } => format!("{name}: {rule}"),
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn each_single_mode_validates() {
        assert_eq!(
            CreateUser::contained("alice", "P@ss1", "dbo").validate().unwrap(),
            AuthMode::Contained
        );
        assert_eq!(
            CreateUser::for_login("bob", "bob_login", "dbo")
                .validate()
                .unwrap(),
            AuthMode::LoginMapped
        );
        assert_eq!(
            CreateUser::external("carol@corp", "dbo").validate().unwrap(),
            AuthMode::External
        );
    }

    #[test]
    fn conflicting_modes_name_rule_and_user() {
        let mut u = CreateUser::for_login("bob", "bob_login", "dbo");
        u.password = Some("pw".to_owned());
        assert_eq!(
            rule_of(u.validate().unwrap_err()),
            "bob: login-mapped users cannot have a password"
        );

        let mut u = CreateUser::external("carol", "dbo");
        u.sid = Some("0x01".to_owned());
        assert_eq!(
            rule_of(u.validate().unwrap_err()),
            "carol: external users cannot have a SID"
        );

        let mut u = CreateUser::external("carol", "dbo");
        u.login_name = Some("carol_login".to_owned());
        assert_eq!(
            rule_of(u.validate().unwrap_err()),
            "carol: login-mapped users cannot be external"
        );
    }

    #[test]
    fn missing_schema_and_password_are_rejected() {
        let u = CreateUser::contained("alice", "pw", " ");
        assert_eq!(
            rule_of(u.validate().unwrap_err()),
            "alice: default schema is required"
        );

        let mut u = CreateUser::contained("alice", "pw", "dbo");
        u.password = None;
        assert_eq!(
            rule_of(u.validate().unwrap_err()),
            "alice: contained users require a password"
        );
    }

    #[test]
    fn bad_sid_is_a_validation_error() {
        let mut u = CreateUser::contained("alice", "pw", "dbo");
        u.sid = Some("not-hex".to_owned());
        assert_eq!(u.validate().unwrap_err().kind(), ErrorKind::Validation);
    }

    #[test]
    fn update_reports_whether_anything_changes() {
        assert!(!UpdateUser::new("alice".to_owned(), None, None)
            .validate()
            .unwrap());
        assert!(
            UpdateUser::new("alice".to_owned(), None, Some("sales".to_owned()))
                .validate()
                .unwrap()
        );
        assert!(
            UpdateUser::new("alice".to_owned(), None, Some(String::new()))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn mode_follows_fields() {
        let mut u = User {
            name: "alice".to_owned(),
            default_schema: "dbo".to_owned(),
            ..Default::default()
        };
        assert_eq!(u.mode(), AuthMode::Contained);
        u.login_name = "alice_login".to_owned();
        assert_eq!(u.mode(), AuthMode::LoginMapped);
        u.external = true;
        assert_eq!(u.mode(), AuthMode::External);
    }
}
