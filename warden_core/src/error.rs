//! Error taxonomy shared by every engine.
//!
//! Callers branch on [`Error::kind`] rather than on message text. Every
//! variant carries the entity it concerned and the [`Scope`] it targeted.

use std::fmt::Display;

use thiserror::Error as ThisError;

/// Alias used throughout the engine.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The kind of entity an operation concerned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A database user.
    User,
    /// A server login.
    Login,
    /// A database role.
    Role,
    /// A role/member relationship.
    RoleMembership,
    /// A granted permission.
    Permission,
    /// A database catalog entry.
    Database,
    /// The engine option bag of a database.
    DatabaseOptions,
    /// A database scoped configuration key.
    ScopedConfiguration,
    /// An administrative script.
    Script,
    /// A pooled connection.
    Connection,
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityKind::User => "user",
            EntityKind::Login => "login",
            EntityKind::Role => "role",
            EntityKind::RoleMembership => "role membership",
            EntityKind::Permission => "permission",
            EntityKind::Database => "database",
            EntityKind::DatabaseOptions => "database options",
            EntityKind::ScopedConfiguration => "scoped configuration",
            EntityKind::Script => "script",
            EntityKind::Connection => "connection",
        };
        write!(f, "{name}")
    }
}

/// Server and (optionally) database an operation was aimed at.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Scope {
    /// `host:port` of the server. Empty until the engine fills it in.
    pub server: String,
    /// Database name, absent for server-scoped operations.
    pub database: Option<String>,
}

impl Scope {
    /// Scope of a server-level operation.
    pub fn server<S: Into<String>>(server: S) -> Self {
        Self {
            server: server.into(),
            database: None,
        }
    }

    /// Scope of a database-level operation.
    pub fn database<S: Into<String>, D: Into<String>>(server: S, database: D) -> Self {
        Self {
            server: server.into(),
            database: Some(database.into()),
        }
    }

    fn is_unset(&self) -> bool {
        self.server.is_empty() && self.database.is_none()
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let server = if self.server.is_empty() {
            "<unknown server>"
        } else {
            &self.server
        };
        match &self.database {
            Some(db) => write!(f, "server {server}, database {db}"),
            None => write!(f, "server {server}"),
        }
    }
}

/// Discriminant of [`Error`] for callers that only care about the class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input caught before any SQL was built.
    Validation,
    /// The entity is absent.
    NotFound,
    /// The server or a pooled connection could not be reached.
    Connectivity,
    /// The database engine refused the statement.
    EngineRejected,
    /// The caller cancelled the operation or its deadline passed.
    Cancelled,
}

/// Every failure the engine reports.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Input failed validation. Never retried.
    #[error("invalid {entity} `{name}` ({scope}): {rule}")]
    Validation {
        /// Entity being validated.
        entity: EntityKind,
        /// Offending name as supplied.
        name: String,
        /// The rule that was violated.
        rule: String,
        /// Target of the operation.
        scope: Scope,
    },
    /// The entity does not exist, or its identifier could not be parsed.
    #[error("{entity} `{name}` not found ({scope})")]
    NotFound {
        /// Entity that was looked up.
        entity: EntityKind,
        /// Name or identifier that was looked up.
        name: String,
        /// Target of the operation.
        scope: Scope,
    },
    /// Pool creation, probe or connection checkout failed.
    #[error("cannot reach {scope}: {reason}")]
    Connectivity {
        /// Target of the operation.
        scope: Scope,
        /// Driver-reported reason.
        reason: String,
    },
    /// The database engine returned an error for the statement.
    #[error("{operation} {entity} `{name}` rejected ({scope}): {message}")]
    EngineRejected {
        /// Operation that was attempted, e.g. `create`.
        operation: &'static str,
        /// Entity the operation concerned.
        entity: EntityKind,
        /// Name of the entity.
        name: String,
        /// Target of the operation.
        scope: Scope,
        /// Message reported by the engine, verbatim.
        message: String,
        /// Engine error number, when the engine reported one.
        code: Option<u32>,
    },
    /// Cancellation was observed before the operation completed.
    #[error("{operation} cancelled ({scope})")]
    Cancelled {
        /// Operation that was interrupted.
        operation: &'static str,
        /// Target of the operation.
        scope: Scope,
    },
}

impl Error {
    /// Build a validation error with an unset scope.
    pub fn validation<N: Into<String>, R: Into<String>>(
        entity: EntityKind,
        name: N,
        rule: R,
    ) -> Self {
        Error::Validation {
            entity,
            name: name.into(),
            rule: rule.into(),
            scope: Scope::default(),
        }
    }

    /// Build a not-found error.
    pub fn not_found<N: Into<String>>(entity: EntityKind, name: N, scope: Scope) -> Self {
        Error::NotFound {
            entity,
            name: name.into(),
            scope,
        }
    }

    /// Build a connectivity error.
    pub fn connectivity<R: Display>(scope: Scope, reason: R) -> Self {
        Error::Connectivity {
            scope,
            reason: reason.to_string(),
        }
    }

    /// Build an engine-rejected error without an engine error number.
    pub fn rejected<N: Into<String>, M: Into<String>>(
        operation: &'static str,
        entity: EntityKind,
        name: N,
        scope: Scope,
        message: M,
    ) -> Self {
        Error::EngineRejected {
            operation,
            entity,
            name: name.into(),
            scope,
            message: message.into(),
            code: None,
        }
    }

    /// Build a cancellation error with an unset scope.
    pub fn cancelled(operation: &'static str) -> Self {
        Error::Cancelled {
            operation,
            scope: Scope::default(),
        }
    }

    /// The class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation { .. } => ErrorKind::Validation,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Connectivity { .. } => ErrorKind::Connectivity,
            Error::EngineRejected { .. } => ErrorKind::EngineRejected,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// True if the entity is absent. Reconciliation treats this as a
    /// signal rather than a failure.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// The scope this error carries.
    pub fn scope(&self) -> &Scope {
        match self {
            Error::Validation { scope, .. }
            | Error::NotFound { scope, .. }
            | Error::Connectivity { scope, .. }
            | Error::EngineRejected { scope, .. }
            | Error::Cancelled { scope, .. } => scope,
        }
    }

    /// Fill in the scope if the error was raised before one was known.
    pub fn in_scope(mut self, target: &Scope) -> Self {
        let scope = match &mut self {
            Error::Validation { scope, .. }
            | Error::NotFound { scope, .. }
            | Error::Connectivity { scope, .. }
            | Error::EngineRejected { scope, .. }
            | Error::Cancelled { scope, .. } => scope,
        };
        if scope.is_unset() {
            *scope = target.clone();
        }
        self
    }
}
