//! The operation contract consumed by the declarative layer.

use async_trait::async_trait;

use crate::context::CallContext;
use crate::error::Result;
use crate::model::{
    CreateLogin, CreateUser, Database, DatabaseOptions, GrantPermission, Login, Role,
    RoleMembership, ScopedConfiguration, UpdateLogin, UpdateUser, User,
};
use crate::script::ScriptOutcome;

/// The trait every engine is expected to implement.
///
/// Each operation is one round trip, or a short bounded sequence of them
/// for read-after-write. Mutations return a fresh read of the entity, never
/// an echo of the input. Absent entities are reported as
/// [`Error::NotFound`](crate::Error::NotFound) by reads; deletes of absent
/// principals succeed.
#[async_trait]
pub trait PrincipalEngine: Send + Sync {
    /// `host:port` of the server, the first component of every identifier.
    fn server_id(&self) -> &str;

    /// Read a database user.
    async fn get_user(&self, ctx: &CallContext, database: &str, name: &str) -> Result<User>;
    /// Create a database user, then read it back.
    async fn create_user(&self, ctx: &CallContext, database: &str, user: &CreateUser)
        -> Result<User>;
    /// Change a user's password and/or default schema, then read it back.
    async fn update_user(&self, ctx: &CallContext, database: &str, user: &UpdateUser)
        -> Result<User>;
    /// Drop a user if it exists.
    async fn delete_user(&self, ctx: &CallContext, database: &str, name: &str) -> Result<()>;

    /// Read a server login.
    async fn get_login(&self, ctx: &CallContext, name: &str) -> Result<Login>;
    /// Create a login, then read it back.
    async fn create_login(&self, ctx: &CallContext, login: &CreateLogin) -> Result<Login>;
    /// Alter a login, then read it back.
    async fn update_login(&self, ctx: &CallContext, login: &UpdateLogin) -> Result<Login>;
    /// Drop a login if it exists.
    async fn delete_login(&self, ctx: &CallContext, name: &str) -> Result<()>;

    /// Read a database role.
    async fn get_role(&self, ctx: &CallContext, database: &str, name: &str) -> Result<Role>;
    /// Create a role, then read it back.
    async fn create_role(&self, ctx: &CallContext, database: &str, role: &Role) -> Result<Role>;
    /// Rename `current_name` to `role.name` if they differ, then read it back.
    async fn update_role(
        &self,
        ctx: &CallContext,
        database: &str,
        current_name: &str,
        role: &Role,
    ) -> Result<Role>;
    /// Drop a role if it exists.
    async fn delete_role(&self, ctx: &CallContext, database: &str, name: &str) -> Result<()>;

    /// Decode a membership identifier and check the membership still holds.
    async fn read_role_membership(
        &self,
        ctx: &CallContext,
        database: &str,
        id: &str,
    ) -> Result<RoleMembership>;
    /// Add `member` to `role`, then read the membership back.
    async fn assign_role(
        &self,
        ctx: &CallContext,
        database: &str,
        role: &str,
        member: &str,
    ) -> Result<RoleMembership>;
    /// Remove `member` from `role`.
    async fn unassign_role(
        &self,
        ctx: &CallContext,
        database: &str,
        role: &str,
        member: &str,
    ) -> Result<()>;

    /// Read a permission. The requested object type is echoed back.
    async fn read_permission(
        &self,
        ctx: &CallContext,
        permission: &GrantPermission,
    ) -> Result<GrantPermission>;
    /// Grant a permission, then read it back.
    async fn grant_permission(
        &self,
        ctx: &CallContext,
        permission: &GrantPermission,
    ) -> Result<GrantPermission>;
    /// Revoke a permission. Whether revoking an absent grant fails is up to
    /// the database engine.
    async fn revoke_permission(&self, ctx: &CallContext, permission: &GrantPermission)
        -> Result<()>;
    /// Every database, schema and object permission granted to `principal`.
    async fn list_permissions(
        &self,
        ctx: &CallContext,
        database: &str,
        principal: &str,
    ) -> Result<Vec<GrantPermission>>;

    /// Read a database by name.
    async fn get_database(&self, ctx: &CallContext, name: &str) -> Result<Database>;
    /// Read a database by `database_id`.
    async fn get_database_by_id(&self, ctx: &CallContext, id: i64) -> Result<Database>;
    /// Create a database, then read it back.
    async fn create_database(&self, ctx: &CallContext, name: &str) -> Result<Database>;
    /// Drop a database if it exists.
    async fn delete_database(&self, ctx: &CallContext, name: &str) -> Result<()>;
    /// Read the engine options of a database.
    async fn get_database_options(&self, ctx: &CallContext, name: &str)
        -> Result<DatabaseOptions>;
    /// Apply every option set in `options`, then read all options back.
    async fn set_database_options(
        &self,
        ctx: &CallContext,
        name: &str,
        options: &DatabaseOptions,
    ) -> Result<DatabaseOptions>;
    /// Read one scoped configuration key.
    async fn get_scoped_configuration(
        &self,
        ctx: &CallContext,
        database: &str,
        key: &str,
    ) -> Result<ScopedConfiguration>;
    /// Set a scoped configuration key, and its secondary value if given.
    async fn set_scoped_configuration(
        &self,
        ctx: &CallContext,
        database: &str,
        key: &str,
        value: &str,
        value_for_secondary: Option<&str>,
    ) -> Result<ScopedConfiguration>;
    /// Reset a scoped configuration key to its engine default.
    async fn clear_scoped_configuration(
        &self,
        ctx: &CallContext,
        database: &str,
        key: &str,
    ) -> Result<ScopedConfiguration>;

    /// Split `sql` into batches and run them in order, stopping at the first
    /// failing batch.
    async fn exec_script(&self, ctx: &CallContext, database: &str, sql: &str)
        -> Result<ScriptOutcome>;
}
