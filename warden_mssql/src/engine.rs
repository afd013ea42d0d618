//! [`PrincipalEngine`] over tiberius.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use tiberius::{Query, Row};
use tracing::{debug, info};
use warden_core::config::{self, ServerConfig};
use warden_core::id::{CompositeId, RoleMembershipId};
use warden_core::model::{
    scoped_configuration_default, CreateLogin, CreateUser, Database, DatabaseOptions,
    GrantPermission, Login, RecoveryModel, Role, RoleMembership, ScopedConfiguration,
    UpdateLogin, UpdateUser, User,
};
use warden_core::script::{split_batches, ScriptOutcome};
use warden_core::{log_runtime, securable};
use warden_core::{CallContext, EntityKind, Error, PrincipalEngine, Result, Scope};

use crate::batch;
use crate::connection::{MssqlPool, TiberiusFactory};
use crate::decode::{self, Target};
use crate::pool::PoolCache;
use crate::sql::{databases, logins, permissions, roles, users};
use crate::statement::{Param, Statement};

/// Principal and permission management for one SQL Server.
pub struct MssqlEngine {
    server_id: String,
    pools: PoolCache<TiberiusFactory>,
}

impl MssqlEngine {
    /// Validate `config`, then open and probe the default database's pool.
    pub async fn connect(config: ServerConfig) -> Result<Self> {
        let server_id = config.server_id();
        config.validate().map_err(|e| {
            Error::validation(EntityKind::Connection, server_id.as_str(), e.to_string())
                .in_scope(&Scope::server(server_id.as_str()))
        })?;
        let default_database = config.default_database.clone();
        let pools = PoolCache::connect(TiberiusFactory::new(config), &default_database)
            .await
            .map_err(|e| e.in_scope(&Scope::database(server_id.as_str(), default_database.as_str())))?;
        info!("connected to {server_id}");
        Ok(Self { server_id, pools })
    }

    /// Connect to the server named `server` in the YAML file at `path`.
    pub async fn from_config_file<P: AsRef<Path>>(path: P, server: &str) -> anyhow::Result<Self> {
        let mut servers = config::read_from_file(path)?;
        let config = servers
            .remove(server)
            .with_context(|| format!("no server named {server} in the server config"))?;
        Self::connect(config)
            .await
            .with_context(|| format!("connecting to {server}"))
    }

    /// Number of non-default database pools opened so far.
    pub fn cached_pools(&self) -> usize {
        self.pools.cached()
    }

    fn target<'a>(
        &self,
        operation: &'static str,
        entity: EntityKind,
        name: &'a str,
        database: Option<&str>,
    ) -> Target<'a> {
        let scope = match database {
            Some(database) => Scope::database(self.server_id.as_str(), database),
            None => Scope::server(self.server_id.as_str()),
        };
        Target::new(operation, entity, name, scope)
    }

    async fn pool(&self, ctx: &CallContext, database: &str, target: &Target<'_>) -> Result<MssqlPool> {
        ctx.run(target.operation, self.pools.get(database))
            .await
            .map_err(|e| e.in_scope(&target.scope))
    }

    /// Run `stmt` and return its first result set. Server-scoped targets
    /// run on the default database.
    async fn query(
        &self,
        ctx: &CallContext,
        target: &Target<'_>,
        stmt: &Statement,
    ) -> Result<Vec<Row>> {
        let database = target.scope.database.as_deref().unwrap_or_default();
        let pool = self.pool(ctx, database, target).await?;
        log_runtime!(
            format!("{} {} {}", target.operation, target.entity, target.name),
            ctx.run(target.operation, async {
                let mut conn = pool
                    .get()
                    .await
                    .map_err(|e| Error::connectivity(target.scope.clone(), e))?;
                let rows = bind(stmt)
                    .query(&mut *conn)
                    .await
                    .map_err(|e| target.error(e))?
                    .into_first_result()
                    .await
                    .map_err(|e| target.error(e))?;
                Ok(rows)
            })
            .await
        )
        .map_err(|e| e.in_scope(&target.scope))
    }

    async fn execute(&self, ctx: &CallContext, target: &Target<'_>, stmt: &Statement) -> Result<()> {
        let database = target.scope.database.as_deref().unwrap_or_default();
        let pool = self.pool(ctx, database, target).await?;
        log_runtime!(
            format!("{} {} {}", target.operation, target.entity, target.name),
            ctx.run(target.operation, async {
                let mut conn = pool
                    .get()
                    .await
                    .map_err(|e| Error::connectivity(target.scope.clone(), e))?;
                bind(stmt)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| target.error(e))?;
                Ok(())
            })
            .await
        )
        .map_err(|e| e.in_scope(&target.scope))
    }

    async fn execute_all(
        &self,
        ctx: &CallContext,
        target: &Target<'_>,
        statements: &[Statement],
    ) -> Result<()> {
        for stmt in statements {
            self.execute(ctx, target, stmt).await?;
        }
        Ok(())
    }

    async fn first_row(
        &self,
        ctx: &CallContext,
        target: &Target<'_>,
        stmt: &Statement,
    ) -> Result<Row> {
        self.query(ctx, target, stmt)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| target.not_found())
    }
}

fn bind(stmt: &Statement) -> Query<'_> {
    let sql = stmt.render();
    debug!("{sql}");
    let mut query = Query::new(sql);
    for param in stmt.params() {
        match param {
            Param::Text(value) => query.bind(value.as_str()),
            Param::Int(value) => query.bind(*value),
        }
    }
    query
}

fn decode_user(row: &Row) -> std::result::Result<User, tiberius::error::Error> {
    let principal_type = decode::text(row, 2)?;
    Ok(User {
        principal_id: decode::int(row, 0)?,
        name: decode::text(row, 1)?,
        sid: decode::text(row, 3)?,
        default_schema: decode::text(row, 4)?,
        login_name: decode::text(row, 5)?,
        external: matches!(principal_type.trim(), "E" | "X"),
        roles: vec![],
    })
}

fn decode_login(row: &Row) -> std::result::Result<Login, tiberius::error::Error> {
    Ok(Login {
        principal_id: decode::int(row, 0)?,
        name: decode::text(row, 1)?,
        sid: decode::text(row, 2)?,
        default_database: decode::text(row, 3)?,
        default_language: decode::text(row, 4)?,
        disabled: decode::flag(row, 5)?.unwrap_or_default(),
    })
}

fn decode_options(row: &Row) -> std::result::Result<DatabaseOptions, tiberius::error::Error> {
    let collation = decode::text(row, 0)?;
    Ok(DatabaseOptions {
        collation: Some(collation).filter(|c| !c.is_empty()),
        compatibility_level: decode::int32(row, 1)?,
        recovery_model: decode::optional_text(row, 2)?
            .and_then(|r| RecoveryModel::try_from(r.as_str()).ok()),
        allow_snapshot_isolation: decode::flag(row, 3)?,
        read_committed_snapshot: decode::flag(row, 4)?,
        auto_close: decode::flag(row, 5)?,
        auto_shrink: decode::flag(row, 6)?,
        auto_create_statistics: decode::flag(row, 7)?,
        auto_update_statistics: decode::flag(row, 8)?,
        auto_update_statistics_async: decode::flag(row, 9)?,
    })
}

#[async_trait]
impl PrincipalEngine for MssqlEngine {
    fn server_id(&self) -> &str {
        &self.server_id
    }

    async fn get_user(&self, ctx: &CallContext, database: &str, name: &str) -> Result<User> {
        let target = self.target("get", EntityKind::User, name, Some(database));
        let row = self.first_row(ctx, &target, &users::select_user(name)).await?;
        let mut user = decode_user(&row).map_err(|e| target.error(e))?;
        user.roles = self
            .query(ctx, &target, &users::select_user_roles(name))
            .await?
            .iter()
            .map(|r| decode::text(r, 0))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| target.error(e))?;
        Ok(user)
    }

    async fn create_user(
        &self,
        ctx: &CallContext,
        database: &str,
        user: &CreateUser,
    ) -> Result<User> {
        let name = user.name.trim();
        let target = self.target("create", EntityKind::User, name, Some(database));
        let stmt = users::create_user(user).map_err(|e| e.in_scope(&target.scope))?;
        self.execute(ctx, &target, &stmt).await?;
        self.get_user(ctx, database, name).await
    }

    async fn update_user(
        &self,
        ctx: &CallContext,
        database: &str,
        user: &UpdateUser,
    ) -> Result<User> {
        let name = user.name.trim();
        let target = self.target("update", EntityKind::User, name, Some(database));
        if let Some(stmt) = users::update_user(user).map_err(|e| e.in_scope(&target.scope))? {
            self.execute(ctx, &target, &stmt).await?;
        }
        self.get_user(ctx, database, name).await
    }

    async fn delete_user(&self, ctx: &CallContext, database: &str, name: &str) -> Result<()> {
        let target = self.target("delete", EntityKind::User, name, Some(database));
        let stmt = users::drop_user(name).map_err(|e| e.in_scope(&target.scope))?;
        self.execute(ctx, &target, &stmt).await
    }

    async fn get_login(&self, ctx: &CallContext, name: &str) -> Result<Login> {
        let target = self.target("get", EntityKind::Login, name, None);
        let row = self.first_row(ctx, &target, &logins::select_login(name)).await?;
        decode_login(&row).map_err(|e| target.error(e))
    }

    async fn create_login(&self, ctx: &CallContext, login: &CreateLogin) -> Result<Login> {
        let name = login.name.trim();
        let target = self.target("create", EntityKind::Login, name, None);
        let statements = logins::create_login(login).map_err(|e| e.in_scope(&target.scope))?;
        self.execute_all(ctx, &target, &statements).await?;
        self.get_login(ctx, name).await
    }

    async fn update_login(&self, ctx: &CallContext, login: &UpdateLogin) -> Result<Login> {
        let name = login.name.trim();
        let target = self.target("update", EntityKind::Login, name, None);
        let statements = logins::update_login(login).map_err(|e| e.in_scope(&target.scope))?;
        self.execute_all(ctx, &target, &statements).await?;
        self.get_login(ctx, name).await
    }

    async fn delete_login(&self, ctx: &CallContext, name: &str) -> Result<()> {
        let target = self.target("delete", EntityKind::Login, name, None);
        let stmt = logins::drop_login(name).map_err(|e| e.in_scope(&target.scope))?;
        self.execute(ctx, &target, &stmt).await
    }

    async fn get_role(&self, ctx: &CallContext, database: &str, name: &str) -> Result<Role> {
        let target = self.target("get", EntityKind::Role, name, Some(database));
        let row = self.first_row(ctx, &target, &roles::select_role(name)).await?;
        Ok(Role {
            principal_id: decode::int(&row, 0).map_err(|e| target.error(e))?,
            name: decode::text(&row, 1).map_err(|e| target.error(e))?,
        })
    }

    async fn create_role(&self, ctx: &CallContext, database: &str, role: &Role) -> Result<Role> {
        let name = role.name.trim();
        let target = self.target("create", EntityKind::Role, name, Some(database));
        let stmt = roles::create_role(name).map_err(|e| e.in_scope(&target.scope))?;
        self.execute(ctx, &target, &stmt).await?;
        self.get_role(ctx, database, name).await
    }

    async fn update_role(
        &self,
        ctx: &CallContext,
        database: &str,
        current_name: &str,
        role: &Role,
    ) -> Result<Role> {
        let current = current_name.trim();
        let name = role.name.trim();
        if current != name {
            let target = self.target("rename", EntityKind::Role, current, Some(database));
            let stmt = roles::rename_role(current, name).map_err(|e| e.in_scope(&target.scope))?;
            self.execute(ctx, &target, &stmt).await?;
        }
        self.get_role(ctx, database, name).await
    }

    async fn delete_role(&self, ctx: &CallContext, database: &str, name: &str) -> Result<()> {
        let target = self.target("delete", EntityKind::Role, name, Some(database));
        let stmt = roles::drop_role(name).map_err(|e| e.in_scope(&target.scope))?;
        self.execute(ctx, &target, &stmt).await
    }

    async fn read_role_membership(
        &self,
        ctx: &CallContext,
        database: &str,
        id: &str,
    ) -> Result<RoleMembership> {
        let target = self.target("read", EntityKind::RoleMembership, id, Some(database));
        let parsed = RoleMembershipId::parse(id).map_err(|e| e.in_scope(&target.scope))?;
        if parsed.database != database {
            return Err(target.not_found());
        }
        self.first_row(
            ctx,
            &target,
            &roles::select_membership(&parsed.role, &parsed.member),
        )
        .await?;
        Ok(RoleMembership {
            id: RoleMembershipId::new(&self.server_id, database, &parsed.role, &parsed.member)
                .encode(),
            database: database.to_owned(),
            role: parsed.role,
            member: parsed.member,
        })
    }

    async fn assign_role(
        &self,
        ctx: &CallContext,
        database: &str,
        role: &str,
        member: &str,
    ) -> Result<RoleMembership> {
        let (role, member) = (role.trim(), member.trim());
        let id = RoleMembershipId::new(&self.server_id, database, role, member).encode();
        let target = self.target("assign", EntityKind::RoleMembership, &id, Some(database));
        let stmt =
            roles::alter_membership(role, member, true).map_err(|e| e.in_scope(&target.scope))?;
        self.execute(ctx, &target, &stmt).await?;
        self.read_role_membership(ctx, database, &id).await
    }

    async fn unassign_role(
        &self,
        ctx: &CallContext,
        database: &str,
        role: &str,
        member: &str,
    ) -> Result<()> {
        let (role, member) = (role.trim(), member.trim());
        let id = RoleMembershipId::new(&self.server_id, database, role, member).encode();
        let target = self.target("unassign", EntityKind::RoleMembership, &id, Some(database));
        let stmt =
            roles::alter_membership(role, member, false).map_err(|e| e.in_scope(&target.scope))?;
        self.execute(ctx, &target, &stmt).await
    }

    async fn read_permission(
        &self,
        ctx: &CallContext,
        permission: &GrantPermission,
    ) -> Result<GrantPermission> {
        let target = self.target(
            "read",
            EntityKind::Permission,
            &permission.principal,
            Some(&permission.database),
        );
        let stmt = permission
            .validate()
            .and_then(|valid| permissions::select_permission(&valid))
            .map_err(|e| e.in_scope(&target.scope))?;
        self.first_row(ctx, &target, &stmt).await?;
        permission.normalized()
    }

    async fn grant_permission(
        &self,
        ctx: &CallContext,
        permission: &GrantPermission,
    ) -> Result<GrantPermission> {
        let target = self.target(
            "grant",
            EntityKind::Permission,
            &permission.principal,
            Some(&permission.database),
        );
        let (grant, read) = permission
            .validate()
            .and_then(|valid| permissions::grant_and_read(&valid))
            .map_err(|e| e.in_scope(&target.scope))?;
        self.execute(ctx, &target, &grant).await?;
        let read_target = Target::new("read", target.entity, target.name, target.scope.clone());
        self.first_row(ctx, &read_target, &read).await?;
        permission.normalized()
    }

    async fn revoke_permission(
        &self,
        ctx: &CallContext,
        permission: &GrantPermission,
    ) -> Result<()> {
        let target = self.target(
            "revoke",
            EntityKind::Permission,
            &permission.principal,
            Some(&permission.database),
        );
        let valid = permission
            .validate()
            .map_err(|e| e.in_scope(&target.scope))?;
        self.execute(ctx, &target, &permissions::revoke(&valid)).await
    }

    async fn list_permissions(
        &self,
        ctx: &CallContext,
        database: &str,
        principal: &str,
    ) -> Result<Vec<GrantPermission>> {
        let target = self.target("list", EntityKind::Permission, principal, Some(database));
        let rows = self
            .query(ctx, &target, &permissions::select_principal_permissions(principal))
            .await?;
        rows.iter()
            .map(|row| decode_permission(row, database, principal))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| target.error(e))
    }

    async fn get_database(&self, ctx: &CallContext, name: &str) -> Result<Database> {
        let target = self.target("get", EntityKind::Database, name, None);
        let row = self
            .first_row(ctx, &target, &databases::select_database(name))
            .await?;
        decode_database(&row).map_err(|e| target.error(e))
    }

    async fn get_database_by_id(&self, ctx: &CallContext, id: i64) -> Result<Database> {
        let name = id.to_string();
        let target = self.target("get", EntityKind::Database, &name, None);
        let row = self
            .first_row(ctx, &target, &databases::select_database_by_id(id))
            .await?;
        decode_database(&row).map_err(|e| target.error(e))
    }

    async fn create_database(&self, ctx: &CallContext, name: &str) -> Result<Database> {
        let name = name.trim();
        let target = self.target("create", EntityKind::Database, name, None);
        let stmt = databases::create_database(name).map_err(|e| e.in_scope(&target.scope))?;
        self.execute(ctx, &target, &stmt).await?;
        self.get_database(ctx, name).await
    }

    async fn delete_database(&self, ctx: &CallContext, name: &str) -> Result<()> {
        let target = self.target("delete", EntityKind::Database, name, None);
        let stmt = databases::drop_database(name).map_err(|e| e.in_scope(&target.scope))?;
        self.execute(ctx, &target, &stmt).await
    }

    async fn get_database_options(
        &self,
        ctx: &CallContext,
        name: &str,
    ) -> Result<DatabaseOptions> {
        let target = self.target("get", EntityKind::DatabaseOptions, name, None);
        let row = self
            .first_row(ctx, &target, &databases::select_options(name))
            .await?;
        decode_options(&row).map_err(|e| target.error(e))
    }

    async fn set_database_options(
        &self,
        ctx: &CallContext,
        name: &str,
        options: &DatabaseOptions,
    ) -> Result<DatabaseOptions> {
        let target = self.target("set", EntityKind::DatabaseOptions, name, None);
        let statements =
            databases::set_options(name, options).map_err(|e| e.in_scope(&target.scope))?;
        self.execute_all(ctx, &target, &statements).await?;
        self.get_database_options(ctx, name).await
    }

    async fn get_scoped_configuration(
        &self,
        ctx: &CallContext,
        database: &str,
        key: &str,
    ) -> Result<ScopedConfiguration> {
        let target = self.target("get", EntityKind::ScopedConfiguration, key, Some(database));
        let key = securable::token(key, EntityKind::ScopedConfiguration, "key")
            .map_err(|e| e.in_scope(&target.scope))?;
        let row = self
            .first_row(ctx, &target, &databases::select_scoped_configuration(key))
            .await?;
        decode_scoped_configuration(&row).map_err(|e| target.error(e))
    }

    async fn set_scoped_configuration(
        &self,
        ctx: &CallContext,
        database: &str,
        key: &str,
        value: &str,
        value_for_secondary: Option<&str>,
    ) -> Result<ScopedConfiguration> {
        let target = self.target("set", EntityKind::ScopedConfiguration, key, Some(database));
        let statements = databases::set_scoped_configuration(key, value, value_for_secondary)
            .map_err(|e| e.in_scope(&target.scope))?;
        self.execute_all(ctx, &target, &statements).await?;
        self.get_scoped_configuration(ctx, database, key).await
    }

    async fn clear_scoped_configuration(
        &self,
        ctx: &CallContext,
        database: &str,
        key: &str,
    ) -> Result<ScopedConfiguration> {
        let default = scoped_configuration_default(key).ok_or_else(|| {
            Error::validation(
                EntityKind::ScopedConfiguration,
                key,
                "no known engine default for this key",
            )
            .in_scope(&Scope::database(self.server_id.as_str(), database))
        })?;
        self.set_scoped_configuration(ctx, database, key, default, Some("PRIMARY"))
            .await
    }

    async fn exec_script(
        &self,
        ctx: &CallContext,
        database: &str,
        sql: &str,
    ) -> Result<ScriptOutcome> {
        let database = match database.trim() {
            "" => self.pools.default_database(),
            name => name,
        };
        let script = self.target("exec", EntityKind::Script, "script", Some(database));
        let database = securable::principal_name(database, EntityKind::Database)
            .map_err(|e| e.in_scope(&script.scope))?;
        let batches = split_batches(sql);
        let pool = self.pool(ctx, &database, &script).await?;
        let scope = &script.scope;
        let mut conn = ctx
            .run("exec script", async {
                pool.get()
                    .await
                    .map_err(|e| Error::connectivity(scope.clone(), e))
            })
            .await
            .map_err(|e| e.in_scope(scope))?;
        let outcome = batch::run_script(&mut *conn, ctx, scope, &database, &batches).await?;
        info!("ran {} batches on {scope}", outcome.batches);
        Ok(outcome)
    }
}

fn decode_database(row: &Row) -> std::result::Result<Database, tiberius::error::Error> {
    Ok(Database {
        id: decode::int(row, 0)?,
        name: decode::text(row, 1)?,
    })
}

fn decode_permission(
    row: &Row,
    database: &str,
    principal: &str,
) -> std::result::Result<GrantPermission, tiberius::error::Error> {
    let permission = decode::text(row, 0)?;
    let schema = decode::text(row, 2)?;
    let name = decode::text(row, 3)?;
    Ok(match decode::int32(row, 1)?.unwrap_or_default() {
        1 => GrantPermission::on_object(
            database,
            principal,
            &permission,
            "OBJECT",
            &format!("{schema}.{name}"),
        ),
        3 => GrantPermission::on_object(database, principal, &permission, "SCHEMA", &name),
        _ => GrantPermission::database_scope(database, principal, &permission),
    })
}

fn decode_scoped_configuration(
    row: &Row,
) -> std::result::Result<ScopedConfiguration, tiberius::error::Error> {
    Ok(ScopedConfiguration {
        name: decode::text(row, 0)?,
        value: decode::text(row, 1)?,
        value_for_secondary: decode::optional_text(row, 2)?,
    })
}
