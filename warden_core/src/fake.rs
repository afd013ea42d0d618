//! An in-memory engine for tests.
//!
//! [`InMemoryEngine`] implements [`PrincipalEngine`] against plain maps. It
//! applies the same validation and normalization as a live engine, and it
//! mirrors the engine behaviors callers depend on: duplicate principals
//! are rejected, deletes of absent principals succeed, revoking an absent
//! grant is a no-op, and object permissions are tracked by securable class
//! only.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::context::CallContext;
use crate::engine::PrincipalEngine;
use crate::error::{EntityKind, Error, Result, Scope};
use crate::id::{CompositeId, RoleMembershipId};
use crate::model::{
    scoped_configuration_default, AuthMode, CreateLogin, CreateUser, Database, DatabaseOptions,
    GrantPermission, Login, RecoveryModel, Role, RoleMembership, ScopedConfiguration,
    UpdateLogin, UpdateUser, User,
};
use crate::script::{split_batches, ScriptOutcome};
use crate::securable::{self, SecurableClass};

const SERVER_ID: &str = "inmemory:1433";
const DEFAULT_DATABASE: &str = "master";
const FIXED_ROLES: &[&str] = &[
    "public",
    "db_owner",
    "db_datareader",
    "db_datawriter",
    "db_ddladmin",
    "db_securityadmin",
];

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct GrantKey {
    principal: String,
    permission: String,
    class: String,
    schema: String,
    name: String,
}

#[derive(Debug)]
struct DatabaseState {
    database: Database,
    users: BTreeMap<String, User>,
    roles: BTreeMap<String, Role>,
    // (role, member)
    members: BTreeSet<(String, String)>,
    grants: BTreeSet<GrantKey>,
    options: DatabaseOptions,
    scoped: BTreeMap<String, ScopedConfiguration>,
}

impl DatabaseState {
    fn new(id: i64, name: &str, next_principal_id: &mut i64) -> Self {
        let mut roles = BTreeMap::new();
        for role in FIXED_ROLES {
            *next_principal_id += 1;
            roles.insert(
                role.to_string(),
                Role {
                    principal_id: *next_principal_id,
                    name: role.to_string(),
                },
            );
        }
        let mut users = BTreeMap::new();
        *next_principal_id += 1;
        users.insert(
            "dbo".to_owned(),
            User {
                principal_id: *next_principal_id,
                name: "dbo".to_owned(),
                sid: "0x01".to_owned(),
                default_schema: "dbo".to_owned(),
                login_name: "sa".to_owned(),
                external: false,
                roles: vec![],
            },
        );
        Self {
            database: Database {
                id,
                name: name.to_owned(),
            },
            users,
            roles,
            members: BTreeSet::from([("db_owner".to_owned(), "dbo".to_owned())]),
            grants: BTreeSet::new(),
            options: DatabaseOptions {
                collation: Some("SQL_Latin1_General_CP1_CI_AS".to_owned()),
                compatibility_level: Some(160),
                recovery_model: Some(RecoveryModel::Full),
                allow_snapshot_isolation: Some(false),
                read_committed_snapshot: Some(false),
                auto_close: Some(false),
                auto_shrink: Some(false),
                auto_create_statistics: Some(true),
                auto_update_statistics: Some(true),
                auto_update_statistics_async: Some(false),
            },
            scoped: BTreeMap::new(),
        }
    }

    fn principal_exists(&self, name: &str) -> bool {
        self.users.contains_key(name) || self.roles.contains_key(name)
    }

    fn user_with_roles(&self, name: &str) -> Option<User> {
        self.users.get(name).map(|u| User {
            roles: self
                .members
                .iter()
                .filter(|(_, member)| member == name)
                .map(|(role, _)| role.to_owned())
                .collect(),
            ..u.clone()
        })
    }
}

#[derive(Debug)]
struct State {
    next_principal_id: i64,
    next_database_id: i64,
    logins: BTreeMap<String, Login>,
    databases: BTreeMap<String, DatabaseState>,
    executed_batches: Vec<String>,
    failing_marker: Option<String>,
}

/// A [`PrincipalEngine`] backed by in-process maps.
#[derive(Debug)]
pub struct InMemoryEngine {
    state: Mutex<State>,
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEngine {
    /// An engine holding only the `master` database and the `sa` login.
    pub fn new() -> Self {
        let mut next_principal_id = 0;
        let master = DatabaseState::new(1, DEFAULT_DATABASE, &mut next_principal_id);
        next_principal_id += 1;
        let sa = Login {
            principal_id: next_principal_id,
            name: "sa".to_owned(),
            sid: "0x01".to_owned(),
            default_database: DEFAULT_DATABASE.to_owned(),
            default_language: "us_english".to_owned(),
            disabled: false,
        };
        Self {
            state: Mutex::new(State {
                next_principal_id,
                next_database_id: 1,
                logins: BTreeMap::from([("sa".to_owned(), sa)]),
                databases: BTreeMap::from([(DEFAULT_DATABASE.to_owned(), master)]),
                executed_batches: vec![],
                failing_marker: None,
            }),
        }
    }

    /// Every script batch that ran successfully, in order.
    pub fn executed_batches(&self) -> Vec<String> {
        self.state().executed_batches.clone()
    }

    /// Make script batches containing `marker` fail.
    pub fn fail_batches_containing(&self, marker: &str) {
        self.state().failing_marker = Some(marker.to_owned());
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn server_scope(&self) -> Scope {
        Scope::server(SERVER_ID)
    }

    fn db_scope(&self, database: &str) -> Scope {
        Scope::database(SERVER_ID, database)
    }
}

fn rejected(
    operation: &'static str,
    entity: EntityKind,
    name: &str,
    scope: &Scope,
    code: u32,
    message: String,
) -> Error {
    Error::EngineRejected {
        operation,
        entity,
        name: name.to_owned(),
        scope: scope.clone(),
        message,
        code: Some(code),
    }
}

fn find_db<'a>(state: &'a State, name: &str, scope: &Scope) -> Result<&'a DatabaseState> {
    state
        .databases
        .get(name)
        .ok_or_else(|| Error::not_found(EntityKind::Database, name, scope.clone()))
}

fn find_db_mut<'a>(
    state: &'a mut State,
    name: &str,
    scope: &Scope,
) -> Result<&'a mut DatabaseState> {
    state
        .databases
        .get_mut(name)
        .ok_or_else(|| Error::not_found(EntityKind::Database, name, scope.clone()))
}

fn grant_key(permission: &GrantPermission) -> Result<GrantKey> {
    let valid = permission.validate()?;
    let schema = match valid.securable.class {
        // Unqualified object names resolve against the default schema.
        SecurableClass::Object if valid.securable.schema.is_empty() => "dbo".to_owned(),
        _ => valid.securable.schema,
    };
    Ok(GrantKey {
        principal: valid.principal,
        permission: valid.permission,
        class: valid.securable.class.keyword().to_owned(),
        schema,
        name: valid.securable.name,
    })
}

fn sid_from_id(id: i64) -> String {
    format!("0x{:032X}", id)
}

impl InMemoryEngine {
    fn read_user(&self, database: &str, name: &str) -> Result<User> {
        let scope = self.db_scope(database);
        let state = self.state();
        find_db(&state, database, &scope)?
            .user_with_roles(name)
            .ok_or_else(|| Error::not_found(EntityKind::User, name, scope))
    }
}


#[async_trait]
impl PrincipalEngine for InMemoryEngine {
    fn server_id(&self) -> &str {
        SERVER_ID
    }

    async fn get_user(&self, ctx: &CallContext, database: &str, name: &str) -> Result<User> {
        ctx.check("get user")?;
        self.read_user(database, name)
    }

    async fn create_user(
        &self,
        ctx: &CallContext,
        database: &str,
        user: &CreateUser,
    ) -> Result<User> {
        ctx.check("create user")?;
        let scope = self.db_scope(database);
        let mode = user.validate().map_err(|e| e.in_scope(&scope))?;
        let name = user.name.trim().to_owned();
        {
            let mut state = self.state();
            let login_sid = match (mode, &user.login_name) {
                (AuthMode::LoginMapped, Some(login)) => match state.logins.get(login.trim()) {
                    Some(l) => Some(l.sid.clone()),
                    None => {
                        return Err(rejected(
                            "create",
                            EntityKind::User,
                            &name,
                            &scope,
                            15007,
                            format!("'{}' is not a valid login", login.trim()),
                        ))
                    }
                },
                _ => None,
            };
            state.next_principal_id += 1;
            let principal_id = state.next_principal_id;
            let db = find_db_mut(&mut state, database, &scope)?;
            if db.principal_exists(&name) {
                return Err(rejected(
                    "create",
                    EntityKind::User,
                    &name,
                    &scope,
                    15023,
                    format!("User, group, or role '{name}' already exists in the current database."),
                ));
            }
            let sid = match (&user.sid, login_sid) {
                (Some(sid), _) if !sid.is_empty() => {
                    securable::sid(sid, EntityKind::User, &name)?
                }
                (_, Some(login_sid)) => login_sid,
                _ => sid_from_id(principal_id),
            };
            db.users.insert(
                name.clone(),
                User {
                    principal_id,
                    name: name.clone(),
                    sid,
                    default_schema: user.default_schema.trim().to_owned(),
                    login_name: match mode {
                        AuthMode::LoginMapped => {
                            user.login_name.clone().unwrap_or_default().trim().to_owned()
                        }
                        _ => String::new(),
                    },
                    external: mode == AuthMode::External,
                    roles: vec![],
                },
            );
        }
        self.read_user(database, &name)
    }

    async fn update_user(
        &self,
        ctx: &CallContext,
        database: &str,
        user: &UpdateUser,
    ) -> Result<User> {
        ctx.check("update user")?;
        let scope = self.db_scope(database);
        let changed = user.validate().map_err(|e| e.in_scope(&scope))?;
        let name = user.name.trim().to_owned();
        if changed {
            let mut state = self.state();
            let db = find_db_mut(&mut state, database, &scope)?;
            let existing = db.users.get_mut(&name).ok_or_else(|| {
                rejected(
                    "update",
                    EntityKind::User,
                    &name,
                    &scope,
                    15151,
                    format!("Cannot alter the user '{name}', because it does not exist."),
                )
            })?;
            if user.password.as_deref().map_or(false, |p| !p.is_empty())
                && existing.mode() != AuthMode::Contained
            {
                return Err(rejected(
                    "update",
                    EntityKind::User,
                    &name,
                    &scope,
                    33215,
                    "Cannot set a password for a user that is not contained.".to_owned(),
                ));
            }
            if let Some(schema) = &user.default_schema {
                existing.default_schema = schema.trim().to_owned();
            }
        }
        self.read_user(database, &name)
    }

    async fn delete_user(&self, ctx: &CallContext, database: &str, name: &str) -> Result<()> {
        ctx.check("delete user")?;
        let scope = self.db_scope(database);
        let name = securable::principal_name(name, EntityKind::User)
            .map_err(|e| e.in_scope(&scope))?;
        let mut state = self.state();
        let db = find_db_mut(&mut state, database, &scope)?;
        if db.users.remove(&name).is_some() {
            db.members.retain(|(_, member)| member != &name);
            db.grants.retain(|g| g.principal != name);
        }
        Ok(())
    }

    async fn get_login(&self, ctx: &CallContext, name: &str) -> Result<Login> {
        ctx.check("get login")?;
        self.state()
            .logins
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(EntityKind::Login, name, self.server_scope()))
    }

    async fn create_login(&self, ctx: &CallContext, login: &CreateLogin) -> Result<Login> {
        ctx.check("create login")?;
        let scope = self.server_scope();
        login.validate().map_err(|e| e.in_scope(&scope))?;
        let name = login.name.trim().to_owned();
        {
            let mut state = self.state();
            if state.logins.contains_key(&name) {
                return Err(rejected(
                    "create",
                    EntityKind::Login,
                    &name,
                    &scope,
                    15025,
                    format!("The server principal '{name}' already exists."),
                ));
            }
            state.next_principal_id += 1;
            let principal_id = state.next_principal_id;
            let sid = match login.sid.as_deref().filter(|s| !s.is_empty()) {
                Some(sid) => securable::sid(sid, EntityKind::Login, &name)?,
                None => sid_from_id(principal_id),
            };
            state.logins.insert(
                name.clone(),
                Login {
                    principal_id,
                    name: name.clone(),
                    sid,
                    default_database: login
                        .default_database
                        .clone()
                        .filter(|d| !d.is_empty())
                        .unwrap_or_else(|| DEFAULT_DATABASE.to_owned()),
                    default_language: login
                        .default_language
                        .clone()
                        .filter(|l| !l.is_empty())
                        .unwrap_or_else(|| "us_english".to_owned()),
                    disabled: login.disabled,
                },
            );
        }
        self.get_login(ctx, &name).await
    }

    async fn update_login(&self, ctx: &CallContext, login: &UpdateLogin) -> Result<Login> {
        ctx.check("update login")?;
        let scope = self.server_scope();
        let changed = login.validate().map_err(|e| e.in_scope(&scope))?;
        let name = login.name.trim().to_owned();
        if changed {
            let mut state = self.state();
            let existing = state.logins.get_mut(&name).ok_or_else(|| {
                rejected(
                    "update",
                    EntityKind::Login,
                    &name,
                    &scope,
                    15151,
                    format!("Cannot alter the login '{name}', because it does not exist."),
                )
            })?;
            if let Some(db) = login.default_database.as_deref().filter(|d| !d.is_empty()) {
                existing.default_database = db.to_owned();
            }
            if let Some(language) = login.default_language.as_deref().filter(|l| !l.is_empty()) {
                existing.default_language = language.to_owned();
            }
            if let Some(disabled) = login.disabled {
                existing.disabled = disabled;
            }
        }
        self.get_login(ctx, &name).await
    }

    async fn delete_login(&self, ctx: &CallContext, name: &str) -> Result<()> {
        ctx.check("delete login")?;
        self.state().logins.remove(name.trim());
        Ok(())
    }

    async fn get_role(&self, ctx: &CallContext, database: &str, name: &str) -> Result<Role> {
        ctx.check("get role")?;
        let scope = self.db_scope(database);
        let state = self.state();
        find_db(&state, database, &scope)?
            .roles
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(EntityKind::Role, name, scope))
    }

    async fn create_role(&self, ctx: &CallContext, database: &str, role: &Role) -> Result<Role> {
        ctx.check("create role")?;
        let scope = self.db_scope(database);
        let name = securable::principal_name(&role.name, EntityKind::Role)
            .map_err(|e| e.in_scope(&scope))?;
        {
            let mut state = self.state();
            state.next_principal_id += 1;
            let principal_id = state.next_principal_id;
            let db = find_db_mut(&mut state, database, &scope)?;
            if db.principal_exists(&name) {
                return Err(rejected(
                    "create",
                    EntityKind::Role,
                    &name,
                    &scope,
                    15023,
                    format!("User, group, or role '{name}' already exists in the current database."),
                ));
            }
            db.roles.insert(
                name.clone(),
                Role {
                    principal_id,
                    name: name.clone(),
                },
            );
        }
        self.get_role(ctx, database, &name).await
    }

    async fn update_role(
        &self,
        ctx: &CallContext,
        database: &str,
        current_name: &str,
        role: &Role,
    ) -> Result<Role> {
        ctx.check("update role")?;
        let scope = self.db_scope(database);
        let current = securable::principal_name(current_name, EntityKind::Role)
            .map_err(|e| e.in_scope(&scope))?;
        let name = securable::principal_name(&role.name, EntityKind::Role)
            .map_err(|e| e.in_scope(&scope))?;
        if current != name {
            let mut state = self.state();
            let db = find_db_mut(&mut state, database, &scope)?;
            if db.principal_exists(&name) {
                return Err(rejected(
                    "update",
                    EntityKind::Role,
                    &current,
                    &scope,
                    15023,
                    format!("User, group, or role '{name}' already exists in the current database."),
                ));
            }
            let mut existing = db.roles.remove(&current).ok_or_else(|| {
                rejected(
                    "update",
                    EntityKind::Role,
                    &current,
                    &scope,
                    15151,
                    format!("Cannot alter the role '{current}', because it does not exist."),
                )
            })?;
            existing.name = name.clone();
            db.roles.insert(name.clone(), existing);
            db.members = std::mem::take(&mut db.members)
                .into_iter()
                .map(|(r, m)| {
                    let rename = |p: String| if p == current { name.clone() } else { p };
                    (rename(r), rename(m))
                })
                .collect();
            db.grants = std::mem::take(&mut db.grants)
                .into_iter()
                .map(|mut g| {
                    if g.principal == current {
                        g.principal = name.clone();
                    }
                    g
                })
                .collect();
        }
        self.get_role(ctx, database, &name).await
    }

    async fn delete_role(&self, ctx: &CallContext, database: &str, name: &str) -> Result<()> {
        ctx.check("delete role")?;
        let scope = self.db_scope(database);
        let name = securable::principal_name(name, EntityKind::Role)
            .map_err(|e| e.in_scope(&scope))?;
        let mut state = self.state();
        let db = find_db_mut(&mut state, database, &scope)?;
        if !db.roles.contains_key(&name) {
            return Ok(());
        }
        if db.members.iter().any(|(role, _)| role == &name) {
            return Err(rejected(
                "delete",
                EntityKind::Role,
                &name,
                &scope,
                15144,
                "The role has members. It must be empty before it can be dropped.".to_owned(),
            ));
        }
        db.roles.remove(&name);
        db.members.retain(|(_, member)| member != &name);
        db.grants.retain(|g| g.principal != name);
        Ok(())
    }

    async fn read_role_membership(
        &self,
        ctx: &CallContext,
        database: &str,
        id: &str,
    ) -> Result<RoleMembership> {
        ctx.check("read role membership")?;
        let scope = self.db_scope(database);
        let parsed = RoleMembershipId::parse(id).map_err(|e| e.in_scope(&scope))?;
        if parsed.database != database {
            return Err(Error::not_found(EntityKind::RoleMembership, id, scope));
        }
        let state = self.state();
        let db = find_db(&state, database, &scope)?;
        if !db
            .members
            .contains(&(parsed.role.clone(), parsed.member.clone()))
        {
            return Err(Error::not_found(EntityKind::RoleMembership, id, scope));
        }
        Ok(RoleMembership {
            id: RoleMembershipId::new(SERVER_ID, database, &parsed.role, &parsed.member)
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
        ctx.check("assign role")?;
        let scope = self.db_scope(database);
        let role = securable::principal_name(role, EntityKind::Role)
            .map_err(|e| e.in_scope(&scope))?;
        let member = securable::principal_name(member, EntityKind::RoleMembership)
            .map_err(|e| e.in_scope(&scope))?;
        {
            let mut state = self.state();
            let db = find_db_mut(&mut state, database, &scope)?;
            if !db.roles.contains_key(&role) || !db.principal_exists(&member) {
                return Err(rejected(
                    "assign",
                    EntityKind::RoleMembership,
                    &format!("{role}/{member}"),
                    &scope,
                    15151,
                    format!("Cannot add the principal '{member}' to role '{role}', because one of them does not exist."),
                ));
            }
            db.members.insert((role.clone(), member.clone()));
        }
        let id = RoleMembershipId::new(SERVER_ID, database, &role, &member).encode();
        self.read_role_membership(ctx, database, &id).await
    }

    async fn unassign_role(
        &self,
        ctx: &CallContext,
        database: &str,
        role: &str,
        member: &str,
    ) -> Result<()> {
        ctx.check("unassign role")?;
        let scope = self.db_scope(database);
        let mut state = self.state();
        let db = find_db_mut(&mut state, database, &scope)?;
        if !db.roles.contains_key(role) {
            return Err(rejected(
                "unassign",
                EntityKind::RoleMembership,
                &format!("{role}/{member}"),
                &scope,
                15151,
                format!("Cannot alter the role '{role}', because it does not exist."),
            ));
        }
        db.members.remove(&(role.to_owned(), member.to_owned()));
        Ok(())
    }

    async fn read_permission(
        &self,
        ctx: &CallContext,
        permission: &GrantPermission,
    ) -> Result<GrantPermission> {
        ctx.check("read permission")?;
        let scope = self.db_scope(&permission.database);
        let key = grant_key(permission).map_err(|e| e.in_scope(&scope))?;
        let state = self.state();
        let db = find_db(&state, &permission.database, &scope)?;
        if !db.grants.contains(&key) {
            return Err(Error::not_found(
                EntityKind::Permission,
                format!("{} on {} to {}", key.permission, key.class, key.principal),
                scope,
            ));
        }
        permission.normalized()
    }

    async fn grant_permission(
        &self,
        ctx: &CallContext,
        permission: &GrantPermission,
    ) -> Result<GrantPermission> {
        ctx.check("grant permission")?;
        let scope = self.db_scope(&permission.database);
        let key = grant_key(permission).map_err(|e| e.in_scope(&scope))?;
        {
            let mut state = self.state();
            let db = find_db_mut(&mut state, &permission.database, &scope)?;
            if !db.principal_exists(&key.principal) {
                return Err(rejected(
                    "grant",
                    EntityKind::Permission,
                    &key.principal,
                    &scope,
                    15151,
                    format!(
                        "Cannot find the user '{}', because it does not exist or you do not have permission.",
                        key.principal
                    ),
                ));
            }
            db.grants.insert(key);
        }
        self.read_permission(ctx, permission).await
    }

    async fn revoke_permission(
        &self,
        ctx: &CallContext,
        permission: &GrantPermission,
    ) -> Result<()> {
        ctx.check("revoke permission")?;
        let scope = self.db_scope(&permission.database);
        let key = grant_key(permission).map_err(|e| e.in_scope(&scope))?;
        let mut state = self.state();
        find_db_mut(&mut state, &permission.database, &scope)?
            .grants
            .remove(&key);
        Ok(())
    }

    async fn list_permissions(
        &self,
        ctx: &CallContext,
        database: &str,
        principal: &str,
    ) -> Result<Vec<GrantPermission>> {
        ctx.check("list permissions")?;
        let scope = self.db_scope(database);
        let state = self.state();
        let db = find_db(&state, database, &scope)?;
        Ok(db
            .grants
            .iter()
            .filter(|g| g.principal == principal)
            .map(|g| match g.class.as_str() {
                "DATABASE" if g.name.is_empty() => {
                    GrantPermission::database_scope(database, principal, &g.permission)
                }
                "SCHEMA" => {
                    GrantPermission::on_object(database, principal, &g.permission, "SCHEMA", &g.name)
                }
                class if g.schema.is_empty() => {
                    GrantPermission::on_object(database, principal, &g.permission, class, &g.name)
                }
                class => GrantPermission::on_object(
                    database,
                    principal,
                    &g.permission,
                    class,
                    &format!("{}.{}", g.schema, g.name),
                ),
            })
            .collect())
    }

    async fn get_database(&self, ctx: &CallContext, name: &str) -> Result<Database> {
        ctx.check("get database")?;
        let state = self.state();
        Ok(find_db(&state, name, &self.server_scope())?.database.clone())
    }

    async fn get_database_by_id(&self, ctx: &CallContext, id: i64) -> Result<Database> {
        ctx.check("get database")?;
        self.state()
            .databases
            .values()
            .find(|db| db.database.id == id)
            .map(|db| db.database.clone())
            .ok_or_else(|| {
                Error::not_found(EntityKind::Database, id.to_string(), self.server_scope())
            })
    }

    async fn create_database(&self, ctx: &CallContext, name: &str) -> Result<Database> {
        ctx.check("create database")?;
        let scope = self.server_scope();
        let name = securable::principal_name(name, EntityKind::Database)
            .map_err(|e| e.in_scope(&scope))?;
        {
            let mut state = self.state();
            if state.databases.contains_key(&name) {
                return Err(rejected(
                    "create",
                    EntityKind::Database,
                    &name,
                    &scope,
                    1801,
                    format!("Database '{name}' already exists. Choose a different database name."),
                ));
            }
            state.next_database_id += 1;
            let id = state.next_database_id;
            let mut next_principal_id = state.next_principal_id;
            let db = DatabaseState::new(id, &name, &mut next_principal_id);
            state.next_principal_id = next_principal_id;
            state.databases.insert(name.clone(), db);
        }
        self.get_database(ctx, &name).await
    }

    async fn delete_database(&self, ctx: &CallContext, name: &str) -> Result<()> {
        ctx.check("delete database")?;
        if name == DEFAULT_DATABASE {
            return Err(rejected(
                "delete",
                EntityKind::Database,
                name,
                &self.server_scope(),
                3708,
                "Cannot drop the database 'master' because it is a system database.".to_owned(),
            ));
        }
        self.state().databases.remove(name);
        Ok(())
    }

    async fn get_database_options(
        &self,
        ctx: &CallContext,
        name: &str,
    ) -> Result<DatabaseOptions> {
        ctx.check("get database options")?;
        let state = self.state();
        Ok(find_db(&state, name, &self.server_scope())?.options.clone())
    }

    async fn set_database_options(
        &self,
        ctx: &CallContext,
        name: &str,
        options: &DatabaseOptions,
    ) -> Result<DatabaseOptions> {
        ctx.check("set database options")?;
        let scope = self.db_scope(name);
        options.validate(name).map_err(|e| e.in_scope(&scope))?;
        {
            let mut state = self.state();
            let db = find_db_mut(&mut state, name, &scope)?;
            db.options = db.options.merge(options);
        }
        self.get_database_options(ctx, name).await
    }

    async fn get_scoped_configuration(
        &self,
        ctx: &CallContext,
        database: &str,
        key: &str,
    ) -> Result<ScopedConfiguration> {
        ctx.check("get scoped configuration")?;
        let scope = self.db_scope(database);
        let key = securable::token(key, EntityKind::ScopedConfiguration, "key")
            .map_err(|e| e.in_scope(&scope))?
            .to_uppercase();
        let state = self.state();
        let db = find_db(&state, database, &scope)?;
        if let Some(config) = db.scoped.get(&key) {
            return Ok(config.clone());
        }
        scoped_configuration_default(&key)
            .map(|default| ScopedConfiguration {
                name: key.clone(),
                value: default.to_owned(),
                value_for_secondary: None,
            })
            .ok_or_else(|| Error::not_found(EntityKind::ScopedConfiguration, &key, scope))
    }

    async fn set_scoped_configuration(
        &self,
        ctx: &CallContext,
        database: &str,
        key: &str,
        value: &str,
        value_for_secondary: Option<&str>,
    ) -> Result<ScopedConfiguration> {
        ctx.check("set scoped configuration")?;
        let scope = self.db_scope(database);
        let check = |raw: &str, what: &str| {
            securable::token(raw, EntityKind::ScopedConfiguration, what)
                .map(str::to_uppercase)
                .map_err(|e| e.in_scope(&scope))
        };
        let key = check(key, "key")?;
        let value = check(value, "value")?;
        let secondary = value_for_secondary
            .map(|v| check(v, "secondary value"))
            .transpose()?
            .filter(|v| v != "PRIMARY");
        {
            let mut state = self.state();
            let db = find_db_mut(&mut state, database, &scope)?;
            db.scoped.insert(
                key.clone(),
                ScopedConfiguration {
                    name: key.clone(),
                    value,
                    value_for_secondary: secondary,
                },
            );
        }
        self.get_scoped_configuration(ctx, database, &key).await
    }

    async fn clear_scoped_configuration(
        &self,
        ctx: &CallContext,
        database: &str,
        key: &str,
    ) -> Result<ScopedConfiguration> {
        ctx.check("clear scoped configuration")?;
        let scope = self.db_scope(database);
        let default = scoped_configuration_default(key).ok_or_else(|| {
            Error::validation(
                EntityKind::ScopedConfiguration,
                key,
                "no known engine default for this key",
            )
            .in_scope(&scope)
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
        let scope = self.db_scope(database);
        {
            let state = self.state();
            find_db(&state, database, &scope)?;
        }
        let batches = split_batches(sql);
        for (i, batch) in batches.iter().enumerate() {
            ctx.check("exec script").map_err(|e| e.in_scope(&scope))?;
            let mut state = self.state();
            let fails = state
                .failing_marker
                .as_deref()
                .map_or(false, |marker| batch.contains(marker));
            if fails {
                return Err(rejected(
                    "exec",
                    EntityKind::Script,
                    &format!("batch {}", i + 1),
                    &scope,
                    50000,
                    format!("batch {} of {} failed", i + 1, batches.len()),
                ));
            }
            state.executed_batches.push(batch.clone());
        }
        Ok(ScriptOutcome {
            batches: batches.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[tokio::test]
    async fn master_is_seeded() {
        let engine = InMemoryEngine::new();
        let ctx = CallContext::new();
        let master = engine.get_database(&ctx, "master").await.unwrap();
        assert_eq!(master.id, 1);
        assert_eq!(engine.get_login(&ctx, "sa").await.unwrap().name, "sa");
        let dbo = engine.get_user(&ctx, "master", "dbo").await.unwrap();
        assert_eq!(dbo.roles, vec!["db_owner"]);
    }

    #[tokio::test]
    async fn cancelled_calls_leave_state_alone() {
        let engine = InMemoryEngine::new();
        let ctx = CallContext::new();
        ctx.cancel();
        let err = engine.create_database(&ctx, "db1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        let fresh = CallContext::new();
        assert!(engine
            .get_database(&fresh, "db1")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn roles_with_members_cannot_be_dropped() {
        let engine = InMemoryEngine::new();
        let ctx = CallContext::new();
        engine
            .create_role(&ctx, "master", &Role::named("readers"))
            .await
            .unwrap();
        engine
            .assign_role(&ctx, "master", "readers", "dbo")
            .await
            .unwrap();
        let err = engine
            .delete_role(&ctx, "master", "readers")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EngineRejected);
        engine
            .unassign_role(&ctx, "master", "readers", "dbo")
            .await
            .unwrap();
        engine.delete_role(&ctx, "master", "readers").await.unwrap();
    }

    #[tokio::test]
    async fn unqualified_pass_through_grants_list_without_a_dot() {
        let engine = InMemoryEngine::new();
        let ctx = CallContext::new();
        for grant in [
            GrantPermission::on_object("master", "dbo", "CONTROL", "ASSEMBLY", "a"),
            GrantPermission::on_object("master", "dbo", "CONNECT", "DATABASE", "master"),
            GrantPermission::database_scope("master", "dbo", "VIEW DEFINITION"),
        ] {
            engine.grant_permission(&ctx, &grant).await.unwrap();
        }
        let listed = engine
            .list_permissions(&ctx, "master", "dbo")
            .await
            .unwrap();
        let names = listed
            .iter()
            .map(|p| (p.object_type.as_deref(), p.object_name.as_deref()))
            .collect::<Vec<_>>();
        assert!(names.contains(&(Some("ASSEMBLY"), Some("a"))));
        assert!(names.contains(&(Some("DATABASE"), Some("master"))));
        assert!(names.contains(&(None, None)));
        assert!(!names.iter().any(|(_, n)| n.map_or(false, |n| n.starts_with('.'))));
    }
}
