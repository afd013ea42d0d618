use warden_core::model::DatabaseOptions;
use warden_core::securable;
use warden_core::{EntityKind, Result};

use crate::statement::{ident, keyword, Statement};

const SELECT_DATABASE: &str = "SELECT CAST(database_id AS bigint), name FROM sys.databases";

/// Columns: database_id, name.
pub(crate) fn select_database(name: &str) -> Statement {
    Statement::query(format!("{SELECT_DATABASE} WHERE name = @name")).text("name", name)
}

/// Columns: database_id, name.
pub(crate) fn select_database_by_id(id: i64) -> Statement {
    Statement::query(format!("{SELECT_DATABASE} WHERE database_id = @id")).int("id", id)
}

pub(crate) fn create_database(name: &str) -> Result<Statement> {
    let name = securable::principal_name(name, EntityKind::Database)?;
    Ok(Statement::dynamic(format!("'CREATE DATABASE ' + {}", ident("name"))).text("name", name))
}

pub(crate) fn drop_database(name: &str) -> Result<Statement> {
    let name = securable::principal_name(name, EntityKind::Database)?;
    Ok(
        Statement::dynamic(format!("'DROP DATABASE ' + {}", ident("name")))
            .text("name", name)
            .guard("DB_ID(@name) IS NOT NULL"),
    )
}

/// Columns: collation, compatibility level, recovery model, then the
/// flags in [`DatabaseOptions::flags`] order.
pub(crate) fn select_options(name: &str) -> Statement {
    Statement::query(
        "SELECT ISNULL(collation_name, ''), CAST(compatibility_level AS int), \
         recovery_model_desc, \
         CAST(CASE WHEN snapshot_isolation_state IN (1, 3) THEN 1 ELSE 0 END AS bit), \
         is_read_committed_snapshot_on, is_auto_close_on, is_auto_shrink_on, \
         is_auto_create_stats_on, is_auto_update_stats_on, is_auto_update_stats_async_on \
         FROM sys.databases WHERE name = @name",
    )
    .text("name", name)
}

/// One `ALTER DATABASE` per option set in `options`. The engine does not
/// accept several of these in one statement.
pub(crate) fn set_options(name: &str, options: &DatabaseOptions) -> Result<Vec<Statement>> {
    let name = securable::principal_name(name, EntityKind::Database)?;
    options.validate(&name)?;
    let alter = || {
        Statement::dynamic(format!("'ALTER DATABASE ' + {}", ident("name")))
            .text("name", name.as_str())
    };
    let mut statements = vec![];
    if let Some(collation) = &options.collation {
        let collation =
            securable::token(collation, EntityKind::DatabaseOptions, "collation")?;
        statements.push(alter().push(keyword(&format!(" COLLATE {collation}"))));
    }
    if let Some(level) = options.compatibility_level {
        statements.push(
            alter()
                .push("' SET COMPATIBILITY_LEVEL = ' + CAST(@level AS nvarchar(10))")
                .int("level", level.into()),
        );
    }
    if let Some(recovery) = options.recovery_model {
        statements.push(alter().push(keyword(&format!(" SET RECOVERY {recovery}"))));
    }
    for (flag, on) in options.flags() {
        let state = if on { "ON" } else { "OFF" };
        statements.push(alter().push(keyword(&format!(" SET {flag} {state}"))));
    }
    Ok(statements)
}

/// Columns: name, value, value for secondary.
pub(crate) fn select_scoped_configuration(key: &str) -> Statement {
    Statement::query(
        "SELECT name, CAST(value AS nvarchar(4000)), \
         CAST(value_for_secondary AS nvarchar(4000)) \
         FROM sys.database_scoped_configurations WHERE name = @key",
    )
    .text("key", key)
}

/// `ALTER DATABASE SCOPED CONFIGURATION`, and its `FOR SECONDARY` variant
/// when a secondary value is given.
///
/// Keys and values are keyword tokens and are spliced after validation.
pub(crate) fn set_scoped_configuration(
    key: &str,
    value: &str,
    value_for_secondary: Option<&str>,
) -> Result<Vec<Statement>> {
    let entity = EntityKind::ScopedConfiguration;
    let key = securable::token(key, entity, "key")?;
    let value = securable::token(value, entity, "value")?;
    let mut statements = vec![Statement::query(format!(
        "ALTER DATABASE SCOPED CONFIGURATION SET {key} = {value};"
    ))];
    if let Some(secondary) = value_for_secondary {
        let secondary = securable::token(secondary, entity, "secondary value")?;
        statements.push(Statement::query(format!(
            "ALTER DATABASE SCOPED CONFIGURATION FOR SECONDARY SET {key} = {secondary};"
        )));
    }
    Ok(statements)
}
