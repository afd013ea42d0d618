use warden_core::model::{CreateLogin, UpdateLogin};
use warden_core::securable;
use warden_core::{EntityKind, Result};

use crate::statement::{ident, keyword, literal, Statement};

/// Columns: principal_id, name, sid, default database, default language,
/// disabled.
pub(crate) fn select_login(name: &str) -> Statement {
    Statement::query(
        "SELECT CAST(principal_id AS bigint), name, CONVERT(nvarchar(200), sid, 1), \
         ISNULL(default_database_name, ''), ISNULL(default_language_name, ''), \
         CAST(is_disabled AS bit) \
         FROM sys.server_principals WHERE name = @name AND type = 'S'",
    )
    .text("name", name)
}

/// `CREATE LOGIN`, followed by `ALTER LOGIN .. DISABLE` for logins created
/// disabled.
pub(crate) fn create_login(login: &CreateLogin) -> Result<Vec<Statement>> {
    login.validate()?;
    let name = login.name.trim();
    let mut stmt = Statement::dynamic(format!("'CREATE LOGIN ' + {}", ident("name")))
        .text("name", name)
        .option("PASSWORD", literal("password"))
        .text("password", login.password.as_str());
    if let Some(sid) = present(&login.sid) {
        stmt = stmt.option("SID", keyword(&securable::sid(sid, EntityKind::Login, name)?));
    }
    if let Some(database) = present(&login.default_database) {
        stmt = stmt
            .option("DEFAULT_DATABASE", ident("database"))
            .text("database", database);
    }
    if let Some(language) = present(&login.default_language) {
        stmt = stmt
            .option("DEFAULT_LANGUAGE", ident("language"))
            .text("language", language);
    }
    let mut statements = vec![stmt];
    if login.disabled {
        statements.push(set_disabled(name, true));
    }
    Ok(statements)
}

/// Empty when there is nothing to change.
pub(crate) fn update_login(login: &UpdateLogin) -> Result<Vec<Statement>> {
    if !login.validate()? {
        return Ok(vec![]);
    }
    let name = login.name.trim();
    let mut statements = vec![];
    if login.has_options() {
        let mut stmt =
            Statement::dynamic(format!("'ALTER LOGIN ' + {}", ident("name"))).text("name", name);
        if let Some(password) = present(&login.password) {
            stmt = stmt
                .option("PASSWORD", literal("password"))
                .text("password", password);
        }
        if let Some(database) = present(&login.default_database) {
            stmt = stmt
                .option("DEFAULT_DATABASE", ident("database"))
                .text("database", database);
        }
        if let Some(language) = present(&login.default_language) {
            stmt = stmt
                .option("DEFAULT_LANGUAGE", ident("language"))
                .text("language", language);
        }
        statements.push(stmt);
    }
    if let Some(disabled) = login.disabled {
        statements.push(set_disabled(name, disabled));
    }
    Ok(statements)
}

fn set_disabled(name: &str, disabled: bool) -> Statement {
    let state = if disabled { " DISABLE" } else { " ENABLE" };
    Statement::dynamic(format!("'ALTER LOGIN ' + {}", ident("name")))
        .text("name", name)
        .push(keyword(state))
}

pub(crate) fn drop_login(name: &str) -> Result<Statement> {
    let name = securable::principal_name(name, EntityKind::Login)?;
    Ok(
        Statement::dynamic(format!("'DROP LOGIN ' + {}", ident("name")))
            .text("name", name)
            .guard("EXISTS (SELECT 1 FROM sys.server_principals WHERE name = @name AND type = 'S')"),
    )
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
