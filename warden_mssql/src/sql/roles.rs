use warden_core::securable;
use warden_core::{EntityKind, Result};

use crate::statement::{ident, Statement};

/// Columns: principal_id, name.
pub(crate) fn select_role(name: &str) -> Statement {
    Statement::query(
        "SELECT CAST(principal_id AS bigint), name FROM sys.database_principals \
         WHERE name = @name AND type = 'R'",
    )
    .text("name", name)
}

pub(crate) fn create_role(name: &str) -> Result<Statement> {
    let name = securable::principal_name(name, EntityKind::Role)?;
    Ok(Statement::dynamic(format!("'CREATE ROLE ' + {}", ident("name"))).text("name", name))
}

pub(crate) fn rename_role(current: &str, name: &str) -> Result<Statement> {
    let current = securable::principal_name(current, EntityKind::Role)?;
    let name = securable::principal_name(name, EntityKind::Role)?;
    Ok(Statement::dynamic(format!(
        "'ALTER ROLE ' + {} + ' WITH NAME = ' + {}",
        ident("current"),
        ident("name")
    ))
    .text("current", current)
    .text("name", name))
}

pub(crate) fn drop_role(name: &str) -> Result<Statement> {
    let name = securable::principal_name(name, EntityKind::Role)?;
    Ok(
        Statement::dynamic(format!("'DROP ROLE ' + {}", ident("name")))
            .text("name", name)
            .guard("EXISTS (SELECT 1 FROM sys.database_principals WHERE name = @name AND type = 'R')"),
    )
}

/// One row if `member` is a direct member of `role`.
pub(crate) fn select_membership(role: &str, member: &str) -> Statement {
    Statement::query(
        "SELECT r.name, m.name FROM sys.database_role_members drm \
         JOIN sys.database_principals r ON r.principal_id = drm.role_principal_id \
         JOIN sys.database_principals m ON m.principal_id = drm.member_principal_id \
         WHERE r.name = @role AND m.name = @member",
    )
    .text("role", role)
    .text("member", member)
}

/// `ALTER ROLE .. ADD MEMBER` or `.. DROP MEMBER`.
pub(crate) fn alter_membership(role: &str, member: &str, add: bool) -> Result<Statement> {
    let role = securable::principal_name(role, EntityKind::Role)?;
    let member = securable::principal_name(member, EntityKind::RoleMembership)?;
    let action = if add { "ADD" } else { "DROP" };
    Ok(Statement::dynamic(format!(
        "'ALTER ROLE ' + {} + ' {action} MEMBER ' + {}",
        ident("role"),
        ident("member")
    ))
    .text("role", role)
    .text("member", member))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_changes_quote_both_principals() {
        let sql = alter_membership("readers", "DOMAIN\\bob", true)
            .unwrap()
            .render();
        assert!(sql.contains(
            "DECLARE @sql nvarchar(max) = 'ALTER ROLE ' + QUOTENAME(@role) + ' ADD MEMBER ' + QUOTENAME(@member);"
        ));
        assert!(!sql.contains("bob"));
        let sql = alter_membership("readers", "bob", false).unwrap().render();
        assert!(sql.contains("' DROP MEMBER '"));
        assert!(alter_membership("", "bob", true).is_err());
    }

    #[test]
    fn rename_uses_with_name() {
        let stmt = rename_role("readers", " analysts ").unwrap();
        assert!(stmt.render().contains("' WITH NAME = ' + QUOTENAME(@name)"));
        assert_eq!(
            stmt.param("name"),
            Some(&crate::statement::Param::Text("analysts".to_owned()))
        );
    }

    #[test]
    fn drops_are_guarded_by_type() {
        let sql = drop_role("readers").unwrap().render();
        assert!(sql.contains("type = 'R') EXEC (@sql);"));
    }
}
