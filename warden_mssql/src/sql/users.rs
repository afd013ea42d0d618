use warden_core::model::{AuthMode, CreateUser, UpdateUser};
use warden_core::securable;
use warden_core::{EntityKind, Result};

use crate::statement::{ident, keyword, literal, Statement};

/// Principal types read back as users: SQL, Windows user and group, and
/// external user and group.
const USER_TYPES: &str = "('S', 'U', 'G', 'E', 'X')";

/// Columns: principal_id, name, type, sid, default schema, login name.
pub(crate) fn select_user(name: &str) -> Statement {
    Statement::query(format!(
        "SELECT CAST(dp.principal_id AS bigint), dp.name, dp.type, \
         CONVERT(nvarchar(200), dp.sid, 1), ISNULL(dp.default_schema_name, ''), \
         ISNULL(sp.name, '') \
         FROM sys.database_principals dp \
         LEFT JOIN sys.server_principals sp ON sp.sid = dp.sid \
         WHERE dp.name = @name AND dp.type IN {USER_TYPES}"
    ))
    .text("name", name)
}

/// Names of the roles `name` is a direct member of.
pub(crate) fn select_user_roles(name: &str) -> Statement {
    Statement::query(
        "SELECT r.name FROM sys.database_role_members m \
         JOIN sys.database_principals r ON r.principal_id = m.role_principal_id \
         JOIN sys.database_principals u ON u.principal_id = m.member_principal_id \
         WHERE u.name = @name ORDER BY r.name",
    )
    .text("name", name)
}

pub(crate) fn create_user(user: &CreateUser) -> Result<Statement> {
    let mode = user.validate()?;
    let name = user.name.trim();
    let mut stmt =
        Statement::dynamic(format!("'CREATE USER ' + {}", ident("name"))).text("name", name);
    stmt = match mode {
        AuthMode::LoginMapped => stmt
            .push(format!("' FOR LOGIN ' + {}", ident("login")))
            .text(
                "login",
                user.login_name.as_deref().unwrap_or_default().trim(),
            ),
        AuthMode::External => stmt.push(keyword(" FROM EXTERNAL PROVIDER")),
        AuthMode::Contained => stmt,
    };
    stmt = stmt
        .option("DEFAULT_SCHEMA", ident("schema"))
        .text("schema", user.default_schema.trim());
    if mode == AuthMode::Contained {
        stmt = stmt
            .option("PASSWORD", literal("password"))
            .text("password", user.password.clone().unwrap_or_default());
    }
    if let Some(sid) = user.sid.as_deref().filter(|s| !s.is_empty()) {
        stmt = stmt.option("SID", keyword(&securable::sid(sid, EntityKind::User, name)?));
    }
    Ok(stmt)
}

/// `None` when there is nothing to change.
pub(crate) fn update_user(user: &UpdateUser) -> Result<Option<Statement>> {
    if !user.validate()? {
        return Ok(None);
    }
    let mut stmt = Statement::dynamic(format!("'ALTER USER ' + {}", ident("name")))
        .text("name", user.name.trim());
    if let Some(schema) = &user.default_schema {
        stmt = stmt
            .option("DEFAULT_SCHEMA", ident("schema"))
            .text("schema", schema.trim());
    }
    if let Some(password) = user.password.as_deref().filter(|p| !p.is_empty()) {
        stmt = stmt
            .option("PASSWORD", literal("password"))
            .text("password", password);
    }
    Ok(Some(stmt))
}

pub(crate) fn drop_user(name: &str) -> Result<Statement> {
    let name = securable::principal_name(name, EntityKind::User)?;
    Ok(
        Statement::dynamic(format!("'DROP USER ' + {}", ident("name")))
            .text("name", name)
            .guard(format!(
                "EXISTS (SELECT 1 FROM sys.database_principals \
                 WHERE name = @name AND type IN {USER_TYPES})"
            )),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::Param;
    use warden_core::ErrorKind;

    fn count(haystack: &str, needle: &str) -> usize {
        haystack.matches(needle).count()
    }

    #[test]
    fn exactly_one_auth_clause_per_mode() {
        let cases = [
            (CreateUser::contained("alice", "P@ss1", "dbo"), None),
            (
                CreateUser::for_login("app", "app_login", "dbo"),
                Some("' FOR LOGIN '"),
            ),
            (
                CreateUser::external("ops@corp.example", "dbo"),
                Some("' FROM EXTERNAL PROVIDER'"),
            ),
        ];
        for (user, clause) in cases {
            let sql = create_user(&user).unwrap().render();
            let clauses = count(&sql, "FOR LOGIN") + count(&sql, "FROM EXTERNAL PROVIDER");
            match clause {
                Some(clause) => {
                    assert_eq!(clauses, 1, "{sql}");
                    assert!(sql.contains(clause), "{sql}");
                }
                None => assert_eq!(clauses, 0, "{sql}"),
            }
            let with = sql.find("' WITH DEFAULT_SCHEMA = '").unwrap();
            assert_eq!(count(&sql, " WITH "), 1, "{sql}");
            if let Some(comma) = sql.find("', ") {
                assert!(with < comma);
            }
        }
    }

    #[test]
    fn contained_users_bind_their_password() {
        let stmt = create_user(&CreateUser::contained("alice", "P@ss1", "dbo")).unwrap();
        let sql = stmt.render();
        assert!(sql.contains("', PASSWORD = ' + '''' + REPLACE(@password"));
        assert!(!sql.contains("P@ss1"));
        assert!(!sql.contains("alice"));
        assert_eq!(
            stmt.params().cloned().collect::<Vec<_>>(),
            vec![
                Param::Text("alice".to_owned()),
                Param::Text("dbo".to_owned()),
                Param::Text("P@ss1".to_owned()),
            ]
        );
    }

    #[test]
    fn sids_are_normalized_binary_literals() {
        let mut user = CreateUser::contained("alice", "P@ss1", "dbo");
        user.sid = Some("0x0a0B".to_owned());
        let sql = create_user(&user).unwrap().render();
        assert!(sql.contains("', SID = ' + '0x0A0B'"), "{sql}");

        user.sid = Some("0x0A; DROP TABLE t".to_owned());
        assert_eq!(
            create_user(&user).unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn conflicting_modes_name_the_rule_and_user() {
        let mut user = CreateUser::for_login("carol", "carol_login", "dbo");
        user.password = Some("pw".to_owned());
        let err = create_user(&user).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("carol"), "{msg}");
        assert!(msg.contains("password"), "{msg}");

        let mut user = CreateUser::external("dave", "dbo");
        user.sid = Some("0x01".to_owned());
        assert!(create_user(&user).unwrap_err().to_string().contains("SID"));

        let user = CreateUser::contained("erin", "pw", " ");
        assert_eq!(
            create_user(&user).unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn empty_updates_build_nothing() {
        let update = UpdateUser::new("alice".to_owned(), None, None);
        assert!(update_user(&update).unwrap().is_none());

        let update = UpdateUser::new("alice".to_owned(), Some("new".to_owned()), None);
        let sql = update_user(&update).unwrap().unwrap().render();
        assert!(sql.contains("' WITH PASSWORD = '"), "{sql}");
        assert!(!sql.contains("DEFAULT_SCHEMA"));
    }

    #[test]
    fn drops_are_guarded() {
        let sql = drop_user("alice").unwrap().render();
        assert!(sql.contains("IF EXISTS (SELECT 1 FROM sys.database_principals"));
        assert!(drop_user("  ").is_err());
    }
}
