//! `GRANT`, `REVOKE` and reads of `sys.database_permissions`.
//!
//! The permission token and the securable class keyword are spliced into
//! the statement as static text, since the engine does not accept them as
//! parameters. Both have already passed the allow-lists in
//! [`warden_core::securable`]. Principal, schema and object names are bound.

use warden_core::model::ValidatedPermission;
use warden_core::securable::{Securable, SecurableClass};
use warden_core::{EntityKind, Error, Result};

use crate::statement::{ident, keyword, Statement};

/// `ON <class>::[schema].[name]`, or nothing for database scope.
fn on_clause(securable: &Securable) -> Option<String> {
    match &securable.class {
        SecurableClass::Database => None,
        SecurableClass::Schema => Some(format!(
            "{} + {}",
            keyword(" ON SCHEMA::"),
            ident("object")
        )),
        class if securable.schema.is_empty() => Some(format!(
            "{} + {}",
            keyword(&format!(" ON {}::", class.keyword())),
            ident("object")
        )),
        class => Some(format!(
            "{} + {} + '.' + {}",
            keyword(&format!(" ON {}::", class.keyword())),
            ident("schema"),
            ident("object")
        )),
    }
}

fn bind_securable(mut stmt: Statement, securable: &Securable) -> Statement {
    if !securable.schema.is_empty() {
        stmt = stmt.text("schema", securable.schema.as_str());
    }
    if !securable.name.is_empty() {
        stmt = stmt.text("object", securable.name.as_str());
    }
    stmt
}

pub(crate) fn grant(permission: &ValidatedPermission) -> Statement {
    change(permission, "GRANT", " TO ", "")
}

pub(crate) fn revoke(permission: &ValidatedPermission) -> Statement {
    change(permission, "REVOKE", " FROM ", " CASCADE")
}

fn change(
    permission: &ValidatedPermission,
    verb: &str,
    preposition: &str,
    suffix: &str,
) -> Statement {
    let mut stmt = Statement::dynamic(keyword(&format!("{verb} {}", permission.permission)))
        .text("principal", permission.principal.as_str());
    if let Some(on) = on_clause(&permission.securable) {
        stmt = stmt.push(on);
    }
    stmt = stmt.push(format!("{} + {}", keyword(preposition), ident("principal")));
    if !suffix.is_empty() {
        stmt = stmt.push(keyword(suffix));
    }
    bind_securable(stmt, &permission.securable)
}

/// One row if the permission is granted, with or without grant option.
pub(crate) fn select_permission(permission: &ValidatedPermission) -> Result<Statement> {
    let securable = &permission.securable;
    let qualified = if securable.schema.is_empty() {
        ident("object")
    } else {
        format!("{} + '.' + {}", ident("schema"), ident("object"))
    };
    let filter = match &securable.class {
        SecurableClass::Database => "p.class = 0".to_owned(),
        SecurableClass::Object => {
            format!("p.class = 1 AND p.major_id = OBJECT_ID({qualified}) AND p.minor_id = 0")
        }
        SecurableClass::Schema => "p.class = 3 AND p.major_id = SCHEMA_ID(@object)".to_owned(),
        SecurableClass::Other(class) => other_class_filter(class, &qualified, securable)
            .ok_or_else(|| {
                Error::validation(
                    EntityKind::Permission,
                    class.as_str(),
                    "permissions on this securable class cannot be read back",
                )
            })?,
    };
    let stmt = Statement::query(format!(
        "SELECT p.permission_name FROM sys.database_permissions p \
         JOIN sys.database_principals dp ON dp.principal_id = p.grantee_principal_id \
         WHERE dp.name = @principal AND p.permission_name = @permission \
         AND p.state IN ('G', 'W') AND {filter}"
    ))
    .text("principal", permission.principal.as_str())
    .text("permission", permission.permission.as_str());
    Ok(bind_securable(stmt, securable))
}

/// `sys.database_permissions` filter for the classes outside database,
/// schema and object scope. `None` for classes with no catalog mapping.
fn other_class_filter(class: &str, qualified: &str, securable: &Securable) -> Option<String> {
    let by_name = |number: u8, view: &str, id: &str| {
        let schema = if securable.schema.is_empty() {
            ""
        } else {
            " AND schema_id = SCHEMA_ID(@schema)"
        };
        format!(
            "p.class = {number} AND p.major_id = \
             (SELECT {id} FROM sys.{view} WHERE name = @object{schema})"
        )
    };
    Some(match class {
        "DATABASE" => "p.class = 0 AND DB_NAME() = @object".to_owned(),
        "TYPE" => format!("p.class = 6 AND p.major_id = TYPE_ID({qualified})"),
        "USER" | "ROLE" | "APPLICATION ROLE" => {
            "p.class = 4 AND p.major_id = DATABASE_PRINCIPAL_ID(@object)".to_owned()
        }
        "ASSEMBLY" => by_name(5, "assemblies", "assembly_id"),
        "XML SCHEMA COLLECTION" => by_name(10, "xml_schema_collections", "xml_collection_id"),
        "MESSAGE TYPE" => by_name(15, "service_message_types", "message_type_id"),
        "CONTRACT" => by_name(16, "service_contracts", "service_contract_id"),
        "SERVICE" => by_name(17, "services", "service_id"),
        "REMOTE SERVICE BINDING" => {
            by_name(18, "remote_service_bindings", "remote_service_binding_id")
        }
        "ROUTE" => by_name(19, "routes", "route_id"),
        "FULLTEXT CATALOG" => by_name(23, "fulltext_catalogs", "fulltext_catalog_id"),
        "SYMMETRIC KEY" => by_name(24, "symmetric_keys", "symmetric_key_id"),
        "CERTIFICATE" => by_name(25, "certificates", "certificate_id"),
        "ASYMMETRIC KEY" => by_name(26, "asymmetric_keys", "asymmetric_key_id"),
        "FULLTEXT STOPLIST" => by_name(29, "fulltext_stoplists", "stoplist_id"),
        _ => return None,
    })
}

/// The `GRANT` and the read that confirms it. The read is built first so a
/// securable that cannot be read back fails before anything is sent.
pub(crate) fn grant_and_read(permission: &ValidatedPermission) -> Result<(Statement, Statement)> {
    let read = select_permission(permission)?;
    Ok((grant(permission), read))
}

/// Columns: permission, class, schema, name. Database, object and schema
/// permissions only.
pub(crate) fn select_principal_permissions(principal: &str) -> Statement {
    Statement::query(
        "SELECT p.permission_name, CAST(p.class AS int), \
         ISNULL(CASE p.class WHEN 1 THEN OBJECT_SCHEMA_NAME(p.major_id) END, ''), \
         ISNULL(CASE p.class WHEN 1 THEN OBJECT_NAME(p.major_id) \
         WHEN 3 THEN SCHEMA_NAME(p.major_id) END, '') \
         FROM sys.database_permissions p \
         JOIN sys.database_principals dp ON dp.principal_id = p.grantee_principal_id \
         WHERE dp.name = @principal AND p.state IN ('G', 'W') \
         AND p.class IN (0, 1, 3) AND p.minor_id = 0 \
         ORDER BY p.class, 3, 4, p.permission_name",
    )
    .text("principal", principal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::Param;
    use warden_core::model::GrantPermission;
    use warden_core::ErrorKind;

    fn validated(grant: GrantPermission) -> ValidatedPermission {
        grant.validate().unwrap()
    }

    #[test]
    fn database_scope_grants_have_no_on_clause() {
        let permission = validated(GrantPermission::database_scope("db1", "bob", "view definition"));
        let sql = grant(&permission).render();
        assert!(sql.contains("DECLARE @sql nvarchar(max) = 'GRANT VIEW DEFINITION';"));
        assert!(sql.contains("SET @sql = @sql + ' TO ' + QUOTENAME(@principal);"));
        assert!(!sql.contains(" ON "));

        let sql = revoke(&permission).render();
        assert!(sql.contains("' FROM ' + QUOTENAME(@principal)"));
        assert!(sql.contains("SET @sql = @sql + ' CASCADE';"));
    }

    #[test]
    fn object_grants_quote_schema_and_name() {
        let permission = validated(GrantPermission::on_object(
            "db1",
            "bob",
            "SELECT",
            "TABLE",
            "sales.orders",
        ));
        let stmt = grant(&permission);
        assert!(stmt
            .render()
            .contains("' ON OBJECT::' + QUOTENAME(@schema) + '.' + QUOTENAME(@object)"));
        assert_eq!(stmt.params().count(), 3);

        let unqualified = validated(GrantPermission::on_object("db1", "bob", "SELECT", "VIEW", "v"));
        let sql = grant(&unqualified).render();
        assert!(sql.contains("' ON OBJECT::' + QUOTENAME(@object)"));
        assert!(!sql.contains("@schema"));
    }

    #[test]
    fn schema_grants_use_the_schema_class() {
        let permission = validated(GrantPermission::on_object(
            "db1", "bob", "ALTER", "SCHEMA", "sales",
        ));
        let sql = grant(&permission).render();
        assert!(sql.contains("' ON SCHEMA::' + QUOTENAME(@object)"));
    }

    #[test]
    fn reads_filter_by_class() {
        let object = validated(GrantPermission::on_object(
            "db1",
            "bob",
            "SELECT",
            "TABLE",
            "sales.orders",
        ));
        let sql = select_permission(&object).unwrap().render();
        assert!(sql.contains("p.class = 1 AND p.major_id = OBJECT_ID(QUOTENAME(@schema) + '.' + QUOTENAME(@object))"));

        let database = validated(GrantPermission::database_scope("db1", "bob", "CONNECT"));
        assert!(select_permission(&database)
            .unwrap()
            .render()
            .contains("AND p.class = 0"));

        let assembly = validated(GrantPermission::on_object(
            "db1", "bob", "CONTROL", "ASSEMBLY", "a",
        ));
        assert!(select_permission(&assembly).unwrap().render().contains(
            "p.class = 5 AND p.major_id = (SELECT assembly_id FROM sys.assemblies WHERE name = @object)"
        ));

        let database = validated(GrantPermission::on_object(
            "db1", "bob", "CONNECT", "DATABASE", "db1",
        ));
        assert!(select_permission(&database)
            .unwrap()
            .render()
            .contains("p.class = 0 AND DB_NAME() = @object"));
    }

    #[test]
    fn unreadable_classes_fail_before_the_grant_is_built() {
        let widget = validated(GrantPermission::on_object(
            "db1", "bob", "CONTROL", "WIDGET", "w",
        ));
        assert_eq!(
            grant_and_read(&widget).unwrap_err().kind(),
            ErrorKind::Validation
        );

        let assembly = validated(GrantPermission::on_object(
            "db1", "bob", "CONTROL", "ASSEMBLY", "a",
        ));
        let (grant, read) = grant_and_read(&assembly).unwrap();
        assert!(grant
            .render()
            .contains("' ON ASSEMBLY::' + QUOTENAME(@object)"));
        assert_eq!(read.param("object"), Some(&Param::Text("a".to_owned())));
    }
}
