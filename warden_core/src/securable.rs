//! Normalization of permissions, securables and principal names.
//!
//! Everything returned from here is safe to splice into SQL text: tokens
//! are restricted to an allow-list and names are length-checked. Values
//! that are not tokens (names, passwords) still travel as bound
//! parameters.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{EntityKind, Error, Result};

/// Maximum length of a `sysname` identifier.
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Object types that the engine tracks under the `OBJECT` securable class.
pub const OBJECT_TYPES: &[&str] = &["TABLE", "VIEW", "PROCEDURE", "FUNCTION", "OBJECT"];

lazy_static! {
    static ref PERMISSION_TOKEN: Regex = Regex::new(r"^[A-Z0-9_ ]+$").unwrap();
    static ref KEYWORD_TOKEN: Regex = Regex::new(r"^[A-Za-z0-9_ ]+$").unwrap();
    static ref SID_LITERAL: Regex = Regex::new(r"^0[xX](?:[0-9A-Fa-f]{2}){1,85}$").unwrap();
}

/// The securable classes the engine distinguishes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SecurableClass {
    /// Database-scope permission, no `ON` clause.
    Database,
    /// `SCHEMA::name`
    Schema,
    /// `OBJECT::[schema].[name]`
    Object,
    /// Any other class, passed through after token validation.
    Other(String),
}

impl SecurableClass {
    /// The keyword used before `::` in a `GRANT .. ON` clause.
    pub fn keyword(&self) -> &str {
        match self {
            SecurableClass::Database => "DATABASE",
            SecurableClass::Schema => "SCHEMA",
            SecurableClass::Object => "OBJECT",
            SecurableClass::Other(class) => class,
        }
    }
}

/// A resolved permission target.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Securable {
    /// Class the engine tracks the permission under.
    pub class: SecurableClass,
    /// Schema component. Empty for unqualified names and for database scope.
    pub schema: String,
    /// Object (or schema, for the `SCHEMA` class) name. Empty for database scope.
    pub name: String,
}

impl Securable {
    /// The database itself.
    pub fn database() -> Self {
        Self {
            class: SecurableClass::Database,
            schema: String::new(),
            name: String::new(),
        }
    }

    /// True for database-scope permissions.
    pub fn is_database(&self) -> bool {
        self.class == SecurableClass::Database
    }
}

/// Upper-case and trim a permission, then check it against the allow-list.
///
/// Idempotent: normalizing an already-normalized permission is a no-op.
pub fn permission(raw: &str) -> Result<String> {
    let normalized = raw.trim().to_uppercase();
    if normalized.is_empty() || !PERMISSION_TOKEN.is_match(&normalized) {
        return Err(Error::validation(
            EntityKind::Permission,
            raw,
            "permissions may only contain letters, digits, spaces and underscores",
        ));
    }
    Ok(normalized)
}

/// Trim a principal (or role, login, schema) name and check its length.
pub fn principal_name(raw: &str, entity: EntityKind) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(Error::validation(entity, raw, "name must not be empty"));
    }
    if name.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(Error::validation(
            entity,
            raw,
            format!("name must not exceed {MAX_IDENTIFIER_LEN} characters"),
        ));
    }
    Ok(name.to_owned())
}

/// Check a keyword-like token (securable class, scoped configuration key
/// or value, collation) before it is spliced into SQL text.
pub fn token<'a>(raw: &'a str, entity: EntityKind, what: &str) -> Result<&'a str> {
    let token = raw.trim();
    if token.is_empty() || !KEYWORD_TOKEN.is_match(token) {
        return Err(Error::validation(
            entity,
            raw,
            format!("{what} may only contain letters, digits, spaces and underscores"),
        ));
    }
    Ok(token)
}

/// Check that a SID is a binary literal such as `0x01AB`.
pub fn sid(raw: &str, entity: EntityKind, owner: &str) -> Result<String> {
    let sid = raw.trim();
    if !SID_LITERAL.is_match(sid) {
        return Err(Error::validation(
            entity,
            owner,
            format!("SID `{raw}` must be 0x followed by 1 to 85 hex-encoded bytes"),
        ));
    }
    Ok(format!("0x{}", sid[2..].to_uppercase()))
}

/// Map a caller-supplied object type to the securable class the engine
/// tracks. Unknown types, `DATABASE` included, pass through upper-cased;
/// they still have to pass [`token`] before reaching SQL text.
pub fn securable_class(object_type: &str) -> SecurableClass {
    let object_type = object_type.trim().to_uppercase();
    if OBJECT_TYPES.contains(&object_type.as_str()) {
        SecurableClass::Object
    } else if object_type == "SCHEMA" {
        SecurableClass::Schema
    } else {
        SecurableClass::Other(object_type)
    }
}

/// Split `schema.object` into its components.
///
/// Unqualified names yield an empty schema, which lookups resolve against
/// the default schema of the session. Surrounding brackets are stripped.
pub fn split_object_name(name: &str) -> (String, String) {
    let name = name.trim();
    match split_unbracketed_dot(name) {
        Some((schema, object)) => (unbracket(schema), unbracket(object)),
        None => (String::new(), unbracket(name)),
    }
}

/// Resolve the optional object fields of a permission into a securable.
///
/// Both fields must be present or both absent.
pub fn resolve(object_type: Option<&str>, object_name: Option<&str>) -> Result<Securable> {
    let object_type = object_type.map(str::trim).filter(|t| !t.is_empty());
    let object_name = object_name.map(str::trim).filter(|n| !n.is_empty());
    match (object_type, object_name) {
        (None, None) => Ok(Securable::database()),
        (Some(object_type), Some(object_name)) => {
            let class = securable_class(object_type);
            token(class.keyword(), EntityKind::Permission, "object type")?;
            match class {
                SecurableClass::Schema => Ok(Securable {
                    class,
                    schema: String::new(),
                    name: component(&unbracket(object_name), object_name)?,
                }),
                _ => {
                    let (schema, name) = split_object_name(object_name);
                    let schema = if schema.is_empty() {
                        schema
                    } else {
                        component(&schema, object_name)?
                    };
                    Ok(Securable {
                        class,
                        schema,
                        name: component(&name, object_name)?,
                    })
                }
            }
        }
        (Some(t), None) => Err(Error::validation(
            EntityKind::Permission,
            t,
            "object_type requires object_name",
        )),
        (None, Some(n)) => Err(Error::validation(
            EntityKind::Permission,
            n,
            "object_name requires object_type",
        )),
    }
}

/// `QUOTENAME` yields NULL past the identifier limit, so both parts of a
/// securable name are held to it.
fn component(part: &str, object_name: &str) -> Result<String> {
    principal_name(part, EntityKind::Permission).map_err(|_| {
        Error::validation(
            EntityKind::Permission,
            object_name,
            format!("schema and object names must be 1 to {MAX_IDENTIFIER_LEN} characters"),
        )
    })
}

fn split_unbracketed_dot(name: &str) -> Option<(&str, &str)> {
    let mut in_brackets = false;
    for (i, c) in name.char_indices() {
        match c {
            '[' => in_brackets = true,
            ']' => in_brackets = false,
            '.' if !in_brackets => return Some((&name[..i], &name[i + 1..])),
            _ => {}
        }
    }
    None
}

fn unbracket(part: &str) -> String {
    let part = part.trim();
    part.strip_prefix('[')
        .and_then(|p| p.strip_suffix(']'))
        .map(|p| p.replace("]]", "]"))
        .unwrap_or_else(|| part.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn permission_is_normalized_and_idempotent() {
        for raw in ["select", " Alter Any User ", "VIEW_DEFINITION", "CONTROL"] {
            let once = permission(raw).unwrap();
            assert_eq!(permission(&once).unwrap(), once);
            assert_eq!(once, once.trim().to_uppercase());
        }
        assert_eq!(permission(" select ").unwrap(), "SELECT");
    }

    #[test]
    fn permission_rejects_unsafe_tokens() {
        for raw in ["", "  ", "SELECT;DROP", "SELECT'", "EXEC--", "SÉLECT", "A-B"] {
            let err = permission(raw).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{raw}");
        }
    }

    #[test]
    fn principal_names_are_trimmed_and_bounded() {
        assert_eq!(principal_name("  bob ", EntityKind::User).unwrap(), "bob");
        assert!(principal_name("", EntityKind::User).is_err());
        assert!(principal_name(&"x".repeat(128), EntityKind::User).is_ok());
        assert!(principal_name(&"x".repeat(129), EntityKind::User).is_err());
    }

    #[test]
    fn object_types_map_to_classes() {
        for t in ["TABLE", "view", "Procedure", "FUNCTION", "OBJECT"] {
            assert_eq!(securable_class(t), SecurableClass::Object);
        }
        assert_eq!(securable_class("schema"), SecurableClass::Schema);
        assert_eq!(
            securable_class("type"),
            SecurableClass::Other("TYPE".to_owned())
        );
    }

    #[test]
    fn object_names_split_on_schema() {
        assert_eq!(
            split_object_name("sales.orders"),
            ("sales".to_owned(), "orders".to_owned())
        );
        assert_eq!(
            split_object_name("orders"),
            (String::new(), "orders".to_owned())
        );
        assert_eq!(
            split_object_name("[my.schema].[or]]ders]"),
            ("my.schema".to_owned(), "or]ders".to_owned())
        );
    }

    #[test]
    fn resolve_requires_both_or_neither() {
        assert!(resolve(None, None).unwrap().is_database());
        assert!(resolve(Some("TABLE"), None).is_err());
        assert!(resolve(None, Some("sales.orders")).is_err());

        let s = resolve(Some("TABLE"), Some("sales.orders")).unwrap();
        assert_eq!(s.class, SecurableClass::Object);
        assert_eq!(s.schema, "sales");
        assert_eq!(s.name, "orders");

        let s = resolve(Some("SCHEMA"), Some("sales")).unwrap();
        assert_eq!(s.class, SecurableClass::Schema);
        assert_eq!(s.name, "sales");
    }

    #[test]
    fn database_object_type_passes_through() {
        let s = resolve(Some("database"), Some("db1")).unwrap();
        assert_eq!(s.class, SecurableClass::Other("DATABASE".to_owned()));
        assert_eq!(s.schema, "");
        assert_eq!(s.name, "db1");
        assert!(!s.is_database());
    }

    #[test]
    fn resolve_bounds_schema_and_object_names() {
        let long = "x".repeat(MAX_IDENTIFIER_LEN + 1);
        for name in [
            format!("sales.{long}"),
            format!("{long}.orders"),
            long.clone(),
            "sales.".to_owned(),
            "[]".to_owned(),
        ] {
            let err = resolve(Some("TABLE"), Some(&name)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{name}");
        }
        assert_eq!(
            resolve(Some("SCHEMA"), Some(&long)).unwrap_err().kind(),
            ErrorKind::Validation
        );
        let max = "x".repeat(MAX_IDENTIFIER_LEN);
        assert!(resolve(Some("TABLE"), Some(&format!("{max}.{max}"))).is_ok());
    }

    #[test]
    fn resolve_rejects_unsafe_object_types() {
        let err = resolve(Some("TABLE;--"), Some("x")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn sids_must_be_hex_literals() {
        assert_eq!(sid("0x01ab", EntityKind::User, "u").unwrap(), "0x01AB");
        assert!(sid("01AB", EntityKind::User, "u").is_err());
        assert!(sid("0x1", EntityKind::User, "u").is_err());
        assert!(sid("0x01'; --", EntityKind::User, "u").is_err());
    }
}
