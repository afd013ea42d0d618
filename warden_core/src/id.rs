//! Composite identifiers.
//!
//! Every entity is addressed by a `/`-joined list of percent-encoded
//! components, so that components which themselves contain `/` (or any
//! other reserved character) round-trip without ambiguity:
//!
//! ```text
//! permission     server/database/principal/permission[/object_type/object_name]
//! membership     server/database/role/member
//! user           server/database/username
//! role, script   server/database/name
//! database       server/name
//! login          server/name
//! ```
//!
//! Decoding also accepts the legacy form without the server component. The
//! server of a legacy identifier decodes as an empty string.
//!
//! Malformed identifiers decode to a not-found error so that callers can
//! tell "look elsewhere" apart from other failures.

use std::borrow::Cow;

use crate::error::{EntityKind, Error, Result, Scope};

const SEPARATOR: char = '/';

/// Percent-encode each component and join them.
pub fn encode(components: &[&str]) -> String {
    components
        .iter()
        .map(|c| urlencoding::encode(c))
        .collect::<Vec<Cow<str>>>()
        .join("/")
}

/// Split `id` and percent-decode each component. The number of components
/// must be one of `arities`.
pub fn decode(id: &str, arities: &[usize], entity: EntityKind) -> Result<Vec<String>> {
    let malformed = || Error::not_found(entity, id, Scope::default());
    if id.is_empty() {
        return Err(malformed());
    }
    let parts = id.split(SEPARATOR).collect::<Vec<_>>();
    if !arities.contains(&parts.len()) {
        return Err(malformed());
    }
    parts
        .into_iter()
        .map(|p| {
            urlencoding::decode(p)
                .map(Cow::into_owned)
                .map_err(|_| malformed())
        })
        .collect()
}

/// Behavior shared by the fixed-arity identifiers.
pub trait CompositeId: Sized {
    /// The entity this identifier addresses.
    const ENTITY: EntityKind;
    /// Number of components in the canonical (server-prefixed) form.
    const ARITY: usize;

    /// Components in canonical order.
    fn components(&self) -> Vec<&str>;

    /// Build from canonical-order components. `parts.len() == ARITY`.
    fn from_components(parts: Vec<String>) -> Self;

    /// Encode into the canonical form.
    fn encode(&self) -> String {
        encode(&self.components())
    }

    /// Decode either the canonical or the legacy (server-less) form.
    fn parse(id: &str) -> Result<Self> {
        let mut parts = decode(id, &[Self::ARITY, Self::ARITY - 1], Self::ENTITY)?;
        if parts.len() == Self::ARITY - 1 {
            parts.insert(0, String::new());
        }
        if parts.iter().skip(1).any(String::is_empty) {
            return Err(Error::not_found(Self::ENTITY, id, Scope::default()));
        }
        Ok(Self::from_components(parts))
    }
}

macro_rules! composite_id {
    ($(#[$doc:meta])* $name:ident, $entity:expr, [$($field:ident),+]) => {
        $(#[$doc])*
        #[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
        pub struct $name {
            $(
                #[allow(missing_docs)]
                pub $field: String,
            )+
        }

        impl $name {
            /// Build from borrowed components.
            pub fn new($($field: &str),+) -> Self {
                Self { $($field: $field.to_owned()),+ }
            }
        }

        impl CompositeId for $name {
            const ENTITY: EntityKind = $entity;
            const ARITY: usize = [$(stringify!($field)),+].len();

            fn components(&self) -> Vec<&str> {
                vec![$(self.$field.as_str()),+]
            }

            fn from_components(parts: Vec<String>) -> Self {
                let mut parts = parts.into_iter();
                Self { $($field: parts.next().unwrap_or_default()),+ }
            }
        }
    };
}

composite_id!(
    /// `server/database/username`
    UserId,
    EntityKind::User,
    [server, database, name]
);
composite_id!(
    /// `server/login-name`
    LoginId,
    EntityKind::Login,
    [server, name]
);
composite_id!(
    /// `server/database/name`
    RoleId,
    EntityKind::Role,
    [server, database, name]
);
composite_id!(
    /// `server/database/role/member`
    RoleMembershipId,
    EntityKind::RoleMembership,
    [server, database, role, member]
);
composite_id!(
    /// `server/database/name`
    ScriptId,
    EntityKind::Script,
    [server, database, name]
);
composite_id!(
    /// `server/name`
    DatabaseId,
    EntityKind::Database,
    [server, name]
);

/// `server/database/principal/permission[/object_type/object_name]`
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PermissionId {
    /// `host:port`, empty for legacy identifiers.
    pub server: String,
    /// Database name.
    pub database: String,
    /// Grantee.
    pub principal: String,
    /// Permission token.
    pub permission: String,
    /// Object type and name for object/schema-scope permissions.
    pub object: Option<(String, String)>,
}

impl PermissionId {
    /// Encode into the canonical form.
    pub fn encode(&self) -> String {
        let mut components = vec![
            self.server.as_str(),
            self.database.as_str(),
            self.principal.as_str(),
            self.permission.as_str(),
        ];
        if let Some((object_type, object_name)) = &self.object {
            components.push(object_type);
            components.push(object_name);
        }
        encode(&components)
    }

    /// Decode any of the four accepted shapes. Canonical forms have 4 or 6
    /// components, legacy forms 3 or 5, so the shapes never collide.
    pub fn parse(id: &str) -> Result<Self> {
        let mut parts = decode(id, &[3, 4, 5, 6], EntityKind::Permission)?;
        if parts.len() % 2 == 1 {
            parts.insert(0, String::new());
        }
        if parts.iter().skip(1).any(String::is_empty) {
            return Err(Error::not_found(EntityKind::Permission, id, Scope::default()));
        }
        let mut parts = parts.into_iter();
        let mut next = || parts.next().unwrap_or_default();
        let (server, database, principal, permission) = (next(), next(), next(), next());
        let object = match (next(), next()) {
            (t, n) if t.is_empty() && n.is_empty() => None,
            (t, n) => Some((t, n)),
        };
        Ok(Self {
            server,
            database,
            principal,
            permission,
            object,
        })
    }
}
