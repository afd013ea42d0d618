//! Statement builders, one module per entity.
//!
//! Builders validate their input and return a [`Statement`](crate::statement::Statement)
//! or a validation error, without touching the network.

pub(crate) mod databases;
pub(crate) mod logins;
pub(crate) mod permissions;
pub(crate) mod roles;
pub(crate) mod users;
