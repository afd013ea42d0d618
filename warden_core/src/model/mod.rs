//! Entities returned by and passed to the engine.
//!
//! All of them are snapshots. Mutation happens only by invoking the
//! matching engine operation, which returns a fresh read of the entity.

mod database;
mod login;
mod permission;
mod role;
mod user;

pub use database::*;
pub use login::*;
pub use permission::*;
pub use role::*;
pub use user::*;
