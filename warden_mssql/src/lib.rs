//! SQL Server driver
//!
//! Implements [`warden_core::PrincipalEngine`] over tiberius, with one bb8
//! pool per database.
//!
//! ```no_run
//! use warden_core::config::ServerConfig;
//! use warden_core::{CallContext, PrincipalEngine};
//! use warden_mssql::MssqlEngine;
//!
//! # async fn run() -> warden_core::Result<()> {
//! let config = ServerConfig::new("sql1.example.com", 1433, "warden", "hunter2");
//! let engine = MssqlEngine::connect(config).await?;
//! let login = engine.get_login(&CallContext::new(), "sa").await?;
//! println!("{} is disabled: {}", login.name, login.disabled);
//! # Ok(())
//! # }
//! ```
#![deny(missing_docs)]

mod batch;
pub mod connection;
mod decode;
mod engine;
pub mod pool;
mod sql;
pub mod statement;

pub use connection::{MssqlPool, TiberiusFactory};
pub use engine::MssqlEngine;
pub use pool::{PoolCache, PoolFactory};
