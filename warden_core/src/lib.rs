//!
//! Principal and permission management for SQL Server-compatible engines.
//!
//! Everything here is independent of a live server: configuration,
//! logging, the error taxonomy, the data model, the composite identifier
//! codec, the securable normalizer, and the [`PrincipalEngine`] contract
//! that drivers implement. [`fake::InMemoryEngine`] implements the same
//! contract without a server.
#![deny(missing_docs)]

pub use context::CallContext;
pub use engine::PrincipalEngine;
pub use error::{EntityKind, Error, ErrorKind, Result, Scope};

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod fake;
pub mod id;
pub mod logging;
pub mod model;
pub mod script;
pub mod securable;

#[macro_export]
/// Time the code inside the macro. Write the elapsed time to debug logs.
/// Derived from https://notes.iveselov.info/programming/time_it-a-case-study-in-rust-macros
macro_rules! log_runtime {
    ($context:expr, $($tt:tt)+) => {
        {
            $crate::logging::debug!("{}: starting", $context);
            let timer = std::time::Instant::now();
            let x =
            $(
                $tt
            )+;
            $crate::logging::debug!("{}: {:?}", $context, timer.elapsed());
            x
        }
    }
}
