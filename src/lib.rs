//! Field-operations core for water-infrastructure sites.
//!
//! Risk prioritization, offline-first synchronization of the site register,
//! crew route planning with live navigation, and a local service ledger.
//! UI shells drive everything through [`state::AppState`] and the
//! [`services`] functions.

pub mod db;
pub mod error;
pub mod events;
pub mod geo;
pub mod ledger;
mod migrations;
pub mod navigation;
pub mod persistence;
pub mod risk;
pub mod route;
pub mod seed;
pub mod services;
pub mod state;
pub mod sync;
pub mod types;

pub use error::FieldOpsError;
pub use state::AppState;

/// Install the `env_logger` backend. `RUST_LOG` overrides the default
/// `info` filter. Calling it twice is harmless.
pub fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("info");
    if env_logger::Builder::from_env(env).try_init().is_err() {
        log::debug!("Logger already initialized");
    }
}
