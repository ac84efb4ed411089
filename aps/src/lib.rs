//! Client and operations for Autodesk Platform Services (ACC / BIM 360).

use tracing_subscriber::EnvFilter;

pub mod admin;
pub mod auth;
pub mod client;
pub mod data;
pub mod derivative;
pub mod ids;
pub mod scan;

mod api;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use api::{Aps, Options};
pub use client::{ApiError, Client};

/// Install the global `tracing` subscriber.
///
/// Logs at `info` unless overridden by `RUST_LOG`. Calling this more than once is harmless.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
