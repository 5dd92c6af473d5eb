//! Scheduled short-form video publishing.
//!
//! Posts move through a small lifecycle (`PENDING -> PROCESSING -> PUBLISHED |
//! FAILED`). The [`dispatcher`] publishes every due post on a timer and the
//! [`trigger`] publishes a single post on demand; both claim a post atomically
//! through the [`store`] before calling the [`publish`] client, so a post never
//! has two publish attempts in flight.

pub mod attempt;
pub mod config;
pub mod credentials;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod publish;
pub mod store;
pub mod trigger;

pub use dispatcher::{run_cycle, CycleReport};
pub use error::DispatchError;
pub use trigger::{run_manual, ManualOutcome};

/// Install the `tracing` subscriber used by the binaries (`RUST_LOG`, default `info`).
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
