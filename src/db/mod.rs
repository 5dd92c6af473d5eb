//! Database module: row mapping and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: maps SQLite rows into domain entities.
//! - `repo`: SQL-only functions over the pool.
//!
//! External modules should import from `reel_scheduler::db`; the repository
//! API is re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;
