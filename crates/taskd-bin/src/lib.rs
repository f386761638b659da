//! # taskd Server
//!
//! Startup wiring and lifecycle for the `taskd` binary.

pub mod initialization;
pub mod runtime;

pub use initialization::ensure_admin;
pub use runtime::{Components, initialize, run};
