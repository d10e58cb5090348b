//! Device registry.
//!
//! Holds the canonical set of monitored devices behind a single lock.

mod models;
mod store;

pub use models::*;
pub use store::*;
