//! wakewatch - device liveness monitoring and Wake-on-LAN coordination.
//!
//! A scheduler probes registered hosts on a fixed cadence, tracks their
//! online/offline state and publishes status changes to notification sinks.
//! Registry mutations arrive through a bounded command queue.

pub mod command;
pub mod config;
pub mod engine;
pub mod notify;
pub mod probe;
pub mod registry;
pub mod scheduler;
pub mod wake;
pub mod web;

#[cfg(test)]
mod testing;

pub use config::EngineConfig;
pub use engine::{Engine, EngineError, EngineHandle};
