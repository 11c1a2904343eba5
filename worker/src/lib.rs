//! Tool worker runtime.
//!
//! Hosts a table of tool adapters behind `/{tool}/{verb}`, binds a port with
//! fallbacks, registers itself with the master and heartbeats while
//! registered.

pub mod api;
pub mod app_state;
pub mod backoff;
pub mod bootstrap;
pub mod config;
pub mod lifecycle;
pub mod master_client;
pub mod tools;

pub use app_state::WorkerState;
