//! Master registry and router for distributed tool workers.
//!
//! Workers register the tools they host and heartbeat; the master places
//! each new tool instance on the least-loaded healthy worker and forwards
//! every later call for that instance to the same worker.

pub mod api;
pub mod config;
pub mod error;
pub mod forward;
pub mod registry;
mod routing;
pub mod state;
pub mod sweep;

pub use state::MasterState;
