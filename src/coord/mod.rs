//! Service execution plumbing: the service trait and registry, execution
//! events and hooks, and the parallel coordinator.

pub mod action;
pub mod coordinator;
pub mod hooks;
pub mod registry;
pub mod types;

pub use action::*;
pub use coordinator::*;
pub use hooks::*;
pub use registry::*;
pub use types::*;
