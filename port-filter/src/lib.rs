//! Control plane for a cgroup-scoped ingress filter.
//!
//! Resolves the cgroup v2 mount, loads the `block_process_ports` program and
//! its maps, publishes the port / process-name rule, attaches to the cgroup's
//! ingress hook and reports the kernel's drop counter until told to stop.

pub mod attach;
pub mod bootstrap;
pub mod cgroup;
pub mod config;
pub mod counter;
pub mod error;
pub mod loader;
pub mod supervisor;

#[cfg(test)]
mod testing;
