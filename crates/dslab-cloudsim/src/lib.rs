#![doc = include_str!("../readme.md")]

pub mod allocation;
pub mod config;
pub mod datacenter;
pub mod error;
pub mod host;
pub mod log;
pub mod monitoring;
pub mod options;
pub mod pe;
pub mod placement;
pub mod simulation;
pub mod time_shared;
pub mod utilization_model;
pub mod vm;
pub mod workload;

#[cfg(test)]
mod tests;

pub use colored;
pub use datacenter::Datacenter;
pub use error::{Error, Result};
pub use simulation::CloudSimulation;

/// Identifier of a host within a datacenter.
pub type HostId = u32;
/// Identifier of a virtual machine.
pub type VmId = u32;
/// Identifier of a workload (cloudlet).
pub type WorkloadId = u32;

/// Tolerance used when comparing simulated time and instruction progress.
pub const EPSILON: f64 = 1e-9;
