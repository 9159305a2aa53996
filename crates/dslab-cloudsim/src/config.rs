//! Simulation configuration.

use serde::{Deserialize, Serialize};

use crate::error::{ensure_positive, Error, Result};
use crate::host::OversubscriptionPolicy;
use crate::placement::placement_algorithm_resolver;
use crate::utilization_model::resolve_utilization_model;

/// Holds raw simulation config parsed from YAML file.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct RawSimulationConfig {
    /// duration of a single clock tick
    pub step_duration: Option<f64>,
    /// interval between host utilization history samples
    pub sampling_interval: Option<f64>,
    /// simulation stops at this time even if some workloads are still active
    pub simulation_length: Option<f64>,
    /// default oversubscription policy of hosts
    pub oversubscription: Option<OversubscriptionPolicy>,
    /// number of threads computing host allocations
    pub worker_threads: Option<usize>,
    /// VM placement algorithm in `Name[options]` format
    pub placement_algorithm: Option<String>,
    /// physical hosts
    pub hosts: Option<Vec<HostConfig>>,
    /// virtual machines
    pub vms: Option<Vec<VmConfig>>,
    /// workloads (cloudlets)
    pub workloads: Option<Vec<WorkloadConfig>>,
}

/// Represents physical host(s) configuration.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct HostConfig {
    /// number of PEs
    pub pes: u32,
    /// MIPS of each PE
    pub pe_mips: f64,
    /// memory capacity
    pub ram: u64,
    /// network bandwidth
    pub bw: u64,
    /// storage capacity
    pub storage: u64,
    /// overrides the default oversubscription policy
    pub oversubscription: Option<OversubscriptionPolicy>,
    /// number of such hosts
    pub count: Option<u32>,
}

/// Represents virtual machine(s) configuration.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct VmConfig {
    pub owner_id: Option<u32>,
    /// requested MIPS per core
    pub mips: f64,
    pub cores: u32,
    pub ram: u64,
    pub bw: u64,
    /// image size
    pub size: u64,
    /// number of such VMs
    pub count: Option<u32>,
}

/// Represents workload(s) configuration.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct WorkloadConfig {
    pub owner_id: Option<u32>,
    /// length per core in millions of instructions
    pub length: f64,
    pub cores: u32,
    pub file_size: Option<u64>,
    pub output_size: Option<u64>,
    /// CPU utilization model in `Name[options]` format, `Full` if not set
    pub cpu_model: Option<String>,
    pub ram_model: Option<String>,
    pub bw_model: Option<String>,
    /// ID of VM to bind to, VMs are assigned round-robin if not set
    pub vm: Option<u32>,
    /// number of such workloads
    pub count: Option<u32>,
}

/// Represents simulation configuration.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// duration of a single clock tick
    pub step_duration: f64,
    /// interval between host utilization history samples
    pub sampling_interval: f64,
    /// simulation stops at this time even if some workloads are still active
    pub simulation_length: f64,
    /// default oversubscription policy of hosts
    pub oversubscription: OversubscriptionPolicy,
    /// number of threads computing host allocations
    pub worker_threads: usize,
    /// VM placement algorithm in `Name[options]` format
    pub placement_algorithm: String,
    /// physical hosts
    pub hosts: Vec<HostConfig>,
    /// virtual machines
    pub vms: Vec<VmConfig>,
    /// workloads (cloudlets)
    pub workloads: Vec<WorkloadConfig>,
}

impl SimulationConfig {
    /// Creates simulation config with default parameter values.
    pub fn new() -> Self {
        Self {
            step_duration: 1.,
            sampling_interval: 1.,
            simulation_length: 86400.,
            oversubscription: OversubscriptionPolicy::Strict,
            worker_threads: 1,
            placement_algorithm: "FirstFit".to_string(),
            hosts: Vec::new(),
            vms: Vec::new(),
            workloads: Vec::new(),
        }
    }

    /// Creates simulation config by reading parameter values from YAML file (uses default values if some parameters
    /// are absent).
    pub fn from_file(file_name: &str) -> Result<Self> {
        Self::from_yaml(&std::fs::read_to_string(file_name)?)
    }

    /// Creates simulation config from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let data: RawSimulationConfig = serde_yaml::from_str(yaml)?;
        let default = Self::new();
        let config = Self {
            step_duration: data.step_duration.unwrap_or(default.step_duration),
            sampling_interval: data.sampling_interval.unwrap_or(default.sampling_interval),
            simulation_length: data.simulation_length.unwrap_or(default.simulation_length),
            oversubscription: data.oversubscription.unwrap_or(default.oversubscription),
            worker_threads: data.worker_threads.unwrap_or(default.worker_threads),
            placement_algorithm: data.placement_algorithm.unwrap_or(default.placement_algorithm),
            hosts: data.hosts.unwrap_or_default(),
            vms: data.vms.unwrap_or_default(),
            workloads: data.workloads.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges and resolves every config string once.
    pub fn validate(&self) -> Result<()> {
        ensure_positive("step duration", self.step_duration)?;
        ensure_positive("sampling interval", self.sampling_interval)?;
        ensure_positive("simulation length", self.simulation_length)?;
        if self.worker_threads == 0 {
            return Err(Error::InvalidConfig("worker_threads must be at least 1".to_string()));
        }
        placement_algorithm_resolver(&self.placement_algorithm)?;
        let vm_count = self.number_of_vms();
        for workload in &self.workloads {
            for model in [&workload.cpu_model, &workload.ram_model, &workload.bw_model]
                .into_iter()
                .flatten()
            {
                resolve_utilization_model(model)?;
            }
            if let Some(vm) = workload.vm {
                if vm >= vm_count {
                    return Err(Error::InvalidConfig(format!(
                        "workload refers to vm #{}, only {} vms are configured",
                        vm, vm_count
                    )));
                }
            }
        }
        Ok(())
    }

    /// Returns total hosts count
    pub fn number_of_hosts(&self) -> u32 {
        self.hosts.iter().map(|host| host.count.unwrap_or(1)).sum()
    }

    /// Returns total VMs count
    pub fn number_of_vms(&self) -> u32 {
        self.vms.iter().map(|vm| vm.count.unwrap_or(1)).sum()
    }

    /// Returns total workloads count
    pub fn number_of_workloads(&self) -> u32 {
        self.workloads.iter().map(|workload| workload.count.unwrap_or(1)).sum()
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self::new()
    }
}
