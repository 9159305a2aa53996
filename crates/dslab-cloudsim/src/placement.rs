//! Virtual machine placement algorithms.

use std::collections::BTreeMap;

use sugars::boxed;

use crate::error::{Error, Result};
use crate::host::Host;
use crate::options::parse_config_value;
use crate::vm::VirtualMachine;
use crate::HostId;

/// Trait for implementation of VM placement algorithms.
///
/// The algorithm is a function of the VM and the current host states, which returns an ID of host selected for VM
/// placement or `None` if there is no suitable host. Only hosts accepting the VM under their oversubscription policy
/// should be returned.
pub trait VmPlacementAlgorithm {
    fn select_host(&self, vm: &VirtualMachine, hosts: &BTreeMap<HostId, Host>) -> Option<HostId>;
}

/// Resolves algorithm by its name from config.
pub fn placement_algorithm_resolver(config_str: &str) -> Result<Box<dyn VmPlacementAlgorithm>> {
    let (algorithm_name, _) = parse_config_value(config_str);
    match algorithm_name.as_str() {
        "FirstFit" => Ok(boxed!(FirstFit::new())),
        "BestFit" => Ok(boxed!(BestFit::new())),
        "WorstFit" => Ok(boxed!(WorstFit::new())),
        "MostFreePes" => Ok(boxed!(MostFreePes::new())),
        _ => Err(Error::InvalidConfig(format!("unknown placement algorithm `{}`", config_str))),
    }
}

fn suitable_hosts<'a>(vm: &'a VirtualMachine, hosts: &'a BTreeMap<HostId, Host>) -> impl Iterator<Item = &'a Host> {
    hosts.values().filter(move |host| host.can_place(vm).is_ok())
}

////////////////////////////////////////////////////////////////////////////////

/// Uses the first suitable host.
#[derive(Default)]
pub struct FirstFit;

impl FirstFit {
    pub fn new() -> Self {
        Default::default()
    }
}

impl VmPlacementAlgorithm for FirstFit {
    fn select_host(&self, vm: &VirtualMachine, hosts: &BTreeMap<HostId, Host>) -> Option<HostId> {
        suitable_hosts(vm, hosts).next().map(|host| host.id)
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Uses the suitable host with the least unreserved MIPS.
#[derive(Default)]
pub struct BestFit;

impl BestFit {
    pub fn new() -> Self {
        Default::default()
    }
}

impl VmPlacementAlgorithm for BestFit {
    fn select_host(&self, vm: &VirtualMachine, hosts: &BTreeMap<HostId, Host>) -> Option<HostId> {
        let mut result: Option<HostId> = None;
        let mut min_available_mips = f64::INFINITY;
        for host in suitable_hosts(vm, hosts) {
            if host.available_mips() < min_available_mips {
                min_available_mips = host.available_mips();
                result = Some(host.id);
            }
        }
        result
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Uses the suitable host with the most unreserved MIPS.
#[derive(Default)]
pub struct WorstFit;

impl WorstFit {
    pub fn new() -> Self {
        Default::default()
    }
}

impl VmPlacementAlgorithm for WorstFit {
    fn select_host(&self, vm: &VirtualMachine, hosts: &BTreeMap<HostId, Host>) -> Option<HostId> {
        let mut result: Option<HostId> = None;
        let mut max_available_mips = f64::NEG_INFINITY;
        for host in suitable_hosts(vm, hosts) {
            if host.available_mips() > max_available_mips {
                max_available_mips = host.available_mips();
                result = Some(host.id);
            }
        }
        result
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Uses the suitable host with the most PEs not claimed by other VMs, the first one on ties.
#[derive(Default)]
pub struct MostFreePes;

impl MostFreePes {
    pub fn new() -> Self {
        Default::default()
    }
}

impl VmPlacementAlgorithm for MostFreePes {
    fn select_host(&self, vm: &VirtualMachine, hosts: &BTreeMap<HostId, Host>) -> Option<HostId> {
        let mut result: Option<(HostId, u32)> = None;
        for host in suitable_hosts(vm, hosts) {
            match result {
                Some((_, free)) if free >= host.free_pes() => {}
                _ => result = Some((host.id, host.free_pes())),
            }
        }
        result.map(|(host_id, _)| host_id)
    }
}
