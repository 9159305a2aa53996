//! Representation of virtual machine.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{ensure_positive, Result};
use crate::{VmId, WorkloadId};

/// Represents virtual machine (VM).
///
// VM is characterized by its ID, owner and resource requirements. Its actual CPU share at any tick is decided by
// the host scheduler (the envelope) and then split among the VM workloads by the VM scheduler. The host a VM runs
// on is kept in the datacenter placement table, not here.
#[derive(Clone, Debug, Serialize)]
pub struct VirtualMachine {
    pub id: VmId,
    pub owner_id: u32,
    mips_per_core: f64,
    cores: u32,
    ram: u64,
    bw: u64,
    size: u64,

    workloads: Vec<WorkloadId>,
    granted_mips: f64,
    consumed_mips: f64,
    workload_grants: BTreeMap<WorkloadId, f64>,
}

impl VirtualMachine {
    /// Creates virtual machine with specified parameters.
    pub fn new(id: VmId, owner_id: u32, mips_per_core: f64, cores: u32, ram: u64, bw: u64, size: u64) -> Result<Self> {
        let mips_per_core = ensure_positive("vm mips per core", mips_per_core)?;
        ensure_positive("vm cores", cores as f64)?;
        ensure_positive("vm ram", ram as f64)?;
        ensure_positive("vm bandwidth", bw as f64)?;
        ensure_positive("vm size", size as f64)?;
        Ok(Self {
            id,
            owner_id,
            mips_per_core,
            cores,
            ram,
            bw,
            size,
            workloads: Vec::new(),
            granted_mips: 0.,
            consumed_mips: 0.,
            workload_grants: BTreeMap::new(),
        })
    }

    pub fn mips_per_core(&self) -> f64 {
        self.mips_per_core
    }

    pub fn cores(&self) -> u32 {
        self.cores
    }

    pub fn ram(&self) -> u64 {
        self.ram
    }

    pub fn bw(&self) -> u64 {
        self.bw
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Capacity the VM asks the host for: MIPS per core times the number of cores.
    pub fn requested_mips(&self) -> f64 {
        self.mips_per_core * self.cores as f64
    }

    /// Capacity envelope granted by the host scheduler at the latest allocation.
    pub fn granted_mips(&self) -> f64 {
        self.granted_mips
    }

    /// Part of the envelope actually consumed by the workloads at the latest allocation.
    pub fn consumed_mips(&self) -> f64 {
        self.consumed_mips
    }

    /// Workloads admitted into the VM scheduler, in slot order.
    pub fn workloads(&self) -> &[WorkloadId] {
        &self.workloads
    }

    /// Capacity granted to the given workload at the latest allocation.
    pub fn workload_grant(&self, workload_id: WorkloadId) -> f64 {
        self.workload_grants.get(&workload_id).copied().unwrap_or(0.)
    }

    pub(crate) fn admit(&mut self, workload_id: WorkloadId) -> usize {
        self.workloads.push(workload_id);
        self.workloads.len() - 1
    }

    pub(crate) fn remove_workload(&mut self, workload_id: WorkloadId) -> bool {
        let before = self.workloads.len();
        self.workloads.retain(|&id| id != workload_id);
        self.workload_grants.remove(&workload_id);
        self.workloads.len() != before
    }

    /// Empties the workload queue, returning the removed workloads.
    pub(crate) fn drain_workloads(&mut self) -> Vec<WorkloadId> {
        self.workload_grants.clear();
        self.consumed_mips = 0.;
        self.granted_mips = 0.;
        std::mem::take(&mut self.workloads)
    }

    pub(crate) fn set_allocation(&mut self, granted_mips: f64, workload_grants: BTreeMap<WorkloadId, f64>) {
        self.granted_mips = granted_mips;
        self.consumed_mips = workload_grants.values().sum();
        self.workload_grants = workload_grants;
    }
}
