//! Host and its capacity manager.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{ensure_positive, Error, PlacementRejection, Result};
use crate::pe::ProcessingElement;
use crate::vm::VirtualMachine;
use crate::{HostId, VmId};

/// What a host does with a VM that does not fit into its free capacity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversubscriptionPolicy {
    /// Reject the placement.
    #[default]
    Strict,
    /// Accept the placement, the time-shared scheduler degrades all tenants under contention.
    Oversubscribe,
}

/// Physical machine owning a fixed list of PEs and hosting a dynamic set of VMs.
///
/// Besides the set of hosted VMs the host keeps track of the capacity reserved by them. Under oversubscription the
/// reservations above the total capacity are counted as overcommit.
#[derive(Clone, Debug)]
pub struct Host {
    pub id: HostId,
    pes: Vec<ProcessingElement>,
    policy: OversubscriptionPolicy,
    pes_reserved: u32,

    mips_total: f64,
    mips_available: f64,
    mips_overcommit: f64,

    ram_total: u64,
    ram_available: u64,
    ram_overcommit: u64,

    bw_total: u64,
    bw_available: u64,
    bw_overcommit: u64,

    storage_total: u64,
    storage_available: u64,
    storage_overcommit: u64,

    vms: BTreeSet<VmId>,
}

impl Host {
    pub fn new(
        id: HostId,
        pes: Vec<ProcessingElement>,
        ram: u64,
        bw: u64,
        storage: u64,
        policy: OversubscriptionPolicy,
    ) -> Result<Self> {
        ensure_positive("host pe count", pes.len() as f64)?;
        ensure_positive("host ram", ram as f64)?;
        ensure_positive("host bandwidth", bw as f64)?;
        ensure_positive("host storage", storage as f64)?;
        let mips_total = pes.iter().map(|pe| pe.mips()).sum();
        Ok(Self {
            id,
            pes,
            policy,
            pes_reserved: 0,
            mips_total,
            mips_available: mips_total,
            mips_overcommit: 0.,
            ram_total: ram,
            ram_available: ram,
            ram_overcommit: 0,
            bw_total: bw,
            bw_available: bw,
            bw_overcommit: 0,
            storage_total: storage,
            storage_available: storage,
            storage_overcommit: 0,
            vms: BTreeSet::new(),
        })
    }

    pub fn pes(&self) -> &[ProcessingElement] {
        &self.pes
    }

    pub fn policy(&self) -> OversubscriptionPolicy {
        self.policy
    }

    /// Total processing capacity, the sum of PE MIPS.
    pub fn total_mips(&self) -> f64 {
        self.mips_total
    }

    /// Capacity not reserved by hosted VMs.
    pub fn available_mips(&self) -> f64 {
        self.mips_available
    }

    /// Capacity reserved by hosted VMs (never above the total).
    pub fn allocated_mips(&self) -> f64 {
        self.mips_total - self.mips_available
    }

    /// Reservations exceeding the total capacity.
    pub fn mips_overcommit(&self) -> f64 {
        self.mips_overcommit
    }

    pub fn available_ram(&self) -> u64 {
        self.ram_available
    }

    pub fn available_bw(&self) -> u64 {
        self.bw_available
    }

    pub fn available_storage(&self) -> u64 {
        self.storage_available
    }

    pub fn total_ram(&self) -> u64 {
        self.ram_total
    }

    pub fn total_bw(&self) -> u64 {
        self.bw_total
    }

    pub fn total_storage(&self) -> u64 {
        self.storage_total
    }

    /// Number of PEs not claimed by the cores of hosted VMs.
    pub fn free_pes(&self) -> u32 {
        (self.pes.len() as u32).saturating_sub(self.pes_reserved)
    }

    /// IDs of hosted VMs in ascending order.
    pub fn vms(&self) -> impl Iterator<Item = VmId> + '_ {
        self.vms.iter().copied()
    }

    pub fn hosts_vm(&self, vm_id: VmId) -> bool {
        self.vms.contains(&vm_id)
    }

    /// Checks if the VM can be placed on this host under its oversubscription policy.
    pub fn can_place(&self, vm: &VirtualMachine) -> std::result::Result<(), PlacementRejection> {
        if self.policy == OversubscriptionPolicy::Oversubscribe {
            return Ok(());
        }
        if vm.cores() as usize > self.pes.len() {
            return Err(PlacementRejection::NotEnoughCores {
                requested: vm.cores(),
                available: self.pes.len() as u32,
            });
        }
        let fastest = self.pes.iter().map(|pe| pe.mips()).fold(0., f64::max);
        if vm.mips_per_core() > fastest {
            return Err(PlacementRejection::PeTooSlow {
                requested: vm.mips_per_core(),
                fastest,
            });
        }
        if self.mips_available < vm.requested_mips() {
            return Err(PlacementRejection::NotEnoughCpu {
                requested: vm.requested_mips(),
                available: self.mips_available,
            });
        }
        if self.ram_available < vm.ram() {
            return Err(PlacementRejection::NotEnoughMemory {
                requested: vm.ram(),
                available: self.ram_available,
            });
        }
        if self.bw_available < vm.bw() {
            return Err(PlacementRejection::NotEnoughBandwidth {
                requested: vm.bw(),
                available: self.bw_available,
            });
        }
        if self.storage_available < vm.size() {
            return Err(PlacementRejection::NotEnoughStorage {
                requested: vm.size(),
                available: self.storage_available,
            });
        }
        Ok(())
    }

    /// Registers the VM on the host. Nothing is changed if the placement is rejected.
    pub(crate) fn place(&mut self, vm: &VirtualMachine) -> Result<()> {
        if self.vms.contains(&vm.id) {
            return Err(self.rejected(vm.id, PlacementRejection::AlreadyPlaced(self.id)));
        }
        self.can_place(vm).map_err(|reason| self.rejected(vm.id, reason))?;

        let requested = vm.requested_mips();
        if self.mips_available < requested {
            self.mips_overcommit += requested - self.mips_available;
            self.mips_available = 0.;
        } else {
            self.mips_available -= requested;
        }
        reserve(&mut self.ram_available, &mut self.ram_overcommit, vm.ram());
        reserve(&mut self.bw_available, &mut self.bw_overcommit, vm.bw());
        reserve(&mut self.storage_available, &mut self.storage_overcommit, vm.size());
        self.pes_reserved += vm.cores();
        self.vms.insert(vm.id);
        Ok(())
    }

    /// Removes the VM and returns its reservations.
    pub(crate) fn release(&mut self, vm: &VirtualMachine) -> bool {
        if !self.vms.remove(&vm.id) {
            return false;
        }
        let requested = vm.requested_mips();
        if self.mips_overcommit >= requested {
            self.mips_overcommit -= requested;
        } else {
            self.mips_available = (self.mips_available + requested - self.mips_overcommit).min(self.mips_total);
            self.mips_overcommit = 0.;
        }
        unreserve(&mut self.ram_available, &mut self.ram_overcommit, vm.ram());
        unreserve(&mut self.bw_available, &mut self.bw_overcommit, vm.bw());
        unreserve(&mut self.storage_available, &mut self.storage_overcommit, vm.size());
        self.pes_reserved = self.pes_reserved.saturating_sub(vm.cores());
        true
    }

    fn rejected(&self, vm_id: VmId, reason: PlacementRejection) -> Error {
        Error::PlacementRejected {
            vm_id,
            host_id: self.id,
            reason,
        }
    }
}

fn reserve(available: &mut u64, overcommit: &mut u64, amount: u64) {
    if *available < amount {
        *overcommit += amount - *available;
        *available = 0;
    } else {
        *available -= amount;
    }
}

fn unreserve(available: &mut u64, overcommit: &mut u64, amount: u64) {
    if *overcommit >= amount {
        *overcommit -= amount;
    } else {
        *available += amount - *overcommit;
        *overcommit = 0;
    }
}
