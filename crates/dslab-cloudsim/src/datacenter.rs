//! Datacenter: hosts, VMs, workloads and the placement table between them.

use std::collections::BTreeMap;

use threadpool::ThreadPool;

use crate::allocation::{allocate_host, allocate_hosts, HostAllocation, HostSnapshot, VmSnapshot};
use crate::error::{ensure_positive, AdmissionRejection, Error, PlacementRejection, Result};
use crate::host::{Host, OversubscriptionPolicy};
use crate::monitoring::{UsageHistory, UtilizationAggregator, UtilizationSample};
use crate::pe::ProcessingElement;
use crate::placement::VmPlacementAlgorithm;
use crate::vm::VirtualMachine;
use crate::workload::{Workload, WorkloadState};
use crate::{log_debug, log_error, log_info, log_trace};
use crate::{HostId, VmId, WorkloadId, EPSILON};

/// Outcome of a tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickSummary {
    pub time: f64,
    /// Workloads that reached their length during the tick.
    pub finished: Vec<WorkloadId>,
}

/// Execution state of a workload as seen by collaborators.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkloadProgress {
    pub state: WorkloadState,
    pub finished_length: f64,
    pub length: f64,
}

/// Holds every simulated entity and recomputes the capacity shares.
///
/// Hosts keep IDs of their VMs and the placement table maps each placed VM to its host, so there are no cyclic
/// references. Workloads are kept in a single table, a VM only holds the IDs of the workloads admitted into it.
///
/// Any change of host or VM membership (placement, release, admission, cancellation) reallocates the affected host
/// immediately, and [`advance_tick`](Self::advance_tick) reallocates all hosts. Thus the current allocation always
/// matches the current membership and no entity gets a partial grant.
pub struct Datacenter {
    name: String,
    clock: f64,
    sampling_interval: f64,
    next_host_id: HostId,
    hosts: BTreeMap<HostId, Host>,
    vms: BTreeMap<VmId, VirtualMachine>,
    workloads: BTreeMap<WorkloadId, Workload>,
    placements: BTreeMap<VmId, HostId>,
    aggregator: UtilizationAggregator,
    pool: Option<ThreadPool>,
}

impl Datacenter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            clock: 0.,
            sampling_interval: 1.,
            next_host_id: 0,
            hosts: BTreeMap::new(),
            vms: BTreeMap::new(),
            workloads: BTreeMap::new(),
            placements: BTreeMap::new(),
            aggregator: UtilizationAggregator::new(),
            pool: None,
        }
    }

    /// Computes host allocations on a pool of `threads` workers (one means in the calling thread).
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.pool = if threads > 1 {
            Some(ThreadPool::with_name(format!("{}-alloc", self.name), threads))
        } else {
            None
        };
        self
    }

    /// Sets the interval between utilization history samples.
    pub fn with_sampling_interval(mut self, interval: f64) -> Result<Self> {
        self.sampling_interval = ensure_positive("sampling interval", interval)?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current simulated time.
    pub fn time(&self) -> f64 {
        self.clock
    }

    pub fn sampling_interval(&self) -> f64 {
        self.sampling_interval
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    pub fn host(&self, host_id: HostId) -> Result<&Host> {
        self.hosts.get(&host_id).ok_or(Error::HostNotFound(host_id))
    }

    pub fn vms(&self) -> impl Iterator<Item = &VirtualMachine> {
        self.vms.values()
    }

    pub fn vm(&self, vm_id: VmId) -> Result<&VirtualMachine> {
        self.vms.get(&vm_id).ok_or(Error::VmNotFound(vm_id))
    }

    pub fn workloads(&self) -> impl Iterator<Item = &Workload> {
        self.workloads.values()
    }

    pub fn workload(&self, workload_id: WorkloadId) -> Result<&Workload> {
        self.workloads
            .get(&workload_id)
            .ok_or(Error::WorkloadNotFound(workload_id))
    }

    pub fn aggregator(&self) -> &UtilizationAggregator {
        &self.aggregator
    }

    /// Host the VM is placed on.
    pub fn vm_host(&self, vm_id: VmId) -> Option<HostId> {
        self.placements.get(&vm_id).copied()
    }

    // Hosts and VMs --------------------------------------------------------------------------------------------------

    /// Creates host with the next free ID.
    pub fn create_host(
        &mut self,
        pes: Vec<ProcessingElement>,
        ram: u64,
        bw: u64,
        storage: u64,
        policy: OversubscriptionPolicy,
    ) -> Result<HostId> {
        let host = Host::new(self.next_host_id, pes, ram, bw, storage, policy)?;
        self.add_host(host)
    }

    /// Adds host created by the caller.
    pub fn add_host(&mut self, host: Host) -> Result<HostId> {
        let id = host.id;
        if self.hosts.contains_key(&id) {
            return Err(Error::AlreadyExists { kind: "host", id });
        }
        log_debug!(
            self,
            "host #{} added: {} PEs, {} MIPS, {:?} policy",
            id,
            host.pes().len(),
            host.total_mips(),
            host.policy()
        );
        self.hosts.insert(id, host);
        self.next_host_id = self.next_host_id.max(id + 1);
        Ok(id)
    }

    /// Registers unplaced VM.
    pub fn add_vm(&mut self, vm: VirtualMachine) -> Result<VmId> {
        let id = vm.id;
        if self.vms.contains_key(&id) {
            return Err(Error::AlreadyExists { kind: "vm", id });
        }
        self.vms.insert(id, vm);
        Ok(id)
    }

    /// Places the VM on the host. On rejection nothing is changed.
    pub fn place_vm(&mut self, host_id: HostId, vm_id: VmId) -> Result<()> {
        let vm = self.vms.get(&vm_id).ok_or(Error::VmNotFound(vm_id))?;
        if let Some(&current) = self.placements.get(&vm_id) {
            return Err(Error::PlacementRejected {
                vm_id,
                host_id,
                reason: PlacementRejection::AlreadyPlaced(current),
            });
        }
        let host = self.hosts.get_mut(&host_id).ok_or(Error::HostNotFound(host_id))?;
        if let Err(e) = host.place(vm) {
            log_debug!(self, "{}", e);
            return Err(e);
        }
        self.placements.insert(vm_id, host_id);
        log_debug!(self, "vm #{} placed on host #{}", vm_id, host_id);
        self.reallocate_host(host_id)
    }

    /// Places the VM on the host selected by the algorithm.
    pub fn place_vm_with(&mut self, algorithm: &dyn VmPlacementAlgorithm, vm_id: VmId) -> Result<HostId> {
        let vm = self.vms.get(&vm_id).ok_or(Error::VmNotFound(vm_id))?;
        if let Some(&current) = self.placements.get(&vm_id) {
            return Err(Error::PlacementRejected {
                vm_id,
                host_id: current,
                reason: PlacementRejection::AlreadyPlaced(current),
            });
        }
        match algorithm.select_host(vm, &self.hosts) {
            Some(host_id) => self.place_vm(host_id, vm_id).map(|_| host_id),
            None => {
                log_debug!(self, "no suitable host for vm #{}", vm_id);
                Err(Error::NoSuitableHost { vm_id })
            }
        }
    }

    /// Removes the VM from its host. The workloads running in it go back to `Bound` keeping their progress.
    ///
    /// Returns `false` if the VM was not placed.
    pub fn deallocate_vm(&mut self, vm_id: VmId) -> Result<bool> {
        let vm = self.vms.get_mut(&vm_id).ok_or(Error::VmNotFound(vm_id))?;
        let host_id = match self.placements.remove(&vm_id) {
            Some(host_id) => host_id,
            None => return Ok(false),
        };
        if let Some(host) = self.hosts.get_mut(&host_id) {
            host.release(vm);
        }
        for workload_id in vm.drain_workloads() {
            if let Some(workload) = self.workloads.get_mut(&workload_id) {
                workload.set_state(WorkloadState::Bound { vm_id });
            }
        }
        self.aggregator.record(self.clock, vm_id, None, 0., 0.);
        log_debug!(self, "vm #{} released from host #{}", vm_id, host_id);
        self.reallocate_host(host_id)?;
        Ok(true)
    }

    // Workloads ------------------------------------------------------------------------------------------------------

    /// Registers workload for execution.
    pub fn submit_workload(&mut self, mut workload: Workload) -> Result<WorkloadId> {
        let id = workload.id;
        if self.workloads.contains_key(&id) {
            return Err(Error::AlreadyExists { kind: "workload", id });
        }
        workload.set_state(WorkloadState::Submitted);
        self.workloads.insert(id, workload);
        Ok(id)
    }

    /// Binds submitted workload to the VM it should run in.
    pub fn bind_workload(&mut self, workload_id: WorkloadId, vm_id: VmId) -> Result<()> {
        if !self.vms.contains_key(&vm_id) {
            return Err(Error::VmNotFound(vm_id));
        }
        let workload = self
            .workloads
            .get_mut(&workload_id)
            .ok_or(Error::WorkloadNotFound(workload_id))?;
        match workload.state() {
            WorkloadState::Submitted | WorkloadState::Bound { .. } => {
                workload.set_state(WorkloadState::Bound { vm_id });
                Ok(())
            }
            state => Err(Error::AdmissionRejected {
                workload_id,
                vm_id,
                reason: AdmissionRejection::WrongState(state.clone()),
            }),
        }
    }

    /// Admits workload into the scheduler of a placed VM and returns its slot.
    pub fn admit_workload(&mut self, vm_id: VmId, workload_id: WorkloadId) -> Result<usize> {
        let vm = self.vms.get(&vm_id).ok_or(Error::VmNotFound(vm_id))?;
        let workload = self
            .workloads
            .get(&workload_id)
            .ok_or(Error::WorkloadNotFound(workload_id))?;
        let rejected = |reason| Error::AdmissionRejected {
            workload_id,
            vm_id,
            reason,
        };

        match workload.state() {
            WorkloadState::Submitted => {}
            WorkloadState::Bound { vm_id: bound } if *bound == vm_id => {}
            WorkloadState::Bound { vm_id: bound } => return Err(rejected(AdmissionRejection::BoundToOtherVm(*bound))),
            state => return Err(rejected(AdmissionRejection::WrongState(state.clone()))),
        }
        let host_id = match self.placements.get(&vm_id) {
            Some(&host_id) => host_id,
            None => return Err(rejected(AdmissionRejection::VmNotPlaced)),
        };
        if workload.cores() > vm.cores() {
            return Err(rejected(AdmissionRejection::NotEnoughCores {
                requested: workload.cores(),
                available: vm.cores(),
            }));
        }

        let slot = self
            .vms
            .get_mut(&vm_id)
            .map(|vm| vm.admit(workload_id))
            .ok_or(Error::VmNotFound(vm_id))?;
        if let Some(workload) = self.workloads.get_mut(&workload_id) {
            workload.mark_admitted(vm_id, slot, self.clock);
        }
        log_debug!(self, "workload #{} admitted to vm #{} (slot {})", workload_id, vm_id, slot);
        self.reallocate_host(host_id)?;
        Ok(slot)
    }

    /// Admits every bound workload whose VM is placed. Returns the rejections, workloads bound to unplaced VMs stay
    /// `Bound`.
    pub fn admit_bound_workloads(&mut self) -> Vec<Error> {
        let bound: Vec<(WorkloadId, VmId)> = self
            .workloads
            .values()
            .filter_map(|workload| match workload.state() {
                WorkloadState::Bound { vm_id } => Some((workload.id, *vm_id)),
                _ => None,
            })
            .collect();
        bound
            .into_iter()
            .filter_map(|(workload_id, vm_id)| self.admit_workload(vm_id, workload_id).err())
            .collect()
    }

    /// Cancels workload. An executing workload is removed from its VM scheduler, its progress is kept for reporting.
    pub fn cancel_workload(&mut self, workload_id: WorkloadId) -> Result<()> {
        let workload = self
            .workloads
            .get_mut(&workload_id)
            .ok_or(Error::WorkloadNotFound(workload_id))?;
        let state = workload.state().clone();
        match state {
            WorkloadState::Finished { .. } => return Err(Error::WorkloadFinished(workload_id)),
            WorkloadState::Canceled => return Ok(()),
            _ => workload.set_state(WorkloadState::Canceled),
        }
        if state.is_active() {
            if let Some(vm_id) = state.vm_id() {
                if let Some(vm) = self.vms.get_mut(&vm_id) {
                    vm.remove_workload(workload_id);
                }
                log_debug!(self, "workload #{} canceled on vm #{}", workload_id, vm_id);
                if let Some(host_id) = self.vm_host(vm_id) {
                    self.reallocate_host(host_id)?;
                }
            }
        }
        Ok(())
    }

    /// Whether any workload is admitted or running.
    pub fn has_active_workloads(&self) -> bool {
        self.workloads.values().any(|workload| workload.state().is_active())
    }

    // Clock ----------------------------------------------------------------------------------------------------------

    /// Moves simulated time to `time`.
    ///
    /// Progress over `[previous, time)` is accumulated with the shares computed at the previous tick, finished
    /// workloads leave their VMs and then all hosts are reallocated at `time`.
    pub fn advance_tick(&mut self, time: f64) -> Result<TickSummary> {
        if !time.is_finite() || time < self.clock - EPSILON {
            return Err(Error::TimeWentBackwards {
                current: self.clock,
                requested: time,
            });
        }
        let time = time.max(self.clock);
        let from = self.clock;
        let duration = time - from;

        let mut finished = Vec::new();
        if duration > 0. {
            let Self {
                vms,
                workloads,
                placements,
                ..
            } = self;
            for (&vm_id, vm) in vms.iter_mut() {
                if !placements.contains_key(&vm_id) {
                    continue;
                }
                for workload_id in vm.workloads().to_vec() {
                    let grant = vm.workload_grant(workload_id);
                    let workload = match workloads.get_mut(&workload_id) {
                        Some(workload) => workload,
                        None => continue,
                    };
                    if let Some(finish_time) = workload.progress(from, duration, grant) {
                        workload.set_state(WorkloadState::Finished { vm_id });
                        vm.remove_workload(workload_id);
                        finished.push((workload_id, vm_id, finish_time));
                    }
                }
            }
        }

        self.clock = time;
        for (workload_id, vm_id, finish_time) in &finished {
            log_info!(
                self,
                "workload #{} finished on vm #{} at {:.3}",
                workload_id,
                vm_id,
                finish_time
            );
        }
        self.reallocate_all()?;
        Ok(TickSummary {
            time,
            finished: finished.into_iter().map(|(workload_id, _, _)| workload_id).collect(),
        })
    }

    // Reporting ------------------------------------------------------------------------------------------------------

    /// Sum of CPU consumed at `time` by the VMs placed on the host at that time.
    pub fn total_cpu_utilization_mips(&self, host_id: HostId, time: f64) -> Result<f64> {
        self.host(host_id)?;
        Ok(self.aggregator.total_cpu_utilization_mips(host_id, time))
    }

    /// Positive utilization samples of the host from time zero to the current time.
    pub fn host_utilization_history(&self, host_id: HostId) -> Result<Vec<UtilizationSample>> {
        self.host(host_id)?;
        self.aggregator.history(host_id, self.clock, self.sampling_interval)
    }

    /// Utilization history of all hosts from time zero to the current time.
    pub fn usage_history(&self) -> Result<UsageHistory> {
        UsageHistory::collect(
            &self.aggregator,
            self.hosts.keys().copied(),
            self.clock,
            self.sampling_interval,
        )
    }

    pub fn workload_state(&self, workload_id: WorkloadId) -> Result<WorkloadProgress> {
        let workload = self.workload(workload_id)?;
        Ok(WorkloadProgress {
            state: workload.state().clone(),
            finished_length: workload.finished_length(),
            length: workload.length(),
        })
    }

    /// Finished workloads of the owner ordered by ID.
    pub fn finished_workloads(&self, owner_id: u32) -> Vec<&Workload> {
        self.workloads
            .values()
            .filter(|workload| workload.owner_id == owner_id)
            .filter(|workload| matches!(workload.state(), WorkloadState::Finished { .. }))
            .collect()
    }

    /// Workloads bound to VMs that are not placed on any host. They never progress.
    pub fn orphaned_workloads(&self) -> Vec<&Workload> {
        self.workloads
            .values()
            .filter(|workload| match workload.state() {
                WorkloadState::Bound { vm_id } => !self.placements.contains_key(vm_id),
                _ => false,
            })
            .collect()
    }

    /// RAM used by the VM workloads at the current time according to their RAM models.
    pub fn vm_ram_usage(&self, vm_id: VmId) -> Result<f64> {
        let vm = self.vm(vm_id)?;
        Ok(self.resource_fraction(vm, Workload::ram_utilization) * vm.ram() as f64)
    }

    /// Bandwidth used by the VM workloads at the current time according to their bandwidth models.
    pub fn vm_bw_usage(&self, vm_id: VmId) -> Result<f64> {
        let vm = self.vm(vm_id)?;
        Ok(self.resource_fraction(vm, Workload::bw_utilization) * vm.bw() as f64)
    }

    fn resource_fraction(&self, vm: &VirtualMachine, utilization: fn(&Workload, f64) -> f64) -> f64 {
        if !self.placements.contains_key(&vm.id) {
            return 0.;
        }
        let fraction: f64 = vm
            .workloads()
            .iter()
            .filter_map(|workload_id| self.workloads.get(workload_id))
            .map(|workload| utilization(workload, self.clock))
            .sum();
        fraction.min(1.)
    }

    // Allocation -----------------------------------------------------------------------------------------------------

    fn snapshot(&self, host: &Host) -> HostSnapshot {
        let vms = host
            .vms()
            .filter_map(|vm_id| self.vms.get(&vm_id))
            .map(|vm| VmSnapshot {
                vm_id: vm.id,
                requested_mips: vm.requested_mips(),
                workload_demands: vm
                    .workloads()
                    .iter()
                    .filter_map(|workload_id| self.workloads.get(workload_id))
                    .map(|workload| (workload.id, workload.cpu_demand(self.clock, vm.mips_per_core())))
                    .collect(),
            })
            .collect();
        HostSnapshot {
            host_id: host.id,
            total_mips: host.total_mips(),
            vms,
        }
    }

    fn reallocate_host(&mut self, host_id: HostId) -> Result<()> {
        let host = self.host(host_id)?;
        let allocation = allocate_host(&self.snapshot(host))?;
        self.apply(allocation);
        Ok(())
    }

    fn reallocate_all(&mut self) -> Result<()> {
        let snapshots = self.hosts.values().map(|host| self.snapshot(host)).collect();
        let allocations = allocate_hosts(snapshots, self.pool.as_ref()).map_err(|e| {
            log_error!(self, "tick allocation failed, previous grants are kept: {}", e);
            e
        })?;
        for allocation in allocations {
            self.apply(allocation);
        }
        Ok(())
    }

    fn apply(&mut self, allocation: HostAllocation) {
        log_trace!(
            self,
            "host #{}: {:.3} MIPS granted, {:.3} MIPS consumed",
            allocation.host_id,
            allocation.granted_mips(),
            allocation.consumed_mips()
        );
        for vm_allocation in allocation.vms {
            let vm_id = vm_allocation.vm_id;
            for workload_id in vm_allocation.workload_grants.keys() {
                if let Some(workload) = self.workloads.get_mut(workload_id) {
                    workload.mark_running(vm_id, self.clock);
                }
            }
            self.aggregator.record(
                self.clock,
                vm_id,
                Some(allocation.host_id),
                vm_allocation.granted_mips,
                vm_allocation.consumed_mips(),
            );
            if let Some(vm) = self.vms.get_mut(&vm_id) {
                vm.set_allocation(vm_allocation.granted_mips, vm_allocation.workload_grants);
            }
        }
    }
}
