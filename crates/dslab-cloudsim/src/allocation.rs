//! Per-tick two-level capacity allocation.
//!
//! The allocation of a host is computed from a [`HostSnapshot`] holding plain numbers only, so hosts can be computed
//! independently on a thread pool. All results of a tick are collected before any of them is applied.

use std::collections::BTreeMap;
use std::sync::mpsc;

use threadpool::ThreadPool;

use crate::error::{Error, Result};
use crate::time_shared::allocate;
use crate::{HostId, VmId, WorkloadId};

/// VM state needed to compute its share: requested capacity and workload demands at the tick.
#[derive(Clone, Debug)]
pub struct VmSnapshot {
    pub vm_id: VmId,
    pub requested_mips: f64,
    pub workload_demands: Vec<(WorkloadId, f64)>,
}

/// Host state needed to compute its allocation.
#[derive(Clone, Debug)]
pub struct HostSnapshot {
    pub host_id: HostId,
    pub total_mips: f64,
    pub vms: Vec<VmSnapshot>,
}

/// Capacity granted to a VM and split among its workloads.
#[derive(Clone, Debug, PartialEq)]
pub struct VmAllocation {
    pub vm_id: VmId,
    /// Envelope granted by the host scheduler.
    pub granted_mips: f64,
    pub workload_grants: BTreeMap<WorkloadId, f64>,
}

impl VmAllocation {
    /// Part of the envelope consumed by the workloads.
    pub fn consumed_mips(&self) -> f64 {
        self.workload_grants.values().sum()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HostAllocation {
    pub host_id: HostId,
    pub vms: Vec<VmAllocation>,
}

impl HostAllocation {
    /// Sum of VM envelopes.
    pub fn granted_mips(&self) -> f64 {
        self.vms.iter().map(|vm| vm.granted_mips).sum()
    }

    /// Sum of MIPS actually consumed by the workloads of all VMs.
    pub fn consumed_mips(&self) -> f64 {
        self.vms.iter().map(|vm| vm.consumed_mips()).sum()
    }
}

/// Applies the time-shared scheduler twice: host capacity to VM envelopes, then each envelope to the VM workloads.
pub fn allocate_host(snapshot: &HostSnapshot) -> Result<HostAllocation> {
    let requests: Vec<(VmId, f64)> = snapshot.vms.iter().map(|vm| (vm.vm_id, vm.requested_mips)).collect();
    let envelopes = allocate(snapshot.total_mips, &requests)?;

    let mut vms = Vec::with_capacity(snapshot.vms.len());
    for vm in &snapshot.vms {
        let granted_mips = envelopes.get(&vm.vm_id).copied().unwrap_or(0.);
        let workload_grants = allocate(granted_mips, &vm.workload_demands)?;
        vms.push(VmAllocation {
            vm_id: vm.vm_id,
            granted_mips,
            workload_grants,
        });
    }
    Ok(HostAllocation {
        host_id: snapshot.host_id,
        vms,
    })
}

/// Computes allocations of all hosts, in parallel if a pool is given. Results are ordered by host ID.
pub fn allocate_hosts(snapshots: Vec<HostSnapshot>, pool: Option<&ThreadPool>) -> Result<Vec<HostAllocation>> {
    let mut allocations = match pool {
        Some(pool) if snapshots.len() > 1 => {
            let (tx, rx) = mpsc::channel();
            let count = snapshots.len();
            for snapshot in snapshots {
                let tx = tx.clone();
                pool.execute(move || {
                    // the receiver outlives all jobs, send can't fail
                    let _ = tx.send(allocate_host(&snapshot));
                });
            }
            drop(tx);
            join_allocations(rx, count)?
        }
        _ => snapshots.iter().map(allocate_host).collect::<Result<Vec<_>>>()?,
    };
    allocations.sort_by_key(|allocation| allocation.host_id);
    Ok(allocations)
}

/// Receives `expected` host results. A job that panicked drops its sender without sending, which ends the channel
/// early and is reported as [`Error::AllocationIncomplete`].
fn join_allocations(rx: mpsc::Receiver<Result<HostAllocation>>, expected: usize) -> Result<Vec<HostAllocation>> {
    let allocations = rx.iter().take(expected).collect::<Result<Vec<_>>>()?;
    if allocations.len() != expected {
        return Err(Error::AllocationIncomplete {
            expected,
            received: allocations.len(),
        });
    }
    Ok(allocations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_host(host_id: HostId) -> HostAllocation {
        HostAllocation { host_id, vms: Vec::new() }
    }

    #[test]
    // A worker that never reports its host makes the whole tick fail.
    fn test_missing_result() {
        let (tx, rx) = mpsc::channel();
        tx.send(Ok(empty_host(0))).unwrap();
        tx.send(Ok(empty_host(1))).unwrap();
        drop(tx);
        assert!(matches!(
            join_allocations(rx, 3),
            Err(Error::AllocationIncomplete {
                expected: 3,
                received: 2
            })
        ));
    }

    #[test]
    fn test_all_results() {
        let (tx, rx) = mpsc::channel();
        for host_id in [2, 0, 1] {
            tx.send(Ok(empty_host(host_id))).unwrap();
        }
        drop(tx);
        let allocations = join_allocations(rx, 3).unwrap();
        assert_eq!(allocations.len(), 3);
    }

    #[test]
    // A panicking pool job is detected instead of leaving the grants of its host stale.
    fn test_panicking_worker() {
        let pool = ThreadPool::new(2);
        let (tx, rx) = mpsc::channel::<Result<HostAllocation>>();
        for host_id in 0..3 {
            let tx = tx.clone();
            pool.execute(move || {
                if host_id == 1 {
                    panic!("worker failed");
                }
                let _ = tx.send(Ok(empty_host(host_id)));
            });
        }
        drop(tx);
        assert!(matches!(
            join_allocations(rx, 3),
            Err(Error::AllocationIncomplete { received: 2, .. })
        ));
    }
}
