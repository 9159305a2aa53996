use std::collections::BTreeMap;

use crate::allocation::{allocate_host, allocate_hosts, HostSnapshot, VmSnapshot};
use crate::error::{Error, PlacementRejection};
use crate::host::{Host, OversubscriptionPolicy};
use crate::monitoring::{UsageHistory, UtilizationAggregator};
use crate::pe::ProcessingElement;
use crate::time_shared::allocate;
use crate::utilization_model::{linear, resolve_utilization_model, sample};
use crate::vm::VirtualMachine;
use crate::workload::Workload;

fn assert_float_eq(x: f64, y: f64, eps: f64) {
    assert!((x - y).abs() < eps, "Values do not match: {:.15} vs {:.15}", x, y);
}

fn host(pes: u32, mips: f64, policy: OversubscriptionPolicy) -> Host {
    Host::new(0, ProcessingElement::uniform(pes, mips).unwrap(), 4096, 10000, 100000, policy).unwrap()
}

fn vm(id: u32, mips: f64, cores: u32) -> VirtualMachine {
    VirtualMachine::new(id, 0, mips, cores, 512, 1000, 10000).unwrap()
}

// Time-shared scheduler ----------------------------------------------------------------------------------------------

#[test]
// Without contention everybody gets the request.
fn test_no_contention() {
    let grants = allocate(1000., &[(1, 200.), (2, 300.), (3, 100.)]).unwrap();
    assert_eq!(grants, BTreeMap::from([(1, 200.), (2, 300.), (3, 100.)]));
}

#[test]
// Two VMs requesting 1000 MIPS each on a 1200 MIPS host get 600 each.
fn test_equal_contention() {
    let grants = allocate(1200., &[(1, 1000.), (2, 1000.)]).unwrap();
    assert_float_eq(grants[&1], 600., 1e-9);
    assert_float_eq(grants[&2], 600., 1e-9);
}

#[test]
// Small consumer keeps its request, the rest is split between the large ones.
fn test_water_filling() {
    let grants = allocate(1000., &[(1, 100.), (2, 800.), (3, 800.)]).unwrap();
    assert_float_eq(grants[&1], 100., 1e-9);
    assert_float_eq(grants[&2], 450., 1e-9);
    assert_float_eq(grants[&3], 450., 1e-9);
    assert_float_eq(grants.values().sum(), 1000., 1e-9);
}

#[test]
fn test_order_independence() {
    let forward = allocate(700., &[(1, 500.), (2, 50.), (3, 300.), (4, 300.)]).unwrap();
    let backward = allocate(700., &[(4, 300.), (3, 300.), (2, 50.), (1, 500.)]).unwrap();
    assert_eq!(forward, backward);
    assert_eq!(forward[&3], forward[&4]);
    assert!(forward[&1] <= 500.);
}

#[test]
fn test_zero_requests_and_capacity() {
    let grants = allocate(500., &[(1, 0.), (2, 1000.)]).unwrap();
    assert_eq!(grants[&1], 0.);
    assert_float_eq(grants[&2], 500., 1e-9);

    let grants = allocate(0., &[(1, 10.), (2, 20.)]).unwrap();
    assert!(grants.values().all(|grant| *grant == 0.));

    assert!(allocate::<u32>(100., &[]).unwrap().is_empty());
}

#[test]
// Under contention the grants add up to the capacity without exceeding it, for any mix of requests.
fn test_exact_conservation() {
    for count in 2..40u32 {
        for total_capacity in [1000., 1200., 2400., 999.9, 3.3, 123456.789] {
            let requests: Vec<(u32, f64)> = (0..count)
                .map(|i| (i, ((i * 7919 + count * 104729) % 1000) as f64 * 1.37 + 0.1 * i as f64 + 0.3))
                .collect();
            let grants = allocate(total_capacity, &requests).unwrap();
            let granted: f64 = grants.values().sum();
            let requested: f64 = requests.iter().map(|(_, request)| request).sum();
            if requested > total_capacity {
                assert!(
                    granted <= total_capacity,
                    "{} consumers on {}: granted {:.15}",
                    count,
                    total_capacity,
                    granted
                );
                assert_float_eq(granted, total_capacity, 1e-6);
            } else {
                assert_eq!(granted, requested);
            }
        }
    }
}

#[test]
fn test_invalid_requests() {
    assert!(matches!(
        allocate(100., &[(1, -5.)]),
        Err(Error::InvalidCapacityRequest { .. })
    ));
    assert!(matches!(
        allocate(-1., &[(1, 5.)]),
        Err(Error::InvalidCapacityRequest { .. })
    ));
    assert!(matches!(
        allocate(100., &[(1, f64::NAN)]),
        Err(Error::InvalidCapacityRequest { .. })
    ));
    assert!(matches!(
        allocate(100., &[(1, 5.), (1, 6.)]),
        Err(Error::DuplicateConsumer(_))
    ));
}

// Host capacity manager ----------------------------------------------------------------------------------------------

#[test]
// Strict host rejects VM exceeding free capacity and keeps its state unchanged.
fn test_strict_rejection() {
    let mut host = host(2, 600., OversubscriptionPolicy::Strict);
    let first = vm(1, 500., 2);
    let second = vm(2, 500., 1);
    host.place(&first).unwrap();
    assert_float_eq(host.available_mips(), 200., 1e-9);

    let available_ram = host.available_ram();
    let err = host.place(&second).unwrap_err();
    match err {
        Error::PlacementRejected { vm_id, host_id, reason } => {
            assert_eq!(vm_id, 2);
            assert_eq!(host_id, 0);
            assert!(matches!(reason, PlacementRejection::NotEnoughCpu { .. }));
        }
        e => panic!("unexpected error: {}", e),
    }
    assert_float_eq(host.available_mips(), 200., 1e-9);
    assert_eq!(host.available_ram(), available_ram);
    assert_eq!(host.vms().collect::<Vec<_>>(), vec![1]);
}

#[test]
fn test_strict_core_checks() {
    let host = host(2, 600., OversubscriptionPolicy::Strict);
    assert_eq!(
        host.can_place(&vm(1, 100., 3)),
        Err(PlacementRejection::NotEnoughCores {
            requested: 3,
            available: 2
        })
    );
    assert!(matches!(
        host.can_place(&vm(1, 700., 1)),
        Err(PlacementRejection::PeTooSlow { .. })
    ));
}

#[test]
// Oversubscribing host accepts everything and counts the excess as overcommit.
fn test_oversubscription() {
    let mut host = host(1, 1200., OversubscriptionPolicy::Oversubscribe);
    host.place(&vm(1, 1000., 1)).unwrap();
    host.place(&vm(2, 1000., 1)).unwrap();
    assert_eq!(host.available_mips(), 0.);
    assert_float_eq(host.mips_overcommit(), 800., 1e-9);
    assert_eq!(host.vms().count(), 2);

    assert!(host.release(&vm(2, 1000., 1)));
    assert_eq!(host.mips_overcommit(), 0.);
    assert_float_eq(host.available_mips(), 200., 1e-9);
    assert!(!host.release(&vm(2, 1000., 1)));
}

#[test]
fn test_place_twice() {
    let mut host = host(4, 1000., OversubscriptionPolicy::Strict);
    let vm = vm(7, 100., 1);
    host.place(&vm).unwrap();
    assert!(matches!(
        host.place(&vm),
        Err(Error::PlacementRejected {
            reason: PlacementRejection::AlreadyPlaced(0),
            ..
        })
    ));
    assert_eq!(host.free_pes(), 3);
}

// Two-level allocation -----------------------------------------------------------------------------------------------

#[test]
// VM envelope is shared among its workloads, unused part of the envelope is not consumed.
fn test_two_level_allocation() {
    let snapshot = HostSnapshot {
        host_id: 3,
        total_mips: 1200.,
        vms: vec![
            VmSnapshot {
                vm_id: 1,
                requested_mips: 1000.,
                workload_demands: vec![(10, 1000.), (11, 1000.)],
            },
            VmSnapshot {
                vm_id: 2,
                requested_mips: 1000.,
                workload_demands: vec![(12, 100.)],
            },
        ],
    };
    let allocation = allocate_host(&snapshot).unwrap();
    assert_eq!(allocation.host_id, 3);
    assert_float_eq(allocation.vms[0].granted_mips, 600., 1e-9);
    assert_float_eq(allocation.vms[0].workload_grants[&10], 300., 1e-9);
    assert_float_eq(allocation.vms[0].workload_grants[&11], 300., 1e-9);
    assert_float_eq(allocation.vms[1].consumed_mips(), 100., 1e-9);
    assert!(allocation.consumed_mips() <= allocation.granted_mips() + 1e-9);
}

#[test]
fn test_parallel_allocation_matches_serial() {
    let snapshots: Vec<HostSnapshot> = (0..8)
        .map(|host_id| HostSnapshot {
            host_id,
            total_mips: 1000. + host_id as f64 * 100.,
            vms: (0..3)
                .map(|i| VmSnapshot {
                    vm_id: host_id * 10 + i,
                    requested_mips: 400. + i as f64 * 50.,
                    workload_demands: vec![(host_id * 100 + i, 300.), (host_id * 100 + 50 + i, 200.)],
                })
                .collect(),
        })
        .collect();
    let pool = threadpool::ThreadPool::new(4);
    let serial = allocate_hosts(snapshots.clone(), None).unwrap();
    let parallel = allocate_hosts(snapshots, Some(&pool)).unwrap();
    assert_eq!(serial, parallel);
}

// Workload and models ------------------------------------------------------------------------------------------------

#[test]
// Length is counted per core: 2 cores granted 1000 MIPS advance by 500 MI per time unit.
fn test_workload_progress() {
    let mut workload = Workload::new(0, 0, 1000., 2).unwrap();
    assert_eq!(workload.progress(0., 1., 1000.), None);
    assert_float_eq(workload.finished_length(), 500., 1e-9);
    let finish = workload.progress(1., 2., 1000.).unwrap();
    assert_float_eq(finish, 2., 1e-9);
    assert_eq!(workload.finished_length(), 1000.);
    assert_eq!(workload.progress(3., 1., 0.), None);
}

#[test]
fn test_utilization_models() {
    let model = linear(0.2, 0.1);
    assert_float_eq(sample(&model, 0.), 0.2, 1e-12);
    assert_float_eq(sample(&model, 5.), 0.7, 1e-12);
    assert_eq!(sample(&model, 100.), 1.);

    let model = resolve_utilization_model("Constant[fraction=0.5]").unwrap();
    assert_eq!(sample(&model, 3.), 0.5);
    let model = resolve_utilization_model("Null").unwrap();
    assert_eq!(sample(&model, 3.), 0.);
    assert!(resolve_utilization_model("Linear[initial=0.5]").is_err());
    assert!(resolve_utilization_model("Quadratic").is_err());
}

// Aggregator ---------------------------------------------------------------------------------------------------------

#[test]
fn test_aggregator_step_function() {
    let mut aggregator = UtilizationAggregator::new();
    aggregator.record(0., 1, Some(0), 1000., 800.);
    aggregator.record(2., 1, Some(0), 1000., 800.);
    aggregator.record(3., 1, Some(1), 1000., 500.);
    aggregator.record(3., 1, Some(1), 1000., 400.);
    aggregator.record(0., 2, Some(0), 200., 200.);
    aggregator.record(5., 2, None, 0., 0.);

    assert_eq!(aggregator.timeline(1).len(), 2);
    assert_eq!(aggregator.total_cpu_utilization_mips(0, 2.5), 1000.);
    assert_eq!(aggregator.total_cpu_utilization_mips(0, 3.), 200.);
    assert_eq!(aggregator.total_cpu_utilization_mips(1, 3.), 400.);
    assert_eq!(aggregator.total_cpu_utilization_mips(0, 5.), 0.);
    assert_eq!(aggregator.vm_cpu_utilization_mips(2, 6.), 0.);

    let history = aggregator.history(0, 6., 1.).unwrap();
    let times: Vec<f64> = history.iter().map(|sample| sample.time).collect();
    assert_eq!(times, vec![0., 1., 2., 3., 4.]);
    assert!(aggregator.history(0, 6., 0.).is_err());
}

#[test]
fn test_empty_history() {
    let aggregator = UtilizationAggregator::new();
    let history = UsageHistory::collect(&aggregator, [0, 1], 10., 1.).unwrap();
    assert_eq!(history, UsageHistory::NoUsage);
    assert_eq!(history.entry_count(), 0);
    assert!(history.host_samples(0).is_empty());
}
