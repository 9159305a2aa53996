//! Errors returned by the scheduling core.
//!
//! All rejections are local decisions handed back to the caller. Nothing here is fatal to the simulation.

use std::fmt::{Display, Formatter};

use thiserror::Error;

use crate::workload::WorkloadState;
use crate::{HostId, VmId, WorkloadId};

/// Reason why a host refused to accept a VM.
#[derive(Clone, Debug, PartialEq)]
pub enum PlacementRejection {
    NotEnoughCpu { requested: f64, available: f64 },
    NotEnoughCores { requested: u32, available: u32 },
    PeTooSlow { requested: f64, fastest: f64 },
    NotEnoughMemory { requested: u64, available: u64 },
    NotEnoughBandwidth { requested: u64, available: u64 },
    NotEnoughStorage { requested: u64, available: u64 },
    AlreadyPlaced(HostId),
}

impl Display for PlacementRejection {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            PlacementRejection::NotEnoughCpu { requested, available } => {
                write!(f, "not enough cpu: requested {} MIPS, available {} MIPS", requested, available)
            }
            PlacementRejection::NotEnoughCores { requested, available } => {
                write!(f, "not enough cores: requested {}, host has {}", requested, available)
            }
            PlacementRejection::PeTooSlow { requested, fastest } => {
                write!(f, "requested {} MIPS per core, fastest PE has {} MIPS", requested, fastest)
            }
            PlacementRejection::NotEnoughMemory { requested, available } => {
                write!(f, "not enough memory: requested {}, available {}", requested, available)
            }
            PlacementRejection::NotEnoughBandwidth { requested, available } => {
                write!(f, "not enough bandwidth: requested {}, available {}", requested, available)
            }
            PlacementRejection::NotEnoughStorage { requested, available } => {
                write!(f, "not enough storage: requested {}, available {}", requested, available)
            }
            PlacementRejection::AlreadyPlaced(host_id) => write!(f, "already placed on host #{}", host_id),
        }
    }
}

/// Reason why a VM refused to admit a workload.
#[derive(Clone, Debug, PartialEq)]
pub enum AdmissionRejection {
    VmNotPlaced,
    NotEnoughCores { requested: u32, available: u32 },
    BoundToOtherVm(VmId),
    WrongState(WorkloadState),
}

impl Display for AdmissionRejection {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            AdmissionRejection::VmNotPlaced => write!(f, "vm is not placed on any host"),
            AdmissionRejection::NotEnoughCores { requested, available } => {
                write!(f, "workload needs {} cores, vm has {}", requested, available)
            }
            AdmissionRejection::BoundToOtherVm(vm_id) => write!(f, "workload is bound to vm #{}", vm_id),
            AdmissionRejection::WrongState(state) => write!(f, "workload is {}", state),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid capacity request: {field} = {value}")]
    InvalidCapacityRequest { field: &'static str, value: f64 },

    #[error("placement of vm #{vm_id} on host #{host_id} rejected: {reason}")]
    PlacementRejected {
        vm_id: VmId,
        host_id: HostId,
        reason: PlacementRejection,
    },

    #[error("admission of workload #{workload_id} into vm #{vm_id} rejected: {reason}")]
    AdmissionRejected {
        workload_id: WorkloadId,
        vm_id: VmId,
        reason: AdmissionRejection,
    },

    #[error("placement of vm #{vm_id} rejected: no suitable host")]
    NoSuitableHost { vm_id: VmId },

    #[error("consumer {0} is listed more than once")]
    DuplicateConsumer(String),

    #[error("host #{0} not found")]
    HostNotFound(HostId),

    #[error("vm #{0} not found")]
    VmNotFound(VmId),

    #[error("workload #{0} not found")]
    WorkloadNotFound(WorkloadId),

    #[error("workload #{0} is already finished")]
    WorkloadFinished(WorkloadId),

    #[error("host allocation incomplete: expected {expected} results, received {received}")]
    AllocationIncomplete { expected: usize, received: usize },

    #[error("{kind} #{id} already exists")]
    AlreadyExists { kind: &'static str, id: u32 },

    #[error("simulation time can't go backwards: current {current}, requested {requested}")]
    TimeWentBackwards { current: f64, requested: f64 },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("can't read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("can't parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("can't write CSV: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Checks that `value` is a finite number strictly greater than zero.
pub(crate) fn ensure_positive(field: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0. {
        Ok(value)
    } else {
        Err(Error::InvalidCapacityRequest { field, value })
    }
}

/// Checks that `value` is a finite non-negative number.
pub(crate) fn ensure_non_negative(field: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() && value >= 0. {
        Ok(value)
    } else {
        Err(Error::InvalidCapacityRequest { field, value })
    }
}
