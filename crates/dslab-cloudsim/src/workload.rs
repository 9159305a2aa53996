//! Workload (cloudlet) and its execution state.

use std::fmt::{Display, Formatter};

use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;

use crate::error::{ensure_positive, Result};
use crate::utilization_model::{full, sample, UtilizationModel};
use crate::{VmId, WorkloadId, EPSILON};

/// Lifecycle of a workload.
///
/// `Created -> Submitted -> Bound -> Admitted -> Running -> Finished`. A workload bound to a VM that never gets
/// placed stays `Bound`: it is not an error, it simply never makes progress.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum WorkloadState {
    Created,
    Submitted,
    Bound { vm_id: VmId },
    Admitted { vm_id: VmId, slot: usize },
    Running { vm_id: VmId },
    Finished { vm_id: VmId },
    Canceled,
}

impl WorkloadState {
    /// VM the workload is bound to, if any.
    pub fn vm_id(&self) -> Option<VmId> {
        match self {
            WorkloadState::Bound { vm_id }
            | WorkloadState::Admitted { vm_id, .. }
            | WorkloadState::Running { vm_id }
            | WorkloadState::Finished { vm_id } => Some(*vm_id),
            WorkloadState::Created | WorkloadState::Submitted | WorkloadState::Canceled => None,
        }
    }

    /// Whether the workload sits in a VM scheduler.
    pub fn is_active(&self) -> bool {
        matches!(self, WorkloadState::Admitted { .. } | WorkloadState::Running { .. })
    }
}

impl Display for WorkloadState {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            WorkloadState::Created => write!(f, "created"),
            WorkloadState::Submitted => write!(f, "submitted"),
            WorkloadState::Bound { vm_id } => write!(f, "bound to vm #{}", vm_id),
            WorkloadState::Admitted { vm_id, slot } => write!(f, "admitted to vm #{} (slot {})", vm_id, slot),
            WorkloadState::Running { vm_id } => write!(f, "running on vm #{}", vm_id),
            WorkloadState::Finished { vm_id } => write!(f, "finished on vm #{}", vm_id),
            WorkloadState::Canceled => write!(f, "canceled"),
        }
    }
}

/// Represents a unit of work executed inside a VM.
///
/// The instruction length is counted per core (in millions of instructions): a workload using `c` cores and granted
/// `g` MIPS advances by `g / c` million instructions per time unit.
#[derive(Clone)]
pub struct Workload {
    pub id: WorkloadId,
    pub owner_id: u32,
    length: f64,
    cores: u32,
    file_size: u64,
    output_size: u64,
    cpu_model: UtilizationModel,
    ram_model: UtilizationModel,
    bw_model: UtilizationModel,

    state: WorkloadState,
    finished_length: f64,
    admission_time: Option<f64>,
    start_time: Option<f64>,
    finish_time: Option<f64>,
}

impl Serialize for Workload {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Workload", 9)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("owner_id", &self.owner_id)?;
        state.serialize_field("vm_id", &self.state.vm_id())?;
        state.serialize_field("state", &self.state.to_string())?;
        state.serialize_field("length", &self.length)?;
        state.serialize_field("finished_length", &self.finished_length)?;
        state.serialize_field("cores", &self.cores)?;
        state.serialize_field("start_time", &self.start_time)?;
        state.serialize_field("finish_time", &self.finish_time)?;
        state.end()
    }
}

impl Workload {
    /// Creates workload with full utilization of all resources.
    pub fn new(id: WorkloadId, owner_id: u32, length: f64, cores: u32) -> Result<Self> {
        let length = ensure_positive("workload length", length)?;
        ensure_positive("workload cores", cores as f64)?;
        Ok(Self {
            id,
            owner_id,
            length,
            cores,
            file_size: 0,
            output_size: 0,
            cpu_model: full(),
            ram_model: full(),
            bw_model: full(),
            state: WorkloadState::Created,
            finished_length: 0.,
            admission_time: None,
            start_time: None,
            finish_time: None,
        })
    }

    pub fn with_file_sizes(mut self, file_size: u64, output_size: u64) -> Self {
        self.file_size = file_size;
        self.output_size = output_size;
        self
    }

    pub fn with_cpu_model(mut self, model: UtilizationModel) -> Self {
        self.cpu_model = model;
        self
    }

    pub fn with_ram_model(mut self, model: UtilizationModel) -> Self {
        self.ram_model = model;
        self
    }

    pub fn with_bw_model(mut self, model: UtilizationModel) -> Self {
        self.bw_model = model;
        self
    }

    /// Uses the same model for CPU, RAM and bandwidth.
    pub fn with_utilization_model(self, model: UtilizationModel) -> Self {
        self.with_cpu_model(model.clone())
            .with_ram_model(model.clone())
            .with_bw_model(model)
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn cores(&self) -> u32 {
        self.cores
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn output_size(&self) -> u64 {
        self.output_size
    }

    pub fn state(&self) -> &WorkloadState {
        &self.state
    }

    /// Executed instructions per core, in millions.
    pub fn finished_length(&self) -> f64 {
        self.finished_length
    }

    pub fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    pub fn finish_time(&self) -> Option<f64> {
        self.finish_time
    }

    /// Time spent executing, if the workload has finished.
    pub fn execution_time(&self) -> Option<f64> {
        Some(self.finish_time? - self.start_time?)
    }

    /// Time since admission into the VM scheduler, used as the argument of utilization models.
    pub fn elapsed(&self, time: f64) -> f64 {
        self.admission_time.map_or(0., |admitted| time - admitted)
    }

    /// CPU capacity the workload wants at `time` when running on cores of `mips_per_core`.
    pub fn cpu_demand(&self, time: f64, mips_per_core: f64) -> f64 {
        sample(&self.cpu_model, self.elapsed(time)) * mips_per_core * self.cores as f64
    }

    pub fn ram_utilization(&self, time: f64) -> f64 {
        sample(&self.ram_model, self.elapsed(time))
    }

    pub fn bw_utilization(&self, time: f64) -> f64 {
        sample(&self.bw_model, self.elapsed(time))
    }

    pub(crate) fn set_state(&mut self, state: WorkloadState) {
        self.state = state;
    }

    pub(crate) fn mark_admitted(&mut self, vm_id: VmId, slot: usize, time: f64) {
        self.state = WorkloadState::Admitted { vm_id, slot };
        self.admission_time = Some(time);
    }

    pub(crate) fn mark_running(&mut self, vm_id: VmId, time: f64) {
        if let WorkloadState::Admitted { .. } = self.state {
            self.state = WorkloadState::Running { vm_id };
            if self.start_time.is_none() {
                self.start_time = Some(time);
            }
        }
    }

    /// Accumulates progress made during `[from, from + duration)` with `granted` MIPS.
    ///
    /// Returns the exact completion time if the workload has reached its length.
    pub(crate) fn progress(&mut self, from: f64, duration: f64, granted: f64) -> Option<f64> {
        if granted <= 0. || duration <= 0. {
            return None;
        }
        let rate = granted / self.cores as f64;
        let remaining = self.length - self.finished_length;
        if rate * duration >= remaining - EPSILON * self.length {
            self.finished_length = self.length;
            let finish_time = from + (remaining / rate).min(duration);
            self.finish_time = Some(finish_time);
            Some(finish_time)
        } else {
            self.finished_length += rate * duration;
            None
        }
    }
}
