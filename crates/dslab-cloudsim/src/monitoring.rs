//! Utilization aggregation and history.

use std::collections::BTreeMap;
use std::fs::File;

use serde::Serialize;

use crate::error::{ensure_positive, Result};
use crate::{HostId, VmId, EPSILON};

/// VM allocation state valid from `time` until the next record.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VmUsageRecord {
    pub time: f64,
    /// Host the VM was placed on, `None` if unplaced.
    pub host_id: Option<HostId>,
    pub granted_mips: f64,
    pub consumed_mips: f64,
}

/// Host CPU utilization at a sampled time.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UtilizationSample {
    pub time: f64,
    pub host_id: HostId,
    pub cpu_mips: f64,
}

/// Stores the allocation timeline of every VM and sums it up per host.
///
/// Each timeline is a step function: a record holds until the next one. Since every record carries the host the VM
/// was placed on at that time, a VM moved between hosts is never counted against both.
#[derive(Clone, Debug, Default)]
pub struct UtilizationAggregator {
    timelines: BTreeMap<VmId, Vec<VmUsageRecord>>,
}

impl UtilizationAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records VM allocation at `time`. A record at the same time replaces the previous one, unchanged state is
    /// not stored.
    pub fn record(&mut self, time: f64, vm_id: VmId, host_id: Option<HostId>, granted_mips: f64, consumed_mips: f64) {
        let record = VmUsageRecord {
            time,
            host_id,
            granted_mips,
            consumed_mips,
        };
        let timeline = self.timelines.entry(vm_id).or_default();
        if let Some(last) = timeline.last_mut() {
            if (last.time - time).abs() <= EPSILON {
                *last = record;
                return;
            }
            if last.host_id == host_id && last.granted_mips == granted_mips && last.consumed_mips == consumed_mips {
                return;
            }
        }
        timeline.push(record);
    }

    /// Allocation timeline of the VM.
    pub fn timeline(&self, vm_id: VmId) -> &[VmUsageRecord] {
        self.timelines.get(&vm_id).map_or(&[], |timeline| timeline.as_slice())
    }

    /// Record in effect at `time`.
    pub fn record_at(&self, vm_id: VmId, time: f64) -> Option<&VmUsageRecord> {
        let timeline = self.timelines.get(&vm_id)?;
        let idx = timeline.partition_point(|record| record.time <= time + EPSILON);
        idx.checked_sub(1).map(|idx| &timeline[idx])
    }

    /// CPU consumed by the VM at `time`, zero if it was not placed.
    pub fn vm_cpu_utilization_mips(&self, vm_id: VmId, time: f64) -> f64 {
        match self.record_at(vm_id, time) {
            Some(record) if record.host_id.is_some() => record.consumed_mips,
            _ => 0.,
        }
    }

    /// Sum of CPU consumed at `time` by the VMs placed on the host at that time.
    pub fn total_cpu_utilization_mips(&self, host_id: HostId, time: f64) -> f64 {
        self.timelines
            .keys()
            .filter_map(|&vm_id| self.record_at(vm_id, time))
            .filter(|record| record.host_id == Some(host_id))
            .map(|record| record.consumed_mips)
            .sum()
    }

    /// Samples host utilization at `0, interval, 2 * interval, ...` up to `finish_time` inclusive and returns the
    /// strictly positive samples.
    pub fn history(&self, host_id: HostId, finish_time: f64, interval: f64) -> Result<Vec<UtilizationSample>> {
        let interval = ensure_positive("sampling interval", interval)?;
        let mut samples = Vec::new();
        let mut step: u64 = 0;
        loop {
            let time = step as f64 * interval;
            if time > finish_time + EPSILON {
                break;
            }
            let cpu_mips = self.total_cpu_utilization_mips(host_id, time);
            if cpu_mips > 0. {
                samples.push(UtilizationSample {
                    time,
                    host_id,
                    cpu_mips,
                });
            }
            step += 1;
        }
        Ok(samples)
    }
}

/// Utilization history of all hosts for the whole simulation period.
#[derive(Clone, Debug, PartialEq)]
pub enum UsageHistory {
    /// No host had positive CPU utilization at any sampled time.
    NoUsage,
    Recorded(BTreeMap<HostId, Vec<UtilizationSample>>),
}

impl UsageHistory {
    pub fn collect(
        aggregator: &UtilizationAggregator,
        hosts: impl IntoIterator<Item = HostId>,
        finish_time: f64,
        interval: f64,
    ) -> Result<Self> {
        let mut recorded = BTreeMap::new();
        for host_id in hosts {
            let samples = aggregator.history(host_id, finish_time, interval)?;
            recorded.insert(host_id, samples);
        }
        if recorded.values().all(|samples| samples.is_empty()) {
            Ok(UsageHistory::NoUsage)
        } else {
            Ok(UsageHistory::Recorded(recorded))
        }
    }

    /// Total number of positive samples.
    pub fn entry_count(&self) -> usize {
        match self {
            UsageHistory::NoUsage => 0,
            UsageHistory::Recorded(hosts) => hosts.values().map(|samples| samples.len()).sum(),
        }
    }

    /// Positive samples of the host (empty if none).
    pub fn host_samples(&self, host_id: HostId) -> &[UtilizationSample] {
        match self {
            UsageHistory::NoUsage => &[],
            UsageHistory::Recorded(hosts) => hosts.get(&host_id).map_or(&[], |samples| samples.as_slice()),
        }
    }

    /// Writes all samples as CSV with `time,host_id,cpu_mips` columns.
    pub fn save_csv(&self, path: &str) -> Result<()> {
        let file = File::create(path)?;
        let mut wtr = csv::Writer::from_writer(file);
        if let UsageHistory::Recorded(hosts) = self {
            for sample in hosts.values().flatten() {
                wtr.serialize(sample)?;
            }
        }
        wtr.flush()?;
        Ok(())
    }
}
