//! Simulation driver advancing the datacenter clock in fixed steps.

use std::rc::Rc;

use sugars::rc;

use crate::config::SimulationConfig;
use crate::datacenter::{Datacenter, TickSummary};
use crate::error::Result;
use crate::pe::ProcessingElement;
use crate::placement::placement_algorithm_resolver;
use crate::utilization_model::resolve_utilization_model;
use crate::vm::VirtualMachine;
use crate::workload::Workload;
use crate::{log_debug, log_info, log_warn};
use crate::{VmId, EPSILON};

/// Owns the datacenter and moves its clock by `step_duration` per step.
///
/// The next step time is the first multiple of `step_duration` after the datacenter clock, so steps line up
/// with the grid even after the clock was advanced directly, and no rounding error is accumulated over long runs.
pub struct CloudSimulation {
    datacenter: Datacenter,
    sim_config: Rc<SimulationConfig>,
    steps: u64,
}

impl CloudSimulation {
    /// Creates simulation with empty datacenter.
    pub fn new(sim_config: SimulationConfig) -> Result<Self> {
        sim_config.validate()?;
        let datacenter = Datacenter::new("datacenter")
            .with_worker_threads(sim_config.worker_threads)
            .with_sampling_interval(sim_config.sampling_interval)?;
        Ok(Self {
            datacenter,
            sim_config: rc!(sim_config),
            steps: 0,
        })
    }

    /// Creates simulation and populates the datacenter with hosts, VMs and workloads from the config.
    ///
    /// VMs which can't be placed are left unplaced and their workloads stay bound (orphaned).
    pub fn from_config(sim_config: SimulationConfig) -> Result<Self> {
        let mut sim = Self::new(sim_config)?;
        let config = sim.sim_config.clone();

        for host in &config.hosts {
            for _ in 0..host.count.unwrap_or(1) {
                sim.datacenter.create_host(
                    ProcessingElement::uniform(host.pes, host.pe_mips)?,
                    host.ram,
                    host.bw,
                    host.storage,
                    host.oversubscription.unwrap_or(config.oversubscription),
                )?;
            }
        }

        let mut vm_ids: Vec<VmId> = Vec::new();
        for vm in &config.vms {
            for _ in 0..vm.count.unwrap_or(1) {
                let id = vm_ids.len() as VmId;
                sim.datacenter.add_vm(VirtualMachine::new(
                    id,
                    vm.owner_id.unwrap_or(0),
                    vm.mips,
                    vm.cores,
                    vm.ram,
                    vm.bw,
                    vm.size,
                )?)?;
                vm_ids.push(id);
            }
        }

        let algorithm = placement_algorithm_resolver(&config.placement_algorithm)?;
        for &vm_id in &vm_ids {
            match sim.datacenter.place_vm_with(algorithm.as_ref(), vm_id) {
                Ok(host_id) => log_debug!(sim.datacenter, "vm #{} -> host #{}", vm_id, host_id),
                Err(e) => log_warn!(sim.datacenter, "vm #{} stays unplaced: {}", vm_id, e),
            }
        }

        let mut next_id = 0;
        for workload in &config.workloads {
            let cpu_model = resolve_utilization_model(workload.cpu_model.as_deref().unwrap_or("Full"))?;
            let ram_model = resolve_utilization_model(workload.ram_model.as_deref().unwrap_or("Full"))?;
            let bw_model = resolve_utilization_model(workload.bw_model.as_deref().unwrap_or("Full"))?;
            for _ in 0..workload.count.unwrap_or(1) {
                let id = next_id;
                next_id += 1;
                let created = Workload::new(id, workload.owner_id.unwrap_or(0), workload.length, workload.cores)?
                    .with_file_sizes(workload.file_size.unwrap_or(0), workload.output_size.unwrap_or(0))
                    .with_cpu_model(cpu_model.clone())
                    .with_ram_model(ram_model.clone())
                    .with_bw_model(bw_model.clone());
                sim.datacenter.submit_workload(created)?;
                let vm_id = match workload.vm {
                    Some(vm_id) => Some(vm_id),
                    None if !vm_ids.is_empty() => Some(vm_ids[id as usize % vm_ids.len()]),
                    None => None,
                };
                match vm_id {
                    Some(vm_id) => sim.datacenter.bind_workload(id, vm_id)?,
                    None => log_warn!(sim.datacenter, "workload #{} has no vm to run in", id),
                }
            }
        }

        for e in sim.datacenter.admit_bound_workloads() {
            log_warn!(sim.datacenter, "{}", e);
        }
        for workload in sim.datacenter.orphaned_workloads() {
            log_warn!(
                sim.datacenter,
                "workload #{} is bound to unplaced vm #{} and will never run",
                workload.id,
                workload.state().vm_id().unwrap_or_default()
            );
        }
        Ok(sim)
    }

    pub fn datacenter(&self) -> &Datacenter {
        &self.datacenter
    }

    pub fn datacenter_mut(&mut self) -> &mut Datacenter {
        &mut self.datacenter
    }

    pub fn sim_config(&self) -> Rc<SimulationConfig> {
        self.sim_config.clone()
    }

    pub fn current_time(&self) -> f64 {
        self.datacenter.time()
    }

    /// Number of performed steps.
    pub fn step_count(&self) -> u64 {
        self.steps
    }

    /// First multiple of `step_duration` after the current clock.
    fn next_step_time(&self) -> f64 {
        let step_duration = self.sim_config.step_duration;
        ((self.current_time() / step_duration + EPSILON).floor() + 1.) * step_duration
    }

    /// Advances the clock to the next step.
    pub fn step(&mut self) -> Result<TickSummary> {
        let time = self.next_step_time();
        let summary = self.datacenter.advance_tick(time)?;
        self.steps += 1;
        Ok(summary)
    }

    /// Performs steps until the clock advances by `duration`.
    pub fn step_for_duration(&mut self, duration: f64) -> Result<()> {
        let end_time = self.current_time() + duration;
        while self.next_step_time() <= end_time + EPSILON {
            self.step()?;
        }
        Ok(())
    }

    /// Performs steps while there are active workloads and the simulation length is not reached.
    ///
    /// Returns the time the simulation stopped at.
    pub fn run(&mut self) -> Result<f64> {
        log_info!(
            self.datacenter,
            "simulation started: {} hosts, {} vms, {} workloads",
            self.datacenter.hosts().count(),
            self.datacenter.vms().count(),
            self.datacenter.workloads().count()
        );
        while self.datacenter.has_active_workloads()
            && self.current_time() < self.sim_config.simulation_length - EPSILON
        {
            self.step()?;
        }
        log_info!(self.datacenter, "simulation finished after {} steps", self.steps);
        Ok(self.current_time())
    }
}
