use std::time::Instant;

use clap::Parser;
use log::info;

use dslab_cloudsim::config::SimulationConfig;
use dslab_cloudsim::host::OversubscriptionPolicy;
use dslab_cloudsim::monitoring::UsageHistory;
use dslab_cloudsim::pe::ProcessingElement;
use dslab_cloudsim::placement::FirstFit;
use dslab_cloudsim::vm::VirtualMachine;
use dslab_cloudsim::workload::Workload;
use dslab_cloudsim::{CloudSimulation, Result};

fn init_logger() {
    use env_logger::Builder;
    use std::io::Write;
    Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path to simulation config (the built-in two host scenario is used if not set)
    #[clap(short, long)]
    config: Option<String>,

    /// Number of threads computing host allocations
    #[clap(short, long, default_value_t = 1)]
    threads: usize,

    /// Save utilization history to CSV file
    #[clap(long)]
    history_csv: Option<String>,

    /// Print finished workloads as JSON
    #[clap(long, default_value_t = false)]
    json: bool,
}

/// Two hosts with a single PE each, one VM per host and one workload per VM.
fn two_host_scenario(threads: usize) -> Result<CloudSimulation> {
    let mut config = SimulationConfig::new();
    config.worker_threads = threads;
    let mut sim = CloudSimulation::new(config)?;
    let dc = sim.datacenter_mut();

    for mips in [1200., 2400.] {
        dc.create_host(
            ProcessingElement::uniform(1, mips)?,
            2048,
            10000,
            1000000,
            OversubscriptionPolicy::Strict,
        )?;
    }
    for (id, mips) in [(0, 1000.), (1, 2000.)] {
        dc.add_vm(VirtualMachine::new(id, 0, mips, 1, 512, 1000, 10000)?)?;
        dc.place_vm_with(&FirstFit::new(), id)?;
        let workload = Workload::new(id, 0, 10000., 1)?.with_file_sizes(300, 300);
        dc.submit_workload(workload)?;
        dc.bind_workload(id, id)?;
    }
    for e in dc.admit_bound_workloads() {
        info!("{}", e);
    }
    Ok(sim)
}

fn print_host_history(history: &UsageHistory, finish_time: f64) {
    println!("\nHosts CPU utilization history for the entire simulation period");
    println!("Simulation finish time: {}", finish_time);
    match history {
        UsageHistory::NoUsage => println!(" No CPU usage history was found"),
        UsageHistory::Recorded(hosts) => {
            for (host_id, samples) in hosts {
                println!("Host #{}", host_id);
                for sample in samples {
                    println!("  Time: {:>6.1} | CPU Utilization (MIPS): {:.2}", sample.time, sample.cpu_mips);
                }
                println!("--------------------------------------------------");
            }
        }
    }
}

fn print_workloads(sim: &CloudSimulation, json: bool) {
    let finished = sim.datacenter().finished_workloads(0);
    if json {
        match serde_json::to_string_pretty(&finished) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("can't serialize workloads: {}", e),
        }
        return;
    }
    println!(
        "\n{:>8} | {:>6} | {:>5} | {:>10} | {:>10} | {:>10}",
        "Workload", "VM", "Cores", "Start", "Finish", "Exec Time"
    );
    for workload in finished {
        println!(
            "{:>8} | {:>6} | {:>5} | {:>10.1} | {:>10.1} | {:>10.1}",
            workload.id,
            workload.state().vm_id().unwrap_or_default(),
            workload.cores(),
            workload.start_time().unwrap_or_default(),
            workload.finish_time().unwrap_or_default(),
            workload.execution_time().unwrap_or_default()
        );
    }
}

/// Lines describing workloads bound to unplaced VMs, which never made progress.
fn orphan_report(sim: &CloudSimulation) -> Vec<String> {
    sim.datacenter()
        .orphaned_workloads()
        .into_iter()
        .map(|workload| {
            format!(
                "{:>8} | {:>6} | {:>10.1} | {:>10.1}",
                workload.id,
                workload.state().vm_id().unwrap_or_default(),
                workload.length(),
                workload.finished_length()
            )
        })
        .collect()
}

fn print_orphans(sim: &CloudSimulation) {
    let lines = orphan_report(sim);
    if lines.is_empty() {
        return;
    }
    println!("\nWorkloads bound to unplaced VMs (never executed)");
    println!("{:>8} | {:>6} | {:>10} | {:>10}", "Workload", "VM", "Length", "Finished");
    for line in lines {
        println!("{}", line);
    }
}

fn run(args: Args) -> Result<()> {
    let mut sim = match &args.config {
        Some(path) => {
            let mut config = SimulationConfig::from_file(path)?;
            config.worker_threads = args.threads.max(1);
            CloudSimulation::from_config(config)?
        }
        None => two_host_scenario(args.threads.max(1))?,
    };

    let simulation_start = Instant::now();
    let finish_time = sim.run()?;
    info!("Simulation process time {:.2?}", simulation_start.elapsed());

    print_workloads(&sim, args.json);
    print_orphans(&sim);
    let history = sim.datacenter().usage_history()?;
    print_host_history(&history, finish_time);
    if let Some(path) = &args.history_csv {
        history.save_csv(path)?;
    }
    Ok(())
}

fn main() {
    init_logger();
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_orphans_in_two_host_scenario() {
        let mut sim = two_host_scenario(1).unwrap();
        sim.run().unwrap();
        assert!(orphan_report(&sim).is_empty());
    }

    #[test]
    // The second VM doesn't fit on the only host, its workload is reported with zero progress.
    fn test_orphan_report() {
        let mut sim = CloudSimulation::new(SimulationConfig::new()).unwrap();
        let dc = sim.datacenter_mut();
        dc.create_host(
            ProcessingElement::uniform(1, 1200.).unwrap(),
            2048,
            10000,
            1000000,
            OversubscriptionPolicy::Strict,
        )
        .unwrap();
        for id in 0..2 {
            dc.add_vm(VirtualMachine::new(id, 0, 1000., 1, 512, 1000, 10000).unwrap())
                .unwrap();
            let _ = dc.place_vm_with(&FirstFit::new(), id);
            dc.submit_workload(Workload::new(id, 0, 2000., 1).unwrap()).unwrap();
            dc.bind_workload(id, id).unwrap();
        }
        dc.admit_bound_workloads();
        assert_eq!(sim.run().unwrap(), 2.);

        let report = orphan_report(&sim);
        assert_eq!(report.len(), 1);
        let fields: Vec<&str> = report[0].split('|').map(|field| field.trim()).collect();
        assert_eq!(fields, vec!["1", "1", "2000.0", "0.0"]);
    }
}
