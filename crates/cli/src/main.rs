// MpDispatch - Multiprocessor Dispatch Coordinator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use mpdispatch_core::builder::{build_simulated, SimulatedSystem};
use mpdispatch_core::metrics::MetricsSummary;
use mpdispatch_core::registry::RegistrySnapshot;
use mpdispatch_core::{
    Completion, Coordinator, DispatchMode, DispatchSignal, MpError, UnitStatusFlags, WorkItem,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const EXIT_PASS: u8 = 0;
const EXIT_DISPATCH_FAIL: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

const REPORT_SCHEMA_VERSION: &str = "1.0";

/// Extra time granted to an async completion beyond the dispatch deadline.
const SIGNAL_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "MpDispatch multiprocessor dispatch coordinator",
    long_about = None
)]
struct Cli {
    /// Enable debug-level logging of every unit transition
    #[arg(short, long, global = true)]
    trace: bool,

    /// Path to the topology manifest (YAML)
    #[arg(long, global = true)]
    topology: Option<PathBuf>,

    /// Number of units when no topology manifest is given
    #[arg(long, global = true, default_value = "4")]
    units: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the unit registry.
    Info(InfoArgs),

    /// Dispatch a demo work item and report the outcome.
    Run(RunArgs),
}

#[derive(Parser, Debug)]
struct InfoArgs {
    /// Print the registry snapshot as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Serial,
    Parallel,
}

impl From<ModeArg> for DispatchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Serial => DispatchMode::Serial,
            ModeArg::Parallel => DispatchMode::Parallel,
        }
    }
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// How workers are sequenced when dispatching to all units
    #[arg(long, value_enum, default_value = "parallel")]
    mode: ModeArg,

    /// Time each work item spends before incrementing the counter
    #[arg(long, default_value = "10")]
    work_ms: u64,

    /// Dispatch deadline in microseconds (0 = unbounded). Defaults to the manifest value.
    #[arg(long)]
    timeout_us: Option<u64>,

    /// Complete through a signal instead of blocking
    #[arg(long = "async")]
    asynchronous: bool,

    /// Dispatch to this unit only
    #[arg(long)]
    target: Option<usize>,

    /// Disable these units before dispatching (repeatable or comma separated)
    #[arg(long, value_delimiter = ',')]
    disable: Vec<usize>,

    /// Units whose work never returns
    #[arg(long, value_delimiter = ',')]
    stall: Vec<usize>,

    /// Reach the late-boot milestone before dispatching
    #[arg(long)]
    late_boot: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum RunStatus {
    Pass,
    Failed,
    Timeout,
}

#[derive(Debug, Serialize)]
struct RunReport {
    report_schema_version: String,
    topology: String,
    status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<DispatchMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<usize>,
    asynchronous: bool,
    timeout_us: u64,
    failed_units: Vec<usize>,
    completed_work: usize,
    elapsed_ms: u128,
    metrics: MetricsSummary,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_writer(std::io::stderr)
            .init();
    }

    let system = match build_simulated(cli.topology.as_deref(), cli.units) {
        Ok(system) => system,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    match cli.command {
        Commands::Info(args) => run_info(&system, args),
        Commands::Run(args) => run_dispatch(system, args),
    }
}

fn run_info(system: &SimulatedSystem, args: InfoArgs) -> ExitCode {
    let snapshot = system.coordinator.snapshot();
    if args.json {
        match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to serialize registry snapshot: {}", e);
                return ExitCode::from(EXIT_RUNTIME_ERROR);
            }
        }
    } else {
        print_registry(&system.manifest.name, &snapshot);
    }
    ExitCode::from(EXIT_PASS)
}

fn print_registry(name: &str, snapshot: &RegistrySnapshot) {
    println!(
        "Topology '{}': {} unit(s), {} enabled",
        name, snapshot.total, snapshot.enabled
    );
    println!(
        "{:>5}  {:>10}  {:>14}  {:<10}  {:<7}  {:<7}  {}",
        "index", "identity", "pkg/core/thr", "role", "enabled", "healthy", "state"
    );
    for unit in &snapshot.units {
        let d = &unit.descriptor;
        let role = if d.flags.contains(UnitStatusFlags::CONTROLLER) {
            "controller"
        } else {
            "worker"
        };
        println!(
            "{:>5}  {:>#10x}  {:>14}  {:<10}  {:<7}  {:<7}  {:?}",
            d.index,
            d.identity,
            format!(
                "{}/{}/{}",
                d.location.package, d.location.core, d.location.thread
            ),
            role,
            d.flags.contains(UnitStatusFlags::ENABLED),
            d.flags.contains(UnitStatusFlags::HEALTHY),
            unit.state
        );
    }
}

fn apply_disables(coordinator: &Coordinator, disable: &[usize]) -> anyhow::Result<()> {
    for &index in disable {
        coordinator
            .set_enabled(index, false, None)
            .with_context(|| format!("Cannot disable unit {}", index))?;
        info!("Unit {} disabled", index);
    }
    Ok(())
}

/// Demo work: sleep, then count. Stalled units sleep forever.
fn demo_work(
    coordinator: &Arc<Coordinator>,
    completed: &Arc<AtomicUsize>,
    work_ms: u64,
    stall: Vec<usize>,
) -> WorkItem {
    let coordinator = coordinator.clone();
    let completed = completed.clone();
    WorkItem::new(
        move |step| {
            let index = coordinator.identify_self().ok();
            if index.is_some_and(|i| stall.contains(&i)) {
                loop {
                    std::thread::sleep(Duration::from_secs(1));
                }
            }
            std::thread::sleep(Duration::from_millis(work_ms));
            completed.fetch_add(step, Ordering::SeqCst);
        },
        1,
    )
}

fn run_dispatch(system: SimulatedSystem, args: RunArgs) -> ExitCode {
    let SimulatedSystem {
        manifest,
        coordinator,
        late_boot,
        metrics,
    } = system;
    let coordinator = Arc::new(coordinator);

    if let Err(e) = apply_disables(&coordinator, &args.disable) {
        error!("{:#}", e);
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    let timeout_us = args
        .timeout_us
        .unwrap_or(manifest.coordinator.default_timeout_us);
    if !args.stall.is_empty() && timeout_us == 0 {
        error!("--stall needs a bounded deadline; pass --timeout-us or set coordinator.default_timeout_us");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    if args.late_boot {
        late_boot.fire();
    }

    let completed = Arc::new(AtomicUsize::new(0));
    let work = demo_work(&coordinator, &completed, args.work_ms, args.stall.clone());
    let mode = DispatchMode::from(args.mode);
    let signal = Arc::new(DispatchSignal::new());
    let completion = if args.asynchronous {
        Completion::Async(signal.clone())
    } else {
        Completion::Blocking
    };

    info!(
        "Dispatching to {} with deadline {}us ({})",
        args.target
            .map(|t| format!("unit {}", t))
            .unwrap_or_else(|| format!("all units, {:?}", mode)),
        timeout_us,
        if args.asynchronous { "async" } else { "blocking" }
    );

    let start = Instant::now();
    let returned = match args.target {
        Some(target) => coordinator
            .dispatch_one(work, target, timeout_us, completion)
            .map(|()| None),
        None => coordinator.dispatch_all(work, mode, timeout_us, completion),
    };

    let (status, failed_units) = match returned {
        Err(MpError::Timeout { failed }) => (RunStatus::Timeout, failed),
        Err(e) => {
            error!("Dispatch rejected: {}", e);
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
        Ok(_) if args.asynchronous => {
            let bound = if timeout_us == 0 {
                Duration::MAX
            } else {
                Duration::from_micros(timeout_us) + SIGNAL_GRACE
            };
            match signal.wait(bound) {
                Some(outcome) if outcome.timed_out => {
                    (RunStatus::Timeout, outcome.failed_units.unwrap_or_default())
                }
                Some(outcome) => match outcome.failed_units {
                    Some(failed) => (RunStatus::Failed, failed),
                    None => (RunStatus::Pass, Vec::new()),
                },
                None => {
                    error!("Completion signal did not fire within {:?}", bound);
                    return ExitCode::from(EXIT_RUNTIME_ERROR);
                }
            }
        }
        Ok(Some(failed)) => (RunStatus::Failed, failed),
        Ok(None) => (RunStatus::Pass, Vec::new()),
    };

    if !failed_units.is_empty() {
        warn!("Units without completion: {:?}", failed_units);
    }

    let report = RunReport {
        report_schema_version: REPORT_SCHEMA_VERSION.to_string(),
        topology: manifest.name.clone(),
        mode: args.target.is_none().then_some(mode),
        target: args.target,
        asynchronous: args.asynchronous,
        timeout_us,
        failed_units,
        completed_work: completed.load(Ordering::SeqCst),
        elapsed_ms: start.elapsed().as_millis(),
        metrics: metrics.summary(),
        status,
    };

    if args.json {
        match serde_json::to_string(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to serialize run report: {}", e);
                return ExitCode::from(EXIT_RUNTIME_ERROR);
            }
        }
    } else {
        print_report(&report);
    }

    match report.status {
        RunStatus::Pass => ExitCode::from(EXIT_PASS),
        RunStatus::Failed | RunStatus::Timeout => ExitCode::from(EXIT_DISPATCH_FAIL),
    }
}

fn print_report(report: &RunReport) {
    println!("Topology:       {}", report.topology);
    match report.target {
        Some(target) => println!("Target:         unit {}", target),
        None => println!("Mode:           {:?}", report.mode.unwrap_or(DispatchMode::Parallel)),
    }
    println!("Deadline:       {}us", report.timeout_us);
    println!("Status:         {:?}", report.status);
    println!("Completed work: {}", report.completed_work);
    if !report.failed_units.is_empty() {
        println!("Failed units:   {:?}", report.failed_units);
    }
    println!("Elapsed:        {} ms", report.elapsed_ms);
    println!(
        "Activations:    {} ({} finished, {} failed)",
        report.metrics.units_activated, report.metrics.units_finished, report.metrics.units_failed
    );
}
