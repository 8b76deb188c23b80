use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use oar_lite::config::RuntimeConfig;
use oar_lite::event::Event;
use oar_lite::gantt::GanttEntry;
use oar_lite::launcher::{run_launcher, Arrival, LoopbackLauncher};
use oar_lite::node::{system_clock, Node};
use oar_lite::platform::Platform;
use oar_lite::request::normalize;
use oar_lite::scheduler::{Job, Scheduler};
use oar_lite::shutdown::install_shutdown_handler;
use oar_lite::sim::{Refusal, Simulation};

#[derive(Parser, Debug)]
#[command(name = "oar-lite")]
#[command(version)]
#[command(about = "A batch scheduler core with moldable jobs and advance reservations")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Replay a platform workload in simulated time and print the outcome
    Simulate(SimulateArgs),

    /// Run the scheduler loop in real time against a platform workload
    Run(RunArgs),
}

// =============================================================================
// Simulate Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct SimulateArgs {
    /// Platform description file (JSON)
    platform: PathBuf,

    /// Simulated start instant (epoch seconds)
    #[arg(long, default_value = "1600000000")]
    start: i64,

    /// Seconds of simulated time between passes
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(i64).range(1..))]
    step: i64,

    /// Stop after this many simulated seconds even if jobs are left
    #[arg(long, default_value = "604800")]
    horizon: i64,

    /// Also print the event log
    #[arg(long)]
    events: bool,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

// =============================================================================
// Run Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct RunArgs {
    /// Platform description file (JSON)
    platform: PathBuf,

    /// Milliseconds between passes (overrides the platform configuration)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pass_interval_ms: Option<u64>,

    /// Milliseconds between launcher polls
    #[arg(long, default_value = "200", value_parser = clap::value_parser!(u64).range(1..))]
    launcher_interval_ms: u64,

    /// Stop after this many seconds instead of waiting for a signal
    #[arg(long)]
    duration: Option<u64>,

    /// Output format of the final report
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobOutput {
    job_id: u64,
    user: String,
    queue: String,
    state: String,
    submission_time: i64,
    start_time: i64,
    stop_time: i64,
    resources: Vec<u64>,
    message: String,
}

#[derive(Serialize)]
struct ReportOutput {
    now: i64,
    jobs: Vec<JobOutput>,
    gantt: Vec<GanttEntry>,
    gantt_log: Vec<GanttEntry>,
    refusals: Vec<Refusal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    events: Option<Vec<Event>>,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn assigned_resources(scheduler: &Scheduler, job: &Job) -> Vec<u64> {
    if !job.has_assignment() {
        return Vec::new();
    }
    scheduler
        .gantt()
        .get(job.assigned_moldable)
        .or_else(|| {
            scheduler
                .gantt()
                .log()
                .iter()
                .find(|e| e.moldable_id == job.assigned_moldable)
        })
        .map(|e| e.resources.iter().copied().collect())
        .unwrap_or_default()
}

fn format_time(t: i64) -> String {
    if t == 0 {
        return "-".to_string();
    }
    match chrono::DateTime::from_timestamp(t, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => t.to_string(),
    }
}

fn format_resources(resources: &[u64]) -> String {
    if resources.is_empty() {
        return "-".to_string();
    }
    let list = resources
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(",");
    if list.len() > 24 {
        format!("{}...", &list[..21])
    } else {
        list
    }
}

fn build_report(
    scheduler: &Scheduler,
    now: i64,
    refusals: &[Refusal],
    with_events: bool,
) -> ReportOutput {
    let jobs = scheduler
        .jobs()
        .all_jobs()
        .into_iter()
        .map(|job| JobOutput {
            job_id: job.id,
            user: job.request.user.clone(),
            queue: job.request.queue.clone(),
            state: job.state.to_string(),
            submission_time: job.submission_time,
            start_time: job.start_time,
            stop_time: job.stop_time,
            resources: assigned_resources(scheduler, job),
            message: job.message.clone(),
        })
        .collect();

    ReportOutput {
        now,
        jobs,
        gantt: scheduler.gantt().current().cloned().collect(),
        gantt_log: scheduler.gantt().log().to_vec(),
        refusals: refusals.to_vec(),
        events: with_events.then(|| scheduler.events().events().to_vec()),
    }
}

fn print_report(
    report: &ReportOutput,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Table => {
            println!("Time: {}", format_time(report.now));
            println!();
            if report.jobs.is_empty() {
                println!("No jobs found.");
            } else {
                println!(
                    "{:<6} {:<10} {:<10} {:<16} {:<20} {:<20} {:<24} MESSAGE",
                    "JOB", "USER", "QUEUE", "STATE", "START", "STOP", "RESOURCES"
                );
                println!("{}", "-".repeat(120));
                for job in &report.jobs {
                    println!(
                        "{:<6} {:<10} {:<10} {:<16} {:<20} {:<20} {:<24} {}",
                        job.job_id,
                        job.user,
                        job.queue,
                        job.state,
                        format_time(job.start_time),
                        format_time(job.stop_time),
                        format_resources(&job.resources),
                        job.message
                    );
                }
            }

            if !report.refusals.is_empty() {
                println!();
                println!("Refused submissions:");
                for refusal in &report.refusals {
                    println!(
                        "  {} {:<10} {}",
                        format_time(refusal.at),
                        refusal.user,
                        refusal.reason
                    );
                }
            }

            if let Some(events) = &report.events {
                println!();
                println!("{:<20} {:<6} {:<28} DESCRIPTION", "DATE", "JOB", "EVENT");
                println!("{}", "-".repeat(100));
                for event in events {
                    println!(
                        "{:<20} {:<6} {:<28} {}",
                        format_time(event.date),
                        event.job_id,
                        event.kind.as_str(),
                        event.description
                    );
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// Simulate Implementation
// =============================================================================

fn run_simulation(args: SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let platform = Platform::load(&args.platform)?;
    let mut sim = Simulation::new(&platform, args.start, args.step)?;
    sim.run_until(args.start.saturating_add(args.horizon))?;

    let report = build_report(sim.scheduler(), sim.now(), sim.refusals(), args.events);
    print_report(&report, &args.output)
}

// =============================================================================
// Run Implementation
// =============================================================================

async fn run_node(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let platform = Platform::load(&args.platform)?;
    let scheduler = platform.scheduler()?;
    let clock = system_clock();
    let start = clock();

    let mut refusals = Vec::new();
    let mut arrivals = Vec::new();
    for timed in &platform.submissions {
        match normalize(&timed.submission, &platform.config) {
            Ok(request) => arrivals.push(Arrival {
                due: start.saturating_add(timed.at),
                request,
                runtime: timed.runtime,
            }),
            Err(e) => {
                tracing::warn!(user = %timed.submission.user, error = %e, "Submission refused");
                refusals.push(Refusal {
                    at: start,
                    user: timed.submission.user.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    let mut runtime = RuntimeConfig::from_scheduler(&platform.config);
    if let Some(interval) = args.pass_interval_ms {
        runtime.pass_interval_ms = interval;
    }

    tracing::info!(
        resources = platform.resources.len(),
        arrivals = arrivals.len(),
        pass_interval_ms = runtime.pass_interval_ms,
        "Starting oar-lite node"
    );

    let (node, handle) = Node::new(scheduler, runtime);
    let node = node.with_clock(clock.clone());
    let shutdown_token = install_shutdown_handler();

    if let Some(secs) = args.duration {
        let token = shutdown_token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            tracing::info!("Run duration elapsed, shutting down");
            token.cancel();
        });
    }

    let launcher_handle = tokio::spawn(run_launcher(
        handle.clone(),
        LoopbackLauncher::new(),
        arrivals,
        clock.clone(),
        args.launcher_interval_ms,
        shutdown_token.clone(),
    ));

    let result = node.run(shutdown_token.clone()).await;
    shutdown_token.cancel();
    let _ = launcher_handle.await;
    result?;

    let scheduler = handle.scheduler();
    let scheduler = scheduler.read().await;
    let report = build_report(&scheduler, clock(), &refusals, false);
    print_report(&report, &args.output)
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Simulate(sim_args) => {
            // stdout carries the report
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
                )
                .with_writer(std::io::stderr)
                .init();
            run_simulation(sim_args)
        }
        Commands::Run(run_args) => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .init();
            run_node(run_args).await
        }
    }
}
