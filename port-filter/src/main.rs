use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, CommandFactory, Parser, Subcommand};

use port_filter::bootstrap::{FilterOptions, bootstrap};
use port_filter::cgroup::DEFAULT_MOUNT_TABLE;
use port_filter::config::{DEFAULT_PORT, DEFAULT_PROCESS_NAME};
use port_filter::counter::{self, DEFAULT_COUNTER_PIN};
use port_filter::loader::{self, LoadOptions};
use port_filter::supervisor::shutdown_signal;

#[derive(Parser)]
#[command(name = "port-filter")]
#[command(about = "Drop a process's ingress TCP traffic on all but one port", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach the filter to the cgroup v2 root and report drops until interrupted
    Run(RunCommand),
    /// Print the drop counter pinned by a running filter as JSON
    Stats(StatsCommand),
}

#[derive(Args)]
struct RunCommand {
    /// TCP port the process may still receive on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u32,
    /// Process name to filter, as the kernel reports it (at most 15 bytes;
    /// longer names are truncated to 16 and then never match)
    #[arg(long, value_name = "NAME", default_value = DEFAULT_PROCESS_NAME)]
    process: String,
    /// Seconds between drop counter reports
    #[arg(long, default_value_t = 10)]
    report_interval_secs: u64,
    /// Mount table used to locate the cgroup2 hierarchy
    #[arg(long, value_name = "PATH", default_value = DEFAULT_MOUNT_TABLE)]
    mounts: PathBuf,
    /// Compiled eBPF object; defaults to the embedded image
    #[arg(long, value_name = "PATH")]
    object: Option<PathBuf>,
    /// Pin the drop counter while running so `stats` can read it; a bare
    /// `--pin` uses the path `stats` reads by default
    #[arg(
        long,
        value_name = "PATH",
        num_args = 0..=1,
        default_missing_value = DEFAULT_COUNTER_PIN
    )]
    pin: Option<PathBuf>,
}

#[derive(Args)]
struct StatsCommand {
    /// Pinned drop counter written by `run --pin`
    #[arg(long, value_name = "PATH", default_value = DEFAULT_COUNTER_PIN)]
    pin: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run().await {
        eprintln!("port-filter error: {err:?}");
        exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run(cmd)) => run_filter(cmd).await?,
        Some(Commands::Stats(cmd)) => print_stats(cmd)?,
        None => {
            Cli::command().print_help().ok();
            println!();
        }
    }

    Ok(())
}

async fn run_filter(cmd: RunCommand) -> Result<()> {
    let shutdown = shutdown_signal().context("failed to install signal handlers")?;

    let opts = FilterOptions {
        port: cmd.port,
        process_name: cmd.process,
        mount_table: cmd.mounts,
        report_interval: Duration::from_secs(cmd.report_interval_secs.max(1)),
    };
    let load_opts = LoadOptions {
        image: cmd.object,
        pin_counter: cmd.pin,
    };

    let supervisor = bootstrap(&opts, || loader::load(&load_opts))?;
    log::info!("Press Ctrl-C to exit and remove the program");

    let outcome = supervisor
        .run(shutdown)
        .await
        .context("failed to tear down filter")?;
    log::info!(
        "Shut down after {} reports, last drop count {}",
        outcome.samples,
        outcome.last_sample.unwrap_or(0)
    );
    Ok(())
}

fn print_stats(cmd: StatsCommand) -> Result<()> {
    let dropped = counter::read_pinned(&cmd.pin)?;
    println!("{}", counter::stats_json(dropped, Utc::now()));
    Ok(())
}
