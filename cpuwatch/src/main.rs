//! cpuwatch - fleet audit of busy/idle CPUs over SSH
//!
//! For every selected host of the server list:
//! - Finds the kernel-isolated CPUs (or takes all CPUs when none are isolated)
//! - Samples `/proc/stat` twice and classifies each CPU as Busy or Idle
//! - Joins owner / instance type / zone from the EC2 and HTTP inventories
//! - Writes one CSV row per host, unreachable hosts included

mod config;
mod execution;
mod hosts;
mod inventory;
mod report;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::AuditConfig;
use cpuwatch_core::FleetAuditor;
use execution::SshConnector;
use hosts::ServerList;
use inventory::Inventory;

#[derive(Parser, Debug)]
#[command(name = "cpuwatch")]
#[command(about = "Audit busy/idle (isolated) CPUs across a fleet of hosts over SSH")]
struct Cli {
    /// Config file (TOML)
    #[arg(long, env = "CPUWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Per-team server list
    #[arg(long, env = "CPUWATCH_SERVER_LIST")]
    server_list: Option<PathBuf>,

    /// SSH user
    #[arg(short, long, env = "CPUWATCH_USER")]
    user: Option<String>,

    /// Team to audit (repeatable, default: every team in the list)
    #[arg(short, long = "team")]
    teams: Vec<String>,

    /// Hosts audited at the same time
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Time between the two counter reads (e.g. "1s", "500ms")
    #[arg(long, value_parser = humantime::parse_duration)]
    interval: Option<Duration>,

    /// Utilisation (percent) above which a CPU is busy
    #[arg(long)]
    threshold: Option<f64>,

    /// Abort the whole run after this long (e.g. "10m")
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// CSV output path (`{date}` is replaced by the run timestamp)
    #[arg(short, long)]
    output: Option<String>,

    /// HTTP inventory endpoint
    #[arg(long, env = "CPUWATCH_INVENTORY_URL")]
    inventory_url: Option<String>,

    /// EC2 describe-instances JSON export (repeatable)
    #[arg(long = "ec2-export")]
    ec2_exports: Vec<PathBuf>,

    /// Increase verbosity (-v debug, -vv trace). Default is info.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Command line wins over the config file
    fn apply(self, config: &mut AuditConfig) {
        if let Some(path) = self.server_list {
            config.fleet.server_list = path;
        }
        if let Some(user) = self.user {
            config.ssh.user = user;
        }
        if !self.teams.is_empty() {
            config.fleet.teams = self.teams;
        }
        if let Some(concurrency) = self.concurrency {
            config.fleet.concurrency = concurrency;
        }
        if let Some(interval) = self.interval {
            config.sampling.interval = interval;
        }
        if let Some(threshold) = self.threshold {
            config.sampling.threshold_pct = threshold;
        }
        if self.timeout.is_some() {
            config.fleet.timeout = self.timeout;
        }
        if let Some(output) = self.output {
            config.output.csv_path = output;
        }
        if self.inventory_url.is_some() {
            config.inventory.http_url = self.inventory_url;
        }
        if !self.ec2_exports.is_empty() {
            config.inventory.ec2_exports = self.ec2_exports;
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "cpuwatch=info,cpuwatch_core=info",
        1 => "cpuwatch=debug,cpuwatch_core=debug",
        _ => "cpuwatch=trace,cpuwatch_core=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Flip the cancel flag on Ctrl-C or when the global deadline passes
fn spawn_cancel_triggers(cancel: watch::Sender<bool>, timeout: Option<Duration>) {
    tokio::spawn(async move {
        let deadline = async {
            match timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => warn!("Interrupted, cancelling in-flight hosts"),
            _ = deadline => warn!("Global timeout reached, cancelling in-flight hosts"),
        }
        cancel.send(true).ok();
    });
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = AuditConfig::load(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    cli.apply(&mut config);

    let servers = ServerList::load(&config.fleet.server_list).await?;
    let targets = servers.select(&config.fleet.teams, &config.fleet.prefixes);
    if targets.is_empty() {
        warn!("No host selected for audit");
    }

    let inventory = Inventory::load(&config.inventory, config.fleet.prefixes.clone()).await;
    if inventory.is_empty() {
        info!("No inventory metadata, owner and instance type will be empty");
    } else {
        info!("Inventory knows {} hosts", inventory.len());
    }

    let connector = SshConnector::new(config.ssh.clone());
    let auditor = FleetAuditor::new(&connector, &inventory, config.fleet_config());

    let (cancel, cancelled) = watch::channel(false);
    spawn_cancel_triggers(cancel, config.fleet.timeout);

    let started = Utc::now();
    info!("Checking {} hosts as {}...", targets.len(), config.ssh.user);
    let rows = auditor.run(&targets, cancelled).await;
    rows.iter().for_each(report::log_row);

    let failed = rows.iter().filter(|r| r.is_sentinel()).count();
    if failed > 0 {
        warn!("{} of {} hosts could not be audited", failed, rows.len());
    }

    let path = report::output_path(&config.output.csv_path, started);
    report::write_csv(&path, &rows)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Ok si .env n'existe pas

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    info!("cpuwatch v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(cli).await {
        error!("Audit failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}
