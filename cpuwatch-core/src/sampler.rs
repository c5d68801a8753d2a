//! Single-host audit: connect, find the CPUs to watch, sample twice, classify.
//!
//! Every failure after the connection is attempted ends in
//! [`SamplerState::Failed`] for this host only; the caller turns it into a
//! sentinel row and moves on to the next host.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::classify::{self, CpuVerdict, DEFAULT_THRESHOLD_PCT};
use crate::cpulist::{self, CpuSet};
use crate::error::{AuditError, Result};
use crate::runner::{CommandRunner, Connector};
use crate::stat::CounterSnapshot;

/// Kernel isolated set, falling back to the `isolcpus=` boot parameter.
pub const ISOLATION_COMMAND: &str = "cat /sys/devices/system/cpu/isolated 2>/dev/null || grep -o 'isolcpus=[^ ]*' /proc/cmdline | cut -d= -f2";

pub const CPU_COUNT_COMMAND: &str = "nproc";

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// `isolcpus=` flags that may precede the CPU list on the boot line.
const ISOLCPUS_FLAGS: &[&str] = &["nohz", "domain", "managed_irq"];

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Real time between the two counter reads.
    pub interval: Duration,
    pub threshold_pct: f64,
    /// Total connection attempts, 1 disables retrying.
    pub connect_attempts: u32,
    /// Delay before the first retry, doubled after each one.
    pub retry_backoff: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            threshold_pct: DEFAULT_THRESHOLD_PCT,
            connect_attempts: 1,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SamplerState {
    Connecting,
    DiscoveringIsolation,
    SamplingFirst,
    Waiting,
    SamplingSecond,
    Classifying,
    Done,
    Failed,
}

/// Verdict for one watched CPU.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuReport {
    pub cpu: u32,
    pub isolated: bool,
    pub verdict: CpuVerdict,
    pub utilization_pct: Option<f64>,
}

/// Completed audit of one host. CPUs are in ascending order.
#[derive(Debug, Clone, Serialize)]
pub struct HostAuditResult {
    pub host: String,
    pub isolated: CpuSet,
    pub cpus: Vec<CpuReport>,
}

impl HostAuditResult {
    pub fn busy_cpus(&self) -> Vec<u32> {
        self.with_verdict(CpuVerdict::Busy)
    }

    pub fn idle_cpus(&self) -> Vec<u32> {
        self.with_verdict(CpuVerdict::Idle)
    }

    pub fn unknown_cpus(&self) -> Vec<u32> {
        self.with_verdict(CpuVerdict::Unknown)
    }

    /// Share of classified (busy or idle) CPUs that are busy; 0 when none are.
    pub fn percent_busy(&self) -> f64 {
        let busy = self.busy_cpus().len();
        let total = busy + self.idle_cpus().len();
        if total == 0 {
            return 0.0;
        }
        100.0 * busy as f64 / total as f64
    }

    /// `100 - percent_busy`, or 0 when no CPU could be classified.
    pub fn percent_free(&self) -> f64 {
        if self.busy_cpus().is_empty() && self.idle_cpus().is_empty() {
            return 0.0;
        }
        100.0 - self.percent_busy()
    }

    fn with_verdict(&self, verdict: CpuVerdict) -> Vec<u32> {
        self.cpus
            .iter()
            .filter(|c| c.verdict == verdict)
            .map(|c| c.cpu)
            .collect()
    }
}

/// Why a host could not be audited and how far it got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFailure {
    pub host: String,
    pub state: SamplerState,
    pub error: AuditError,
}

#[derive(Debug, Clone)]
pub enum HostOutcome {
    Audited(HostAuditResult),
    Failed(HostFailure),
}

impl HostOutcome {
    pub fn host(&self) -> &str {
        match self {
            HostOutcome::Audited(result) => &result.host,
            HostOutcome::Failed(failure) => &failure.host,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, HostOutcome::Failed(_))
    }
}

/// Drives one host through the sampling states.
pub struct HostSampler<'a> {
    host: String,
    connector: &'a dyn Connector,
    config: &'a SamplerConfig,
    state: SamplerState,
}

impl<'a> HostSampler<'a> {
    pub fn new(host: impl Into<String>, connector: &'a dyn Connector, config: &'a SamplerConfig) -> Self {
        Self {
            host: host.into(),
            connector,
            config,
            state: SamplerState::Connecting,
        }
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    /// Run to `Done` or `Failed`. Never returns an error: failures are the
    /// `Failed` outcome.
    pub async fn run(&mut self) -> HostOutcome {
        match self.sample().await {
            Ok(result) => {
                self.enter(SamplerState::Done);
                info!(
                    "{}: {} busy, {} idle, {} unknown ({} isolated)",
                    self.host,
                    result.busy_cpus().len(),
                    result.idle_cpus().len(),
                    result.unknown_cpus().len(),
                    result.isolated.len()
                );
                HostOutcome::Audited(result)
            }
            Err(error) => self.fail(error),
        }
    }

    /// Outcome for a host whose audit was abandoned mid-flight.
    pub fn cancelled(&mut self) -> HostOutcome {
        self.fail(AuditError::Cancelled)
    }

    fn fail(&mut self, error: AuditError) -> HostOutcome {
        let state = self.state;
        self.state = SamplerState::Failed;
        warn!("{}: audit failed while {:?}: {}", self.host, state, error);
        HostOutcome::Failed(HostFailure {
            host: self.host.clone(),
            state,
            error,
        })
    }

    fn enter(&mut self, state: SamplerState) {
        debug!("{}: {:?} -> {:?}", self.host, self.state, state);
        self.state = state;
    }

    async fn sample(&mut self) -> Result<HostAuditResult> {
        self.enter(SamplerState::Connecting);
        let runner = self.connect().await?;

        self.enter(SamplerState::DiscoveringIsolation);
        let isolated = discover_isolation(runner.as_ref()).await?;
        let watched: Vec<u32> = if isolated.is_empty() {
            let count = cpu_count(runner.as_ref()).await?;
            debug!("{}: no isolated cpus, watching all {}", self.host, count);
            (0..count).collect()
        } else {
            debug!("{}: isolated cpus {}", self.host, cpulist::format(&isolated));
            isolated.iter().copied().collect()
        };

        self.enter(SamplerState::SamplingFirst);
        let first = CounterSnapshot::read(runner.as_ref()).await?;

        self.enter(SamplerState::Waiting);
        tokio::time::sleep(self.config.interval).await;

        self.enter(SamplerState::SamplingSecond);
        let second = CounterSnapshot::read(runner.as_ref()).await?;

        self.enter(SamplerState::Classifying);
        let cpus = watched
            .into_iter()
            .map(|cpu| CpuReport {
                cpu,
                isolated: isolated.contains(&cpu),
                verdict: classify::classify(&first, &second, cpu, self.config.threshold_pct),
                utilization_pct: classify::utilization(&first, &second, cpu),
            })
            .collect();

        Ok(HostAuditResult {
            host: self.host.clone(),
            isolated,
            cpus,
        })
    }

    async fn connect(&self) -> Result<Box<dyn CommandRunner>> {
        let attempts = self.config.connect_attempts.max(1);
        let mut backoff = self.config.retry_backoff;
        let mut attempt = 1;

        loop {
            match self.connector.connect(&self.host).await {
                Ok(runner) => return Ok(runner),
                Err(e) if e.is_connection() && attempt < attempts => {
                    warn!(
                        "{}: connection attempt {}/{} failed ({}), retrying in {:?}",
                        self.host, attempt, attempts, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Isolated CPU set of the host; empty when nothing is isolated.
///
/// The exit status is ignored: `grep` exits 1 when the boot line carries no
/// `isolcpus=`, which simply means no isolation.
pub async fn discover_isolation(runner: &dyn CommandRunner) -> Result<CpuSet> {
    let output = runner.run(ISOLATION_COMMAND).await?;
    parse_isolation(&output.stdout)
}

/// Parse isolation output, dropping `isolcpus=` flag words first.
pub fn parse_isolation(text: &str) -> Result<CpuSet> {
    let cpus = text
        .trim()
        .split(',')
        .filter(|token| !ISOLCPUS_FLAGS.contains(&token.trim()))
        .collect::<Vec<_>>()
        .join(",");
    cpulist::parse(&cpus)
}

/// Number of online CPUs as reported by `nproc`.
pub async fn cpu_count(runner: &dyn CommandRunner) -> Result<u32> {
    let output = runner.run(CPU_COUNT_COMMAND).await?;
    if !output.is_usable() {
        return Err(AuditError::remote(
            CPU_COUNT_COMMAND,
            format!("exit status {} with no output", output.exit_status),
        ));
    }

    match output.stdout.trim().parse::<u32>() {
        Ok(count) if count > 0 => Ok(count),
        _ => Err(AuditError::UnexpectedOutput {
            command: CPU_COUNT_COMMAND.to_string(),
            output: output.stdout,
        }),
    }
}
