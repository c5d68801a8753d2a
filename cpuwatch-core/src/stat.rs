//! Per-CPU scheduler tick counters from `/proc/stat`.
//!
//! Line format: `cpuN user nice system idle iowait irq softirq steal guest guest_nice`.
//! Older kernels print fewer columns; four is the minimum we can use.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{AuditError, Result};
use crate::runner::CommandRunner;

/// Only numbered CPU lines, never the aggregate `cpu` line.
pub const STAT_COMMAND: &str = "grep '^cpu[0-9]' /proc/stat";

/// Columns needed to locate the idle counter.
pub const MIN_COUNTERS: usize = 4;

pub const IDLE_FIELD: usize = 3;
pub const IOWAIT_FIELD: usize = 4;

/// One read of the per-CPU counters, keyed by CPU index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    counters: BTreeMap<u32, Vec<u64>>,
}

impl CounterSnapshot {
    /// Issue one stat read on the host and parse it.
    pub async fn read(runner: &dyn CommandRunner) -> Result<Self> {
        let output = runner.run(STAT_COMMAND).await?;
        if !output.is_usable() {
            return Err(AuditError::remote(
                STAT_COMMAND,
                format!("exit status {} with no output", output.exit_status),
            ));
        }

        let snapshot = Self::parse(&output.stdout)?;
        if snapshot.is_empty() {
            return Err(AuditError::UnexpectedOutput {
                command: STAT_COMMAND.to_string(),
                output: output.stdout,
            });
        }

        debug!("Read counters for {} cpus", snapshot.len());
        Ok(snapshot)
    }

    /// Parse `cpuN ...` lines. Blank lines are ignored; anything else that is
    /// not a well-formed counter line fails the whole snapshot.
    pub fn parse(text: &str) -> Result<Self> {
        let mut counters = BTreeMap::new();

        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let (cpu, values) = parse_line(line)?;
            counters.insert(cpu, values);
        }

        Ok(Self { counters })
    }

    pub fn get(&self, cpu: u32) -> Option<&[u64]> {
        self.counters.get(&cpu).map(Vec::as_slice)
    }

    pub fn cpus(&self) -> impl Iterator<Item = u32> + '_ {
        self.counters.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

impl FromIterator<(u32, Vec<u64>)> for CounterSnapshot {
    fn from_iter<T: IntoIterator<Item = (u32, Vec<u64>)>>(iter: T) -> Self {
        Self {
            counters: iter.into_iter().collect(),
        }
    }
}

/// Idle and total ticks of one counter row.
///
/// Idle is `idle + iowait` (iowait only when the kernel prints it), total is
/// the sum of every column. `None` for rows too short to carry an idle column.
pub fn idle_and_total(counters: &[u64]) -> Option<(u64, u64)> {
    if counters.len() < MIN_COUNTERS {
        return None;
    }
    let iowait = counters.get(IOWAIT_FIELD).copied().unwrap_or(0);
    let idle = counters[IDLE_FIELD].checked_add(iowait)?;
    let total = counters
        .iter()
        .try_fold(0u64, |acc, v| acc.checked_add(*v))?;
    Some((idle, total))
}

fn parse_line(line: &str) -> Result<(u32, Vec<u64>)> {
    let mut tokens = line.split_whitespace();
    let label = tokens.next().unwrap_or_default();

    let cpu = label
        .strip_prefix("cpu")
        .filter(|digits| !digits.is_empty())
        .and_then(|digits| digits.parse::<u32>().ok())
        .ok_or_else(|| bad_line(line, format!("'{}' is not a numbered cpu label", label)))?;

    let values = tokens
        .map(|t| {
            t.parse::<u64>()
                .map_err(|_| bad_line(line, format!("'{}' is not a counter", t)))
        })
        .collect::<Result<Vec<u64>>>()?;

    if values.len() < MIN_COUNTERS {
        return Err(bad_line(
            line,
            format!("expected at least {} counters, got {}", MIN_COUNTERS, values.len()),
        ));
    }

    Ok((cpu, values))
}

fn bad_line(line: &str, reason: String) -> AuditError {
    AuditError::MalformedCounterLine {
        line: line.trim().to_string(),
        reason,
    }
}
