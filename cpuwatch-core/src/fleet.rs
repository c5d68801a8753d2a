//! Fleet-wide audit: run the host sampler over a host list, join metadata,
//! produce one report row per host.
//!
//! Hosts are sampled concurrently (bounded) but rows come back in input
//! order. An unreachable or cancelled host still gets its (sentinel) row.

use std::collections::HashMap;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::cpulist;
use crate::runner::Connector;
use crate::sampler::{HostOutcome, HostSampler, SamplerConfig};

pub const DEFAULT_CONCURRENCY: usize = 8;

/// One host to audit, as selected from the host list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTarget {
    /// Position of the host in its team's list (1-based).
    pub num: usize,
    pub host: String,
    pub team: String,
}

impl HostTarget {
    pub fn new(num: usize, host: impl Into<String>, team: impl Into<String>) -> Self {
        Self {
            num,
            host: host.into(),
            team: team.into(),
        }
    }
}

/// Inventory attributes of a host. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub owner: Option<String>,
    pub instance_type: Option<String>,
    pub availability_zone: Option<String>,
}

impl Metadata {
    /// Fill fields still empty from `other`; values already set win.
    pub fn merge(&mut self, other: Metadata) {
        if self.owner.is_none() {
            self.owner = other.owner;
        }
        if self.instance_type.is_none() {
            self.instance_type = other.instance_type;
        }
        if self.availability_zone.is_none() {
            self.availability_zone = other.availability_zone;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.owner.is_none() && self.instance_type.is_none() && self.availability_zone.is_none()
    }
}

/// Hostname to metadata lookup.
pub trait MetadataLookup: Send + Sync {
    fn get(&self, host: &str) -> Option<Metadata>;
}

impl MetadataLookup for HashMap<String, Metadata> {
    fn get(&self, host: &str) -> Option<Metadata> {
        HashMap::get(self, host).cloned()
    }
}

/// Output row. Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRow {
    pub num: usize,
    pub server_name: String,
    pub availability_zone: String,
    pub team: String,
    pub owner: String,
    pub instance_type: String,
    pub percent_busy: String,
    pub percent_free: String,
    pub busy_cpu_list: String,
    pub idle_cpu_list: String,
    pub status: String,
}

impl AuditRow {
    pub const STATUS_OK: &'static str = "ok";

    pub fn build(target: &HostTarget, outcome: &HostOutcome, metadata: Option<Metadata>) -> Self {
        let metadata = metadata.unwrap_or_default();
        let (percent_busy, percent_free, busy, idle, status) = match outcome {
            HostOutcome::Audited(result) => (
                result.percent_busy(),
                result.percent_free(),
                cpulist::format(&result.busy_cpus()),
                cpulist::format(&result.idle_cpus()),
                Self::STATUS_OK.to_string(),
            ),
            HostOutcome::Failed(failure) => (
                0.0,
                0.0,
                String::new(),
                String::new(),
                format!("ERROR: {}", failure.error),
            ),
        };

        Self {
            num: target.num,
            server_name: target.host.clone(),
            availability_zone: metadata.availability_zone.unwrap_or_default(),
            team: target.team.clone(),
            owner: metadata.owner.unwrap_or_default(),
            instance_type: metadata.instance_type.unwrap_or_default(),
            percent_busy: format!("{:.2}", percent_busy),
            percent_free: format!("{:.2}", percent_free),
            busy_cpu_list: busy,
            idle_cpu_list: idle,
            status,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.status != Self::STATUS_OK
    }
}

/// A host's outcome next to the target it was produced for.
#[derive(Debug, Clone)]
pub struct HostReport {
    pub target: HostTarget,
    pub outcome: HostOutcome,
}

#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub sampler: SamplerConfig,
    /// Hosts audited at the same time.
    pub concurrency: usize,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            sampler: SamplerConfig::default(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Audits a fleet through one [`Connector`].
pub struct FleetAuditor<'a> {
    connector: &'a dyn Connector,
    metadata: &'a dyn MetadataLookup,
    config: FleetConfig,
}

impl<'a> FleetAuditor<'a> {
    pub fn new(connector: &'a dyn Connector, metadata: &'a dyn MetadataLookup, config: FleetConfig) -> Self {
        Self {
            connector,
            metadata,
            config,
        }
    }

    /// Audit every target and return the rows in input order.
    pub async fn run(&self, targets: &[HostTarget], cancel: watch::Receiver<bool>) -> Vec<AuditRow> {
        self.audit(targets, cancel)
            .await
            .iter()
            .map(|report| self.row(report))
            .collect()
    }

    /// Audit every target, keeping the full per-host outcome.
    ///
    /// Once `cancel` turns true, in-flight hosts are abandoned and hosts not
    /// yet started are not contacted; both come back as `Cancelled` failures.
    pub async fn audit(&self, targets: &[HostTarget], cancel: watch::Receiver<bool>) -> Vec<HostReport> {
        info!(
            "Auditing {} hosts ({} at a time, {:?} sampling interval)",
            targets.len(),
            self.config.concurrency.max(1),
            self.config.sampler.interval
        );

        stream::iter(targets)
            .map(|target| self.audit_host(target, cancel.clone()))
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await
    }

    /// Join one report with its metadata.
    pub fn row(&self, report: &HostReport) -> AuditRow {
        AuditRow::build(&report.target, &report.outcome, self.metadata.get(&report.target.host))
    }

    async fn audit_host(&self, target: &HostTarget, mut cancel: watch::Receiver<bool>) -> HostReport {
        let mut sampler = HostSampler::new(target.host.clone(), self.connector, &self.config.sampler);

        let outcome = if *cancel.borrow() {
            debug!("{}: skipped, audit already cancelled", target.host);
            sampler.cancelled()
        } else {
            let finished = tokio::select! {
                outcome = sampler.run() => Some(outcome),
                _ = wait_cancelled(&mut cancel) => None,
            };
            match finished {
                Some(outcome) => outcome,
                None => sampler.cancelled(),
            }
        };

        HostReport {
            target: target.clone(),
            outcome,
        }
    }
}

/// Resolves once the flag turns true; never if the sender goes away first.
async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::CpuVerdict;
    use crate::cpulist::CpuSet;
    use crate::error::AuditError;
    use crate::sampler::{CpuReport, HostAuditResult, HostFailure, SamplerState};

    fn target() -> HostTarget {
        HostTarget::new(3, "TA-apne1-md01", "MM")
    }

    #[test]
    fn test_metadata_merge_first_wins() {
        let mut meta = Metadata {
            owner: Some("alice".into()),
            ..Default::default()
        };
        meta.merge(Metadata {
            owner: Some("bob".into()),
            instance_type: Some("c6i.4xlarge".into()),
            availability_zone: None,
        });
        assert_eq!(meta.owner.as_deref(), Some("alice"));
        assert_eq!(meta.instance_type.as_deref(), Some("c6i.4xlarge"));
        assert!(meta.availability_zone.is_none());
        assert!(!meta.is_empty());
        assert!(Metadata::default().is_empty());
    }

    #[test]
    fn test_row_for_audited_host() {
        let cpus = [(4, CpuVerdict::Busy), (5, CpuVerdict::Idle), (6, CpuVerdict::Busy)]
            .into_iter()
            .map(|(cpu, verdict)| CpuReport {
                cpu,
                isolated: true,
                verdict,
                utilization_pct: None,
            })
            .collect();
        let outcome = HostOutcome::Audited(HostAuditResult {
            host: "TA-apne1-md01".into(),
            isolated: [4, 5, 6].into_iter().collect::<CpuSet>(),
            cpus,
        });
        let meta = Metadata {
            owner: Some("alice".into()),
            instance_type: Some("c6i.4xlarge".into()),
            availability_zone: Some("ap-northeast-1a".into()),
        };

        let row = AuditRow::build(&target(), &outcome, Some(meta));
        assert_eq!(row.num, 3);
        assert_eq!(row.team, "MM");
        assert_eq!(row.owner, "alice");
        assert_eq!(row.availability_zone, "ap-northeast-1a");
        assert_eq!(row.percent_busy, "66.67");
        assert_eq!(row.percent_free, "33.33");
        assert_eq!(row.busy_cpu_list, "4,6");
        assert_eq!(row.idle_cpu_list, "5");
        assert!(!row.is_sentinel());
    }

    #[test]
    fn test_sentinel_row_without_metadata() {
        let outcome = HostOutcome::Failed(HostFailure {
            host: "TA-apne1-md01".into(),
            state: SamplerState::Connecting,
            error: AuditError::connection("TA-apne1-md01", "no route to host"),
        });

        let row = AuditRow::build(&target(), &outcome, None);
        assert!(row.is_sentinel());
        assert_eq!(row.status, "ERROR: connection to TA-apne1-md01 failed: no route to host");
        assert_eq!(row.percent_busy, "0.00");
        assert_eq!(row.percent_free, "0.00");
        assert_eq!(row.busy_cpu_list, "");
        assert_eq!(row.owner, "");
        assert_eq!(row.instance_type, "");
    }

    #[test]
    fn test_hashmap_lookup() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), Metadata::default());
        assert!(MetadataLookup::get(&map, "a").is_some());
        assert!(MetadataLookup::get(&map, "b").is_none());
    }
}
