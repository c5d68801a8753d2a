//! cpuwatch core - busy/idle audit of (isolated) CPUs on remote hosts
//!
//! For one host the engine:
//! - discovers the kernel-isolated CPUs, or watches every CPU when none are
//! - reads `/proc/stat` per-CPU counters twice, a fixed interval apart
//! - classifies each watched CPU as Busy, Idle or Unknown
//!
//! The fleet auditor repeats this over a host list with bounded concurrency
//! and joins each host with its inventory metadata. How commands reach a host
//! is left to a [`Connector`] implementation.

pub mod classify;
pub mod cpulist;
pub mod error;
pub mod fleet;
pub mod runner;
pub mod sampler;
pub mod stat;

pub use classify::{classify, utilization, CpuVerdict, DEFAULT_THRESHOLD_PCT};
pub use cpulist::CpuSet;
pub use error::{AuditError, Result};
pub use fleet::{
    AuditRow, FleetAuditor, FleetConfig, HostReport, HostTarget, Metadata, MetadataLookup,
    DEFAULT_CONCURRENCY,
};
pub use runner::{CommandOutput, CommandRunner, Connector};
pub use sampler::{
    CpuReport, HostAuditResult, HostFailure, HostOutcome, HostSampler, SamplerConfig, SamplerState,
};
pub use stat::CounterSnapshot;
