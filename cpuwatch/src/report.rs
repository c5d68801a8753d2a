//! CSV report: one row per audited host, header first.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use cpuwatch_core::AuditRow;

/// Resolve `{date}` in the configured output path
pub fn output_path(template: &str, now: DateTime<Utc>) -> PathBuf {
    PathBuf::from(template.replace("{date}", &now.format("%Y%m%d-%H%M%S").to_string()))
}

/// Write rows (header included) to any writer
pub fn write_rows<W: Write>(writer: W, rows: &[AuditRow]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for row in rows {
        csv.serialize(row).context("Failed to serialize report row")?;
    }
    // no rows still gets a header
    if rows.is_empty() {
        csv.write_record(HEADER)?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_csv(path: &Path, rows: &[AuditRow]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    write_rows(file, rows)?;
    info!("Results written to {} ({} rows)", path.display(), rows.len());
    Ok(())
}

/// Column names, in `AuditRow` field order
pub const HEADER: [&str; 11] = [
    "num",
    "server_name",
    "availability_zone",
    "team",
    "owner",
    "instance_type",
    "percent_busy",
    "percent_free",
    "busy_cpu_list",
    "idle_cpu_list",
    "status",
];

/// One log line per row, as the audit progresses
pub fn log_row(row: &AuditRow) {
    info!(
        "{}, {}, {}, {}, owner: {}, instance_type: {}, %Busy: {}, %Free: {}, Busy: {}, Idle: {}{}",
        row.num,
        row.server_name,
        row.availability_zone,
        row.team,
        row.owner,
        row.instance_type,
        row.percent_busy,
        row.percent_free,
        row.busy_cpu_list,
        row.idle_cpu_list,
        if row.is_sentinel() {
            format!(", {}", row.status)
        } else {
            String::new()
        }
    );
}
