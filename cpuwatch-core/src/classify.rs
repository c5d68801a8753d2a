//! Busy/idle verdict for one CPU from two counter snapshots.
//!
//! Classification never fails: a CPU whose counters cannot be compared is
//! `Unknown`, so one odd core never costs the rest of the host's report.

use serde::Serialize;

use crate::stat::{idle_and_total, CounterSnapshot};

/// Utilisation above which a CPU counts as busy (percent).
pub const DEFAULT_THRESHOLD_PCT: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CpuVerdict {
    Busy,
    Idle,
    Unknown,
}

impl std::fmt::Display for CpuVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CpuVerdict::Busy => "Busy",
            CpuVerdict::Idle => "Idle",
            CpuVerdict::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

/// Utilisation (percent, 0..=100) of `cpu` between `a` and `b`.
///
/// `None` when either snapshot lacks the CPU, a row is too short, or the
/// counters went backwards. An interval with no elapsed ticks is 0%.
pub fn utilization(a: &CounterSnapshot, b: &CounterSnapshot, cpu: u32) -> Option<f64> {
    let (idle_a, total_a) = idle_and_total(a.get(cpu)?)?;
    let (idle_b, total_b) = idle_and_total(b.get(cpu)?)?;

    let total_delta = total_b.checked_sub(total_a)?;
    let idle_delta = idle_b.checked_sub(idle_a)?;

    if total_delta == 0 {
        return Some(0.0);
    }

    // 100 * (1 - idle/total), kept in integers until the last division so a
    // sample sitting exactly on the threshold compares exactly.
    let busy_delta = total_delta.saturating_sub(idle_delta);
    let pct = (busy_delta as f64 * 100.0) / total_delta as f64;
    Some(pct.clamp(0.0, 100.0))
}

/// Busy when utilisation is strictly above `threshold_pct`.
pub fn classify(a: &CounterSnapshot, b: &CounterSnapshot, cpu: u32, threshold_pct: f64) -> CpuVerdict {
    match utilization(a, b, cpu) {
        Some(pct) if pct > threshold_pct => CpuVerdict::Busy,
        Some(_) => CpuVerdict::Idle,
        None => CpuVerdict::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(rows: &[(u32, &[u64])]) -> CounterSnapshot {
        rows.iter().map(|(cpu, c)| (*cpu, c.to_vec())).collect()
    }

    #[test]
    fn test_identical_snapshots_are_idle() {
        let a = snap(&[(0, &[100, 0, 50, 1000, 10])]);
        assert_eq!(utilization(&a, &a, 0), Some(0.0));
        assert_eq!(classify(&a, &a, 0, DEFAULT_THRESHOLD_PCT), CpuVerdict::Idle);
    }

    #[test]
    fn test_missing_cpu_is_unknown() {
        let a = snap(&[(0, &[1, 0, 1, 10]), (1, &[1, 0, 1, 10])]);
        let b = snap(&[(0, &[2, 0, 2, 20])]);
        assert_eq!(classify(&a, &b, 1, DEFAULT_THRESHOLD_PCT), CpuVerdict::Unknown);
        assert_eq!(classify(&b, &a, 1, DEFAULT_THRESHOLD_PCT), CpuVerdict::Unknown);
        assert_eq!(classify(&a, &b, 7, DEFAULT_THRESHOLD_PCT), CpuVerdict::Unknown);
    }

    #[test]
    fn test_eighty_percent_is_busy() {
        // total_delta = 1000, idle_delta = 200
        let a = snap(&[(1, &[0, 0, 0, 0, 0])]);
        let b = snap(&[(1, &[700, 0, 100, 150, 50])]);
        assert_eq!(utilization(&a, &b, 1), Some(80.0));
        assert_eq!(classify(&a, &b, 1, DEFAULT_THRESHOLD_PCT), CpuVerdict::Busy);
    }

    #[test]
    fn test_exact_threshold_is_not_busy() {
        // idle_delta 990 of 1000 -> exactly 1%
        let a = snap(&[(0, &[0, 0, 0, 0])]);
        let b = snap(&[(0, &[10, 0, 0, 990])]);
        assert_eq!(utilization(&a, &b, 0), Some(1.0));
        assert_eq!(classify(&a, &b, 0, 1.0), CpuVerdict::Idle);

        let b = snap(&[(0, &[11, 0, 0, 989])]);
        assert_eq!(classify(&a, &b, 0, 1.0), CpuVerdict::Busy);
    }

    #[test]
    fn test_iowait_counts_as_idle() {
        let a = snap(&[(0, &[0, 0, 0, 0, 0])]);
        let b = snap(&[(0, &[5, 0, 0, 500, 495])]);
        assert_eq!(classify(&a, &b, 0, 1.0), CpuVerdict::Idle);
    }

    #[test]
    fn test_counter_regression_is_unknown() {
        let a = snap(&[(0, &[100, 0, 100, 1000])]);
        let b = snap(&[(0, &[50, 0, 50, 500])]);
        assert_eq!(classify(&a, &b, 0, 1.0), CpuVerdict::Unknown);
    }

    #[test]
    fn test_idle_growing_faster_than_total_clamps() {
        // idle went up while another column dropped: nonsense, but total
        let a = snap(&[(0, &[100, 0, 0, 0])]);
        let b = snap(&[(0, &[0, 0, 0, 150])]);
        assert_eq!(utilization(&a, &b, 0), Some(0.0));
    }

    #[test]
    fn test_threshold_is_configurable() {
        let a = snap(&[(0, &[0, 0, 0, 0])]);
        let b = snap(&[(0, &[50, 0, 0, 950])]);
        assert_eq!(classify(&a, &b, 0, 1.0), CpuVerdict::Busy);
        assert_eq!(classify(&a, &b, 0, 10.0), CpuVerdict::Idle);
    }
}
