//! `check_cpu` sampling: per-core utilization percent over a sampling
//! window, read from `/proc/stat` (Linux). Two snapshots `window` apart;
//! utilization is the fraction of non-idle jiffies in the delta.

use shared::error::AppError;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
struct CpuTimes {
    idle: u64,
    total: u64,
}

fn parse_proc_stat(contents: &str) -> BTreeMap<String, CpuTimes> {
    let mut result = BTreeMap::new();
    for line in contents.lines() {
        if !line.starts_with("cpu") || line.starts_with("cpu ") {
            continue;
        }
        let mut fields = line.split_whitespace();
        let Some(raw_label) = fields.next() else { continue };
        let Some(core) = raw_label.strip_prefix("cpu") else { continue };
        let values: Vec<u64> = fields.filter_map(|f| f.parse().ok()).collect();
        if values.len() < 4 {
            continue;
        }
        // user, nice, system, idle, iowait, irq, softirq, steal, ...
        let idle = values[3] + values.get(4).copied().unwrap_or(0);
        let total: u64 = values.iter().sum();
        result.insert(format!("cpu_{core}"), CpuTimes { idle, total });
    }
    result
}

/// Samples `/proc/stat` twice, `window` apart, and returns each logical
/// CPU's utilization percent over that window.
pub async fn sample_cpu_usage(window: Duration) -> shared::Result<BTreeMap<String, f64>> {
    let before = read_proc_stat().await?;
    tokio::time::sleep(window).await;
    let after = read_proc_stat().await?;

    let mut usage = BTreeMap::new();
    for (label, after_times) in &after {
        let Some(before_times) = before.get(label) else { continue };
        let total_delta = after_times.total.saturating_sub(before_times.total);
        let idle_delta = after_times.idle.saturating_sub(before_times.idle);
        let percent = if total_delta == 0 {
            0.0
        } else {
            (1.0 - idle_delta as f64 / total_delta as f64) * 100.0
        };
        usage.insert(label.clone(), percent);
    }
    Ok(usage)
}

async fn read_proc_stat() -> shared::Result<BTreeMap<String, CpuTimes>> {
    let contents = tokio::fs::read_to_string("/proc/stat")
        .await
        .map_err(|e| AppError::internal(format!("failed to read /proc/stat: {e}")))?;
    Ok(parse_proc_stat(&contents))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_proc_stat_extracts_per_core_lines_only() {
        let sample = "cpu  100 0 100 800 0 0 0 0 0 0\ncpu0 50 0 50 400 0 0 0 0 0 0\ncpu1 50 0 50 400 0 0 0 0 0 0\nintr 12345\n";
        let parsed = parse_proc_stat(sample);
        assert_eq!(parsed.len(), 2);
        assert!(parsed.contains_key("cpu_0"));
        assert!(parsed.contains_key("cpu_1"));
        assert!(!parsed.contains_key("cpu"));
    }

    #[test]
    fn fully_idle_delta_reports_zero_percent() {
        let before = CpuTimes { idle: 100, total: 200 };
        let after = CpuTimes { idle: 150, total: 250 };
        let idle_delta = after.idle - before.idle;
        let total_delta = after.total - before.total;
        let percent = (1.0 - idle_delta as f64 / total_delta as f64) * 100.0;
        assert_eq!(percent, 0.0);
    }
}
