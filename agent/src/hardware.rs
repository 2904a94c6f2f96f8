//! Hardware / disk scan: collects the `disk_scan` and `hardware_report`
//! payloads.
//!
//! GPU/motherboard/per-DIMM RAM detail needs shelling out to PowerShell/WMI
//! on Windows specifically; this collects the cross-platform-safe subset
//! through `sysinfo` (CPU/RAM/disks) and reports the rest as `None` — every
//! field on `HardwareReport` is already nullable, so a thinner
//! cross-platform collector is a faithful subset, not a redesign.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sysinfo::{Disks, System};
use tracing::info;

use rmm_protocol::{DiskScanEntry, HardwareReport, WsMessage};

use crate::state::AgentState;

/// Tick the periodic scan loop checks policy intervals against. Independent
/// of the 30-s trigger evaluator tick — scans are policy-cadence, not
/// task-cadence.
const SCAN_LOOP_TICK: Duration = Duration::from_secs(60);

/// Abstracts hardware collection so a platform-specific collector (e.g.
/// one that shells out to PowerShell for GPU/motherboard detail on
/// Windows) can be swapped in later without touching the caller.
pub trait HardwareCollector: Send + Sync {
    fn collect(&self) -> HardwareReport;
    fn disk_scan(&self) -> Vec<DiskScanEntry>;
}

pub struct SysinfoHardwareCollector;

impl HardwareCollector for SysinfoHardwareCollector {
    fn collect(&self) -> HardwareReport {
        let mut sys = System::new_all();
        sys.refresh_cpu_all();
        sys.refresh_memory();

        let cpu_name = sys.cpus().first().map(|c| c.brand().to_string());
        let cpu_cores = u32::try_from(sys.cpus().len()).ok();
        let ram_total_gb = Some(sys.total_memory() as f64 / 1_073_741_824.0);

        HardwareReport {
            cpu_name,
            cpu_cores,
            ram_total_gb,
            gpu_name: None,
            disks: self.disk_scan(),
            motherboard: None,
            mac_address: None,
        }
    }

    fn disk_scan(&self) -> Vec<DiskScanEntry> {
        Disks::new_with_refreshed_list()
            .list()
            .iter()
            .map(|d| {
                let total = d.total_space();
                let used = total.saturating_sub(d.available_space());
                let percent = if total > 0 {
                    ((used as f64 / total as f64) * 100.0).round() as u8
                } else {
                    0
                };
                DiskScanEntry {
                    path: d.mount_point().to_string_lossy().to_string(),
                    used_gb: used as f64 / 1_000_000_000.0,
                    total_gb: Some(total as f64 / 1_000_000_000.0),
                    percent,
                }
            })
            .collect()
    }
}

/// Runs the disk-scan and hardware-scan timers forever, firing each
/// independently once its policy interval has elapsed since the last run.
/// Never returns.
pub async fn run_scan_loop(state: Arc<AgentState>) -> ! {
    let collector = SysinfoHardwareCollector;
    let mut last_disk_scan: Option<Instant> = None;
    let mut last_hardware_scan: Option<Instant> = None;

    loop {
        tokio::time::sleep(SCAN_LOOP_TICK).await;
        let policy = state.policy.read().await.clone();

        let disk_due = last_disk_scan
            .map(|t| t.elapsed() >= Duration::from_secs(policy.disk_scan_interval_seconds))
            .unwrap_or(true);
        if disk_due {
            info!("running policy-driven disk scan");
            let details = collector.disk_scan();
            state.try_send(WsMessage::DiskScan { details }).await;
            last_disk_scan = Some(Instant::now());
        }

        let hardware_due = last_hardware_scan
            .map(|t| t.elapsed() >= Duration::from_secs(policy.hardware_scan_interval_seconds))
            .unwrap_or(true);
        if hardware_due {
            info!("running policy-driven hardware scan");
            let data = collector.collect();
            state.try_send(WsMessage::HardwareReport { data }).await;
            last_hardware_scan = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_scan_never_panics_on_an_empty_machine() {
        let collector = SysinfoHardwareCollector;
        let _ = collector.disk_scan();
    }

    #[test]
    fn collect_reports_some_cpu_core_count_when_cpus_present() {
        let collector = SysinfoHardwareCollector;
        let report = collector.collect();
        if report.cpu_name.is_some() {
            assert!(report.cpu_cores.unwrap_or(0) > 0);
        }
    }
}
