//! Adaptive heartbeat: computes the next heartbeat delay from the current
//! battery reading and policy, and collects the telemetry snapshot that
//! rides along with each heartbeat. Uses `sysinfo` for cross-platform
//! CPU/RAM/disk readings.

use std::time::Duration;

use sysinfo::{Disks, System};

use rmm_protocol::{BatteryBandPolicy, TelemetrySnapshot};

/// The battery-band interval table. `charging == true` or an unknown
/// battery level always uses `plugged_seconds`.
pub fn next_interval(telemetry: &TelemetrySnapshot, policy: &BatteryBandPolicy) -> Duration {
    let seconds = match telemetry.battery_level {
        None => policy.plugged_seconds,
        Some(_) if telemetry.battery_charging => policy.plugged_seconds,
        Some(level) if level >= 80 => policy.battery_100_80_seconds,
        Some(level) if level >= 50 => policy.battery_79_50_seconds,
        Some(level) if level >= 20 => policy.battery_49_20_seconds,
        Some(level) if level >= 10 => policy.battery_19_10_seconds,
        Some(_) => policy.battery_9_0_seconds,
    };
    Duration::from_secs(seconds)
}

/// Collects the current telemetry snapshot. Battery readings are
/// platform-dependent and best-effort; `sysinfo` does not expose battery
/// state directly, so this reports `None`/not-charging cross-platform —
/// laptops would report battery through a future OS-specific hook, left as
/// the already-nullable `TelemetrySnapshot.battery_level`.
pub async fn collect(local_ip: Option<String>) -> TelemetrySnapshot {
    tokio::task::spawn_blocking(move || {
        let mut sys = System::new_all();
        sys.refresh_cpu_usage();
        std::thread::sleep(Duration::from_millis(200));
        sys.refresh_cpu_usage();
        let cpu_percent = if sys.cpus().is_empty() {
            None
        } else {
            Some(sys.global_cpu_usage())
        };

        sys.refresh_memory();
        let ram_percent = if sys.total_memory() > 0 {
            Some((sys.used_memory() as f32 / sys.total_memory() as f32) * 100.0)
        } else {
            None
        };

        let disks = Disks::new_with_refreshed_list();
        let disk_percent = disks.list().first().map(|d| {
            let total = d.total_space() as f32;
            let available = d.available_space() as f32;
            if total > 0.0 {
                ((total - available) / total) * 100.0
            } else {
                0.0
            }
        });

        TelemetrySnapshot {
            battery_level: None,
            battery_charging: false,
            cpu_percent,
            ram_percent,
            disk_percent,
            ip_address: local_ip,
        }
    })
    .await
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BatteryBandPolicy {
        BatteryBandPolicy {
            plugged_seconds: 30,
            battery_100_80_seconds: 60,
            battery_79_50_seconds: 180,
            battery_49_20_seconds: 300,
            battery_19_10_seconds: 600,
            battery_9_0_seconds: 900,
        }
    }

    fn telemetry(level: Option<u8>, charging: bool) -> TelemetrySnapshot {
        TelemetrySnapshot {
            battery_level: level,
            battery_charging: charging,
            cpu_percent: None,
            ram_percent: None,
            disk_percent: None,
            ip_address: None,
        }
    }

    #[test]
    fn charging_or_unknown_uses_plugged_interval() {
        assert_eq!(
            next_interval(&telemetry(None, false), &policy()),
            Duration::from_secs(30)
        );
        assert_eq!(
            next_interval(&telemetry(Some(40), true), &policy()),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn band_boundaries_fall_into_the_higher_band() {
        // exactly 80/50/20/10 fall into the higher (less frequent) band,
        // not the lower one.
        assert_eq!(
            next_interval(&telemetry(Some(80), false), &policy()),
            Duration::from_secs(60)
        );
        assert_eq!(
            next_interval(&telemetry(Some(50), false), &policy()),
            Duration::from_secs(180)
        );
        assert_eq!(
            next_interval(&telemetry(Some(20), false), &policy()),
            Duration::from_secs(300)
        );
        assert_eq!(
            next_interval(&telemetry(Some(10), false), &policy()),
            Duration::from_secs(600)
        );
        assert_eq!(
            next_interval(&telemetry(Some(9), false), &policy()),
            Duration::from_secs(900)
        );
    }

    #[test]
    fn interval_is_monotone_in_battery_band() {
        let levels = [5u8, 15, 25, 60, 95];
        let mut prev = Duration::from_secs(u64::MAX);
        for level in levels {
            let d = next_interval(&telemetry(Some(level), false), &policy());
            assert!(d <= prev, "interval should not increase as battery rises");
            prev = d;
        }
    }
}
