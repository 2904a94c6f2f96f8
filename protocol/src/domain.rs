use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtocolError;

/// Opaque device identity: a 128-bit value generated by the agent on first
/// run and persisted locally. Immutable and unique once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub Uuid);

impl DeviceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Device platform tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Windows,
    Linux,
    Android,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Platform::Windows => "windows",
            Platform::Linux => "linux",
            Platform::Android => "android",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Platform {
    type Err = ProtocolError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "windows" => Ok(Platform::Windows),
            "linux" => Ok(Platform::Linux),
            "android" => Ok(Platform::Android),
            other => Err(ProtocolError::UnknownPlatform(other.to_string())),
        }
    }
}

/// Interpreter used to run a task's script body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptType {
    Powershell,
    Cmd,
    Python,
    Bash,
    Shell,
    Adb,
}

impl FromStr for ScriptType {
    type Err = ProtocolError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "powershell" => Ok(ScriptType::Powershell),
            "cmd" => Ok(ScriptType::Cmd),
            "python" => Ok(ScriptType::Python),
            "bash" => Ok(ScriptType::Bash),
            "shell" => Ok(ScriptType::Shell),
            "adb" => Ok(ScriptType::Adb),
            other => Err(ProtocolError::UnknownScriptType(other.to_string())),
        }
    }
}

/// Who a task should run on: one device, every online device, or every
/// online device of a given platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target_type", rename_all = "snake_case")]
pub enum TargetSelector {
    Device { device_id: DeviceId },
    AllOnline,
    Platform { platform: Platform },
}

/// One event a task can be triggered by. Network-change is the only
/// concrete variant today; the watcher that fires it lives in
/// `rmm-agent::scheduler`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NetworkChange,
}

/// A task's firing rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trigger_type", rename_all = "snake_case")]
pub enum Trigger {
    Now,
    Once { scheduled_at: DateTime<Utc> },
    Interval { interval_seconds: u64 },
    Cron { cron_expression: String },
    Event { event_kind: EventKind },
}

/// Server-side lifecycle of a `Task` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Dispatched,
    Cancelled,
}

/// Lifecycle of one `TaskResult` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Running,
    Completed,
    Failed,
    Timeout,
}

/// Durable server-side task definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub script_type: ScriptType,
    pub script_body: String,
    pub target: TargetSelector,
    pub trigger: Trigger,
    pub status: TaskStatus,
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Cancelling always moves status to `Cancelled` in the same step —
    /// the two fields never disagree.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.status = TaskStatus::Cancelled;
    }
}

/// Durable per-(task, device) execution record. A `running` stub is created
/// at dispatch time so the dashboard shows pending devices before any agent
/// has reported back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: Uuid,
    pub task_id: Uuid,
    pub device_id: DeviceId,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub progress: u8,
    pub status: ResultStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskResult {
    pub fn new_running_stub(task_id: Uuid, device_id: DeviceId, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            device_id,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            progress: 0,
            status: ResultStatus::Running,
            started_at: Some(now),
            completed_at: None,
        }
    }

    pub fn append_stdout_line(&mut self, line: &str) {
        self.stdout.push_str(line);
        self.stdout = crate::caps::truncate_utf8(&self.stdout, crate::caps::STDOUT_CAP_BYTES);
    }
}

/// Agent-local mirror of a scheduled `Task`, minus script history, plus
/// `last_run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedTask {
    pub task_id: Uuid,
    pub name: String,
    pub script_type: ScriptType,
    pub script_body: String,
    pub trigger: Trigger,
    pub cancelled: bool,
    pub last_run: Option<DateTime<Utc>>,
}

/// Six heartbeat intervals keyed by battery band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryBandPolicy {
    pub plugged_seconds: u64,
    pub battery_100_80_seconds: u64,
    pub battery_79_50_seconds: u64,
    pub battery_49_20_seconds: u64,
    pub battery_19_10_seconds: u64,
    pub battery_9_0_seconds: u64,
}

impl Default for BatteryBandPolicy {
    fn default() -> Self {
        Self {
            plugged_seconds: 30,
            battery_100_80_seconds: 60,
            battery_79_50_seconds: 180,
            battery_49_20_seconds: 300,
            battery_19_10_seconds: 600,
            battery_9_0_seconds: 900,
        }
    }
}

/// A policy, bound either to one device or as the (at most one) default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: Uuid,
    pub name: String,
    pub device_id: Option<DeviceId>,
    pub bands: BatteryBandPolicy,
    pub low_battery_alert_threshold: u8,
    pub disk_scan_interval_seconds: u64,
    pub hardware_scan_interval_seconds: u64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: "Default Policy".to_string(),
            device_id: None,
            bands: BatteryBandPolicy::default(),
            low_battery_alert_threshold: 15,
            disk_scan_interval_seconds: 7 * 24 * 3600,
            hardware_scan_interval_seconds: 30 * 24 * 3600,
        }
    }
}

/// Current battery/CPU/RAM/disk readings, all nullable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub battery_level: Option<u8>,
    #[serde(default)]
    pub battery_charging: bool,
    pub cpu_percent: Option<f32>,
    pub ram_percent: Option<f32>,
    pub disk_percent: Option<f32>,
    #[serde(default)]
    pub ip_address: Option<String>,
}

/// Online/offline, driven only by session lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Offline,
}

/// Durable per-device record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: DeviceId,
    pub hostname: String,
    pub label: Option<String>,
    pub platform: Platform,
    pub os_info: String,
    pub ip_address: Option<String>,
    pub mac_address: Option<String>,
    pub agent_version: String,
    pub status: DeviceStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub telemetry: TelemetrySnapshot,
    pub first_seen: DateTime<Utc>,
    pub policy_id: Option<Uuid>,
    pub disk_scan: Vec<DiskScanEntry>,
    pub hardware: Option<HardwareReport>,
}

/// One disk scanned by `disk_scan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskScanEntry {
    pub path: String,
    pub used_gb: f64,
    pub total_gb: Option<f64>,
    pub percent: u8,
}

/// CPU/RAM/GPU/disk/motherboard snapshot taken during a hardware scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HardwareReport {
    pub cpu_name: Option<String>,
    pub cpu_cores: Option<u32>,
    pub ram_total_gb: Option<f64>,
    pub gpu_name: Option<String>,
    pub disks: Vec<DiskScanEntry>,
    pub motherboard: Option<String>,
    pub mac_address: Option<String>,
}

/// A single log line forwarded by an agent over the `log` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub device_id: DeviceId,
    pub level: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_cancel_sets_status() {
        let mut t = Task {
            id: Uuid::new_v4(),
            name: "x".into(),
            script_type: ScriptType::Bash,
            script_body: "echo hi".into(),
            target: TargetSelector::AllOnline,
            trigger: Trigger::Now,
            status: TaskStatus::Pending,
            cancelled: false,
            created_at: Utc::now(),
        };
        t.cancel();
        assert!(t.cancelled);
        assert_eq!(t.status, TaskStatus::Cancelled);
    }

    #[test]
    fn platform_roundtrips_through_str() {
        for p in [Platform::Windows, Platform::Linux, Platform::Android] {
            let s = p.to_string();
            assert_eq!(s.parse::<Platform>().unwrap(), p);
        }
    }

    #[test]
    fn script_type_rejects_unknown() {
        assert!("not-a-real-one".parse::<ScriptType>().is_err());
    }
}
