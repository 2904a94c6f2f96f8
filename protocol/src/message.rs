//! WebSocket envelope exchanged on the agent session.
//!
//! Every frame is a single JSON text frame shaped `{"type": "...", ...}`, an
//! internally-tagged enum carrying the full agent/server message catalogue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{CachedTask, HardwareReport, Policy, TelemetrySnapshot};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    // ── Agent → Server ──────────────────────────────────────────
    /// Periodic telemetry push; cadence driven by the Adaptive Heartbeat.
    Heartbeat { data: TelemetrySnapshot },

    /// Final outcome of a task execution.
    TaskResult {
        data: TaskResultPayload,
    },

    /// Streaming partial stdout while a task is still running.
    TaskOutput {
        task_id: Uuid,
        output: String,
        progress: u8,
    },

    /// A single log line from the agent.
    Log { level: String, message: String },

    /// Result of a disk usage scan.
    DiskScan {
        details: Vec<crate::domain::DiskScanEntry>,
    },

    /// Result of a hardware inventory scan.
    HardwareReport { data: HardwareReport },

    // ── Server → Agent ───────────────────────────────────────────
    /// Execute immediately; no local caching.
    RunTask {
        task_id: Uuid,
        name: String,
        script_type: crate::domain::ScriptType,
        script_body: String,
    },

    /// Add (or replace) an entry in the agent's local task cache.
    ScheduleTask { data: CachedTask },

    /// Mark a cached task cancelled.
    CancelTask { task_id: Uuid },

    /// Replace the agent's in-memory policy.
    UpdatePolicy { data: Policy },

    /// Ask the agent to run a disk scan now.
    DiskScanRequest {},
}

/// Payload of an inbound `task_result` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResultPayload {
    pub task_id: Uuid,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub started_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_round_trips_as_json() {
        let msg = WsMessage::Heartbeat {
            data: TelemetrySnapshot {
                battery_level: Some(42),
                battery_charging: false,
                cpu_percent: Some(12.5),
                ram_percent: Some(55.0),
                disk_percent: Some(70.0),
                ip_address: Some("10.0.0.5".into()),
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"heartbeat\""));
        let back: WsMessage = serde_json::from_str(&json).unwrap();
        match back {
            WsMessage::Heartbeat { data } => assert_eq!(data.battery_level, Some(42)),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn cancel_task_carries_task_id() {
        let id = Uuid::new_v4();
        let msg = WsMessage::CancelTask { task_id: id };
        let json = serde_json::to_string(&msg).unwrap();
        let back: WsMessage = serde_json::from_str(&json).unwrap();
        match back {
            WsMessage::CancelTask { task_id } => assert_eq!(task_id, id),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
