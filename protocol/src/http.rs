//! HTTP DTOs for check-in and the dashboard API.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{CachedTask, DeviceId, EventKind, Platform, Policy, ScriptType};

/// `POST /api/agent/checkin` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckinRequest {
    pub device_id: DeviceId,
    pub agent_version: String,
    pub platform: Platform,
    pub hostname: String,
    pub ip_address: Option<String>,
    pub os_info: String,
    pub battery_level: Option<u8>,
    #[serde(default)]
    pub battery_charging: bool,
    pub cpu_percent: Option<f32>,
    pub ram_percent: Option<f32>,
    pub disk_percent: Option<f32>,
}

/// `POST /api/agent/checkin` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckinResponse {
    pub device_id: DeviceId,
    pub registered: bool,
    pub policy: Policy,
    pub websocket_url: String,
    pub scheduled_tasks: Vec<CachedTask>,
    #[serde(default)]
    pub update_available: Option<String>,
    #[serde(default)]
    pub auto_update: Option<bool>,
}

/// `POST /api/dashboard/tasks` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub name: String,
    pub script_type: ScriptType,
    pub script_body: String,
    pub target_type: TargetTypeDto,
    pub target_device_id: Option<DeviceId>,
    pub target_platform: Option<Platform>,
    pub trigger_type: TriggerTypeDto,
    pub scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
    pub interval_seconds: Option<u64>,
    pub cron_expression: Option<String>,
    pub event_kind: Option<EventKind>,
    #[serde(default)]
    pub dispatch_now: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetTypeDto {
    Device,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerTypeDto {
    Now,
    Once,
    Interval,
    Cron,
    Event,
}

/// `POST /api/dashboard/tasks` / `.../{id}/dispatch` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub id: Uuid,
    pub status: String,
}

/// `GET /api/dashboard/tasks/{id}` response body — this is what an agent
/// polls to confirm a cached task hasn't been cancelled before running it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinitionResponse {
    pub id: Uuid,
    pub name: String,
    pub cancelled: bool,
    pub status: String,
}
