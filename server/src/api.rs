//! REST API: agent check-in and the dashboard task/device surface.
//! Thin handlers over shared state — each one reads/writes the stores on
//! `AppState` directly rather than through a service layer.

use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use rmm_protocol::{
    CheckinRequest, CheckinResponse, CreateTaskRequest, CreateTaskResponse, DeviceId, Task,
    TargetSelector, TargetTypeDto, TaskDefinitionResponse, TaskStatus, Trigger, TriggerTypeDto,
};

use crate::error::ServerError;
use crate::state::AppState;

/// `GET /api/health` — liveness probe for load balancers and orchestrators.
pub async fn health() -> &'static str {
    "ok"
}

/// `POST /api/agent/checkin` — upserts the device record, returns the
/// effective policy, the advertised WebSocket URL, and any cached tasks the
/// agent should hold locally.
pub async fn checkin(
    State(state): State<AppState>,
    Json(req): Json<CheckinRequest>,
) -> Json<CheckinResponse> {
    state
        .device_store
        .upsert_checkin(
            req.device_id,
            req.platform,
            req.hostname,
            req.agent_version,
            req.os_info,
        )
        .await;

    let policy = state.device_store.effective_policy(&req.device_id).await;
    let websocket_url = format!(
        "ws://{}:{}/ws/agent/{}?token={}",
        state.config.server_ip, state.config.backend_port, req.device_id, state.config.agent_token
    );

    let scheduled_tasks = state
        .task_store
        .list()
        .await
        .into_iter()
        .filter(|t| !t.cancelled && task_targets_device(t, req.device_id))
        .map(|t| rmm_protocol::CachedTask {
            task_id: t.id,
            name: t.name,
            script_type: t.script_type,
            script_body: t.script_body,
            trigger: t.trigger,
            cancelled: t.cancelled,
            last_run: None,
        })
        .collect();

    Json(CheckinResponse {
        device_id: req.device_id,
        registered: true,
        policy,
        websocket_url,
        scheduled_tasks,
        update_available: None,
        auto_update: None,
    })
}

fn task_targets_device(task: &Task, device_id: DeviceId) -> bool {
    match &task.target {
        TargetSelector::Device { device_id: d } => *d == device_id,
        TargetSelector::AllOnline => true,
        TargetSelector::Platform { .. } => true,
    }
}

/// `GET /api/devices` — dashboard device list.
pub async fn list_devices(State(state): State<AppState>) -> Json<Vec<rmm_protocol::Device>> {
    Json(state.device_store.list().await)
}

/// `GET /api/devices/{device_id}`
pub async fn get_device(
    State(state): State<AppState>,
    Path(device_id): Path<DeviceId>,
) -> Result<Json<rmm_protocol::Device>, ServerError> {
    state
        .device_store
        .get(&device_id)
        .await
        .map(Json)
        .ok_or_else(|| ServerError::DeviceNotFound(device_id.to_string()))
}

/// `POST /api/dashboard/tasks` — creates a task and optionally dispatches it
/// immediately via the `dispatch_now` flag.
pub async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Json<CreateTaskResponse>, ServerError> {
    let target = match req.target_type {
        TargetTypeDto::Device => TargetSelector::Device {
            device_id: req
                .target_device_id
                .ok_or_else(|| ServerError::DeviceNotFound("missing target_device_id".into()))?,
        },
        TargetTypeDto::All => match req.target_platform {
            Some(platform) => TargetSelector::Platform { platform },
            None => TargetSelector::AllOnline,
        },
    };

    let trigger = match req.trigger_type {
        TriggerTypeDto::Now => Trigger::Now,
        TriggerTypeDto::Once => Trigger::Once {
            scheduled_at: req.scheduled_at.unwrap_or_else(chrono::Utc::now),
        },
        TriggerTypeDto::Interval => Trigger::Interval {
            interval_seconds: req.interval_seconds.unwrap_or(3600),
        },
        TriggerTypeDto::Cron => Trigger::Cron {
            cron_expression: req.cron_expression.unwrap_or_default(),
        },
        TriggerTypeDto::Event => Trigger::Event {
            event_kind: req
                .event_kind
                .unwrap_or(rmm_protocol::EventKind::NetworkChange),
        },
    };

    let task = Task {
        id: Uuid::new_v4(),
        name: req.name,
        script_type: req.script_type,
        script_body: req.script_body,
        target,
        trigger,
        status: TaskStatus::Pending,
        cancelled: false,
        created_at: chrono::Utc::now(),
    };

    let id = task.id;
    state.task_store.insert(task.clone()).await;

    if req.dispatch_now {
        state.dispatcher.dispatch(&task).await;
    }

    Ok(Json(CreateTaskResponse {
        id,
        status: "created".into(),
    }))
}

/// `POST /api/dashboard/tasks/{id}/dispatch` — dispatch an already-created
/// task on demand.
pub async fn dispatch_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<CreateTaskResponse>, ServerError> {
    let task = state
        .task_store
        .get(task_id)
        .await
        .ok_or(ServerError::TaskNotFound(task_id))?;
    state.dispatcher.dispatch(&task).await;
    Ok(Json(CreateTaskResponse {
        id: task_id,
        status: "dispatched".into(),
    }))
}

/// `POST /api/dashboard/tasks/{id}/cancel`
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<CreateTaskResponse>, ServerError> {
    if state.dispatcher.cancel(task_id).await {
        Ok(Json(CreateTaskResponse {
            id: task_id,
            status: "cancelled".into(),
        }))
    } else {
        Err(ServerError::TaskNotFound(task_id))
    }
}

/// `GET /api/dashboard/tasks/{id}` — the endpoint an agent polls before
/// running a cached task, to confirm it hasn't been cancelled in the
/// meantime.
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskDefinitionResponse>, ServerError> {
    let task = state
        .task_store
        .get(task_id)
        .await
        .ok_or(ServerError::TaskNotFound(task_id))?;
    Ok(Json(TaskDefinitionResponse {
        id: task.id,
        name: task.name,
        cancelled: task.cancelled,
        status: format!("{:?}", task.status).to_lowercase(),
    }))
}

/// `GET /api/dashboard/tasks/{id}/results`
pub async fn task_results(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Json<Vec<rmm_protocol::TaskResult>> {
    Json(state.task_store.results_for_task(task_id).await)
}

/// `PUT /api/policy` — replaces the single default policy. Per-device policy
/// overrides exist on `DeviceStore`, but editing them from the dashboard is
/// out of scope for this endpoint.
pub async fn set_policy(
    State(state): State<AppState>,
    Json(policy): Json<rmm_protocol::Policy>,
) -> Json<rmm_protocol::Policy> {
    state.device_store.set_policy(policy.clone()).await;
    Json(policy)
}
