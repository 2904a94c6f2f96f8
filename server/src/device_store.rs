//! Device Store: the persistence boundary for device records, assumed to
//! back onto a relational store in a real deployment.
//!
//! `DeviceStore` is a trait so the control-plane core never depends on a
//! concrete database; `InMemoryDeviceStore` is the adapter this crate wires
//! up by default.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use rmm_protocol::{
    Device, DeviceId, DeviceStatus, DiskScanEntry, HardwareReport, Platform, Policy,
    TelemetrySnapshot,
};

#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn upsert_checkin(
        &self,
        device_id: DeviceId,
        platform: Platform,
        hostname: String,
        agent_version: String,
        os_info: String,
    ) -> Device;

    async fn record_telemetry(&self, device_id: DeviceId, telemetry: &TelemetrySnapshot);

    async fn record_disk_scan(&self, device_id: DeviceId, entries: Vec<DiskScanEntry>);

    async fn record_hardware(&self, device_id: DeviceId, report: HardwareReport);

    async fn mark_online(&self, device_id: DeviceId);

    async fn mark_offline(&self, device_id: DeviceId);

    async fn get(&self, device_id: &DeviceId) -> Option<Device>;

    async fn list(&self) -> Vec<Device>;

    async fn list_by_platform(&self, platform: Platform) -> Vec<Device>;

    /// Policy applied to newly checking-in devices and returned from
    /// `checkin`.
    async fn effective_policy(&self, device_id: &DeviceId) -> Policy;

    async fn set_policy(&self, policy: Policy);
}

/// Default in-process adapter. Not durable across restarts; a real
/// deployment swaps this for a Postgres/SQLite implementation behind the
/// same trait.
pub struct InMemoryDeviceStore {
    devices: RwLock<HashMap<DeviceId, Device>>,
    policy: RwLock<Policy>,
}

impl InMemoryDeviceStore {
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            policy: RwLock::new(Policy::default()),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for InMemoryDeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceStore for InMemoryDeviceStore {
    async fn upsert_checkin(
        &self,
        device_id: DeviceId,
        platform: Platform,
        hostname: String,
        agent_version: String,
        os_info: String,
    ) -> Device {
        let mut devices = self.devices.write().await;
        let entry = devices.entry(device_id).or_insert_with(|| Device {
            device_id,
            hostname: hostname.clone(),
            label: None,
            platform,
            os_info: os_info.clone(),
            ip_address: None,
            mac_address: None,
            agent_version: agent_version.clone(),
            status: DeviceStatus::Offline,
            last_seen: None,
            telemetry: TelemetrySnapshot::default(),
            first_seen: Utc::now(),
            policy_id: None,
            disk_scan: Vec::new(),
            hardware: None,
        });
        entry.hostname = hostname;
        entry.agent_version = agent_version;
        entry.os_info = os_info;
        entry.last_seen = Some(Utc::now());
        entry.clone()
    }

    async fn record_telemetry(&self, device_id: DeviceId, telemetry: &TelemetrySnapshot) {
        if let Some(device) = self.devices.write().await.get_mut(&device_id) {
            device.telemetry = telemetry.clone();
            device.ip_address = telemetry.ip_address.clone();
            device.last_seen = Some(Utc::now());
        }
    }

    async fn record_disk_scan(&self, device_id: DeviceId, entries: Vec<DiskScanEntry>) {
        if let Some(device) = self.devices.write().await.get_mut(&device_id) {
            device.disk_scan = entries;
            device.last_seen = Some(Utc::now());
        }
    }

    async fn record_hardware(&self, device_id: DeviceId, report: HardwareReport) {
        if let Some(device) = self.devices.write().await.get_mut(&device_id) {
            device.hardware = Some(report);
            device.last_seen = Some(Utc::now());
        }
    }

    async fn mark_online(&self, device_id: DeviceId) {
        if let Some(device) = self.devices.write().await.get_mut(&device_id) {
            device.status = DeviceStatus::Online;
        }
    }

    async fn mark_offline(&self, device_id: DeviceId) {
        if let Some(device) = self.devices.write().await.get_mut(&device_id) {
            device.status = DeviceStatus::Offline;
        }
    }

    async fn get(&self, device_id: &DeviceId) -> Option<Device> {
        self.devices.read().await.get(device_id).cloned()
    }

    async fn list(&self) -> Vec<Device> {
        self.devices.read().await.values().cloned().collect()
    }

    async fn list_by_platform(&self, platform: Platform) -> Vec<Device> {
        self.devices
            .read()
            .await
            .values()
            .filter(|d| d.platform == platform)
            .cloned()
            .collect()
    }

    async fn effective_policy(&self, _device_id: &DeviceId) -> Policy {
        self.policy.read().await.clone()
    }

    async fn set_policy(&self, policy: Policy) {
        *self.policy.write().await = policy;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn checkin_creates_then_updates_device() {
        let store = InMemoryDeviceStore::new();
        let id = DeviceId::new();
        store
            .upsert_checkin(
                id,
                Platform::Linux,
                "host-a".into(),
                "1.0.0".into(),
                "Ubuntu 24.04".into(),
            )
            .await;
        let updated = store
            .upsert_checkin(
                id,
                Platform::Linux,
                "host-a-renamed".into(),
                "1.0.1".into(),
                "Ubuntu 24.04".into(),
            )
            .await;
        assert_eq!(updated.hostname, "host-a-renamed");
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn record_disk_scan_and_hardware_are_visible_on_the_device() {
        let store = InMemoryDeviceStore::new();
        let id = DeviceId::new();
        store
            .upsert_checkin(id, Platform::Linux, "h".into(), "1".into(), "Ubuntu 24.04".into())
            .await;

        store
            .record_disk_scan(
                id,
                vec![DiskScanEntry {
                    path: "/".into(),
                    used_gb: 10.0,
                    total_gb: Some(100.0),
                    percent: 10,
                }],
            )
            .await;
        store
            .record_hardware(
                id,
                HardwareReport {
                    cpu_name: Some("Some CPU".into()),
                    ..Default::default()
                },
            )
            .await;

        let device = store.get(&id).await.unwrap();
        assert_eq!(device.disk_scan.len(), 1);
        assert_eq!(device.hardware.unwrap().cpu_name.as_deref(), Some("Some CPU"));
    }

    #[tokio::test]
    async fn mark_online_offline_round_trips() {
        let store = InMemoryDeviceStore::new();
        let id = DeviceId::new();
        store
            .upsert_checkin(id, Platform::Windows, "h".into(), "1".into(), "Win 11".into())
            .await;
        store.mark_online(id).await;
        assert_eq!(store.get(&id).await.unwrap().status, DeviceStatus::Online);
        store.mark_offline(id).await;
        assert_eq!(store.get(&id).await.unwrap().status, DeviceStatus::Offline);
    }
}
