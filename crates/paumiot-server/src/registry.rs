//! In-memory device registry and sensor history

use std::collections::VecDeque;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use paumiot_adaptive::DeviceRegistry;
use paumiot_common::{Arm, Device, DeviceProfile, DeviceType, SensorDataPayload, SensorReading};
use tracing::info;

/// Devices announced through sensor ingestion
///
/// Uses DashMap for concurrent access; readings are a bounded history.
pub struct InMemoryDeviceRegistry {
    devices: DashMap<String, Device>,
    readings: RwLock<VecDeque<SensorReading>>,
    history: usize,
}

impl InMemoryDeviceRegistry {
    pub fn new(history: usize) -> Self {
        Self {
            devices: DashMap::new(),
            readings: RwLock::new(VecDeque::with_capacity(history.min(4_096))),
            history: history.max(1),
        }
    }

    /// Register a device on first sight and refresh its battery and liveness
    pub fn observe(&self, payload: &SensorDataPayload) {
        let now = Utc::now().timestamp();
        let mut entry = self.devices.entry(payload.device_id.clone()).or_insert_with(|| {
            let device_type = payload
                .device_type
                .as_deref()
                .or(payload.sensor_type.as_deref())
                .map(DeviceType::from_label)
                .unwrap_or(if payload.temperature.is_some() || payload.humidity.is_some() {
                    DeviceType::Sensor
                } else {
                    DeviceType::Unknown
                });
            info!(device_id = %payload.device_id, %device_type, "Registered new device");
            Device {
                id: payload.device_id.clone(),
                name: payload.device_id.clone(),
                device_type,
                protocol: String::new(),
                location: "unknown".to_string(),
                online: true,
                battery: -1,
                rssi: 0,
                last_seen: now,
            }
        });
        if let Some(battery) = payload.battery {
            entry.battery = i32::from(battery.min(100));
        }
        entry.last_seen = now;
    }

    /// Store the payload's samples tagged with the protocol that carried them
    pub fn record_delivery(&self, payload: &SensorDataPayload, arm: Arm, delivered: bool) {
        if let Some(mut device) = self.devices.get_mut(&payload.device_id) {
            device.protocol = arm.as_str().to_string();
            device.online = delivered;
        }

        let timestamp = Utc::now().timestamp();
        let mut readings = self.readings.write();
        for (sensor_type, value, unit) in payload.samples() {
            if readings.len() == self.history {
                readings.pop_front();
            }
            readings.push_back(SensorReading {
                device_id: payload.device_id.clone(),
                sensor_type,
                value,
                unit,
                protocol: arm.as_str().to_string(),
                timestamp,
            });
        }
    }

    /// All devices, sorted by id
    pub fn devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.iter().map(|e| e.value().clone()).collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    /// Most recent readings, newest first
    pub fn recent_readings(&self, limit: usize) -> Vec<SensorReading> {
        self.readings.read().iter().rev().take(limit).cloned().collect()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Distinct (device, sensor type) pairs in the history
    pub fn sensor_count(&self) -> usize {
        let readings = self.readings.read();
        let mut pairs: Vec<(&str, &str)> = readings
            .iter()
            .map(|r| (r.device_id.as_str(), r.sensor_type.as_str()))
            .collect();
        pairs.sort_unstable();
        pairs.dedup();
        pairs.len()
    }
}

impl DeviceRegistry for InMemoryDeviceRegistry {
    fn lookup(&self, device_id: &str) -> Option<DeviceProfile> {
        self.devices.get(device_id).map(|d| d.profile())
    }
}
