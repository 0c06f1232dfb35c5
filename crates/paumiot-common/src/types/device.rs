//! Device and sensor types
//!
//! Covers both the registry view the core needs for context construction
//! ([`DeviceProfile`]) and the REST shapes served to the dashboard.

use serde::{Deserialize, Serialize};

use crate::error::{PaumiotError, Result};

/// Device classification used as a routing feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Periodic telemetry source (temperature, humidity, ...)
    Sensor,
    /// Command sink
    Actuator,
    /// Aggregating edge node
    Gateway,
    /// Battery-bound body-worn device
    Wearable,
    /// Bulk media producer
    Camera,
    /// Registry has no classification
    #[default]
    #[serde(other)]
    Unknown,
}

impl DeviceType {
    /// All device types in feature-code order
    pub const ALL: [DeviceType; 6] = [
        DeviceType::Sensor,
        DeviceType::Actuator,
        DeviceType::Gateway,
        DeviceType::Wearable,
        DeviceType::Camera,
        DeviceType::Unknown,
    ];

    /// Ordinal code used as a numeric tree feature
    pub const fn code(self) -> u8 {
        match self {
            DeviceType::Sensor => 0,
            DeviceType::Actuator => 1,
            DeviceType::Gateway => 2,
            DeviceType::Wearable => 3,
            DeviceType::Camera => 4,
            DeviceType::Unknown => 5,
        }
    }

    /// Map a free-form registry or sensor label onto a device type
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "sensor" | "temperature" | "humidity" | "pressure" | "light" | "motion" => {
                DeviceType::Sensor
            }
            "actuator" | "relay" | "switch" | "valve" => DeviceType::Actuator,
            "gateway" | "edge" => DeviceType::Gateway,
            "wearable" | "tracker" | "heart_rate" => DeviceType::Wearable,
            "camera" | "video" | "image" => DeviceType::Camera,
            _ => DeviceType::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Sensor => "sensor",
            DeviceType::Actuator => "actuator",
            DeviceType::Gateway => "gateway",
            DeviceType::Wearable => "wearable",
            DeviceType::Camera => "camera",
            DeviceType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the core needs from the device registry to build a context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub device_id: String,
    pub device_type: DeviceType,
    /// 0-100, `None` when mains powered or unreported
    pub battery_percent: Option<u8>,
}

impl DeviceProfile {
    pub fn new(device_id: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            device_id: device_id.into(),
            device_type,
            battery_percent: None,
        }
    }

    pub fn with_battery(mut self, battery_percent: u8) -> Self {
        self.battery_percent = Some(battery_percent.min(100));
        self
    }
}

/// Registered device as served by `GET /api/v1/devices`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    /// Protocol of the most recent dispatch
    pub protocol: String,
    pub location: String,
    pub online: bool,
    /// Battery percent, -1 when unknown
    pub battery: i32,
    pub rssi: i32,
    /// Unix seconds
    pub last_seen: i64,
}

impl Device {
    /// Project the registry record onto the context-construction profile
    pub fn profile(&self) -> DeviceProfile {
        DeviceProfile {
            device_id: self.id.clone(),
            device_type: self.device_type,
            battery_percent: u8::try_from(self.battery).ok().map(|b| b.min(100)),
        }
    }
}

/// One sensor sample as served by `GET /api/v1/sensors`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub device_id: String,
    pub sensor_type: String,
    pub value: f64,
    pub unit: String,
    pub protocol: String,
    /// Unix seconds
    pub timestamp: i64,
}

/// Body of `POST /api/sensor/data`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorDataPayload {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Optional registry hints, applied when the device is first seen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<u8>,
}

impl SensorDataPayload {
    /// Validate the payload at the HTTP boundary
    pub fn validate(&self) -> Result<()> {
        if self.device_id.trim().is_empty() {
            return Err(PaumiotError::Validation("device_id is required".into()));
        }
        if self.temperature.is_none() && self.humidity.is_none() && self.value.is_none() {
            return Err(PaumiotError::Validation(
                "at least one of temperature, humidity or value is required".into(),
            ));
        }
        let finite = [self.temperature, self.humidity, self.value]
            .into_iter()
            .flatten()
            .all(f64::is_finite);
        if !finite {
            return Err(PaumiotError::Validation("sensor values must be finite".into()));
        }
        if matches!(self.battery, Some(b) if b > 100) {
            return Err(PaumiotError::Validation("battery must be within 0-100".into()));
        }
        Ok(())
    }

    /// Flatten the payload into `(sensor_type, value, unit)` samples
    pub fn samples(&self) -> Vec<(String, f64, String)> {
        let mut samples = Vec::with_capacity(3);
        if let Some(t) = self.temperature {
            samples.push(("temperature".to_string(), t, "°C".to_string()));
        }
        if let Some(h) = self.humidity {
            samples.push(("humidity".to_string(), h, "%".to_string()));
        }
        if let Some(v) = self.value {
            samples.push((
                self.sensor_type.clone().unwrap_or_else(|| "value".to_string()),
                v,
                self.unit.clone().unwrap_or_default(),
            ));
        }
        samples
    }

    /// Approximate encoded size used as the transaction payload size
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map(|b| b.len()).unwrap_or(0)
    }
}
