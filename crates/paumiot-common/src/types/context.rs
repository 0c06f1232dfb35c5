//! TransactionContext - immutable snapshot taken at dispatch time

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::device::{DeviceProfile, DeviceType};

/// Width of a time-of-day bucket in hours
pub const TIME_BUCKET_HOURS: u32 = 4;

/// Number of time-of-day buckets per day
pub const TIME_BUCKETS: u8 = (24 / TIME_BUCKET_HOURS) as u8;

/// Per-transaction routing context
///
/// Built once by the dispatcher and shared read-only with the bandit and
/// the distilled tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionContext {
    pub device_id: String,
    pub device_type: DeviceType,
    pub payload_size_bytes: u64,
    /// 0-100, `None` when unknown
    pub battery_percent: Option<u8>,
    /// Exponentially decayed delivery-failure rate (0.0-1.0)
    pub recent_loss_rate: f64,
    /// 0..TIME_BUCKETS
    pub time_of_day_bucket: u8,
}

impl TransactionContext {
    /// Create a context with no battery information, zero loss, bucket 0
    pub fn new(device_id: impl Into<String>, device_type: DeviceType, payload_size_bytes: u64) -> Self {
        Self {
            device_id: device_id.into(),
            device_type,
            payload_size_bytes,
            battery_percent: None,
            recent_loss_rate: 0.0,
            time_of_day_bucket: 0,
        }
    }

    /// Build a context from a registry profile at the given instant
    pub fn from_profile(
        profile: &DeviceProfile,
        payload_size_bytes: u64,
        recent_loss_rate: f64,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id: profile.device_id.clone(),
            device_type: profile.device_type,
            payload_size_bytes,
            battery_percent: profile.battery_percent.map(|b| b.min(100)),
            recent_loss_rate: sanitize_rate(recent_loss_rate),
            time_of_day_bucket: time_bucket(at),
        }
    }

    pub fn with_battery(mut self, battery_percent: u8) -> Self {
        self.battery_percent = Some(battery_percent.min(100));
        self
    }

    pub fn with_loss_rate(mut self, recent_loss_rate: f64) -> Self {
        self.recent_loss_rate = sanitize_rate(recent_loss_rate);
        self
    }

    pub fn with_time_bucket(mut self, bucket: u8) -> Self {
        self.time_of_day_bucket = bucket % TIME_BUCKETS;
        self
    }
}

/// Time-of-day bucket (UTC) for an instant
pub fn time_bucket(at: DateTime<Utc>) -> u8 {
    (at.hour() / TIME_BUCKET_HOURS) as u8
}

fn sanitize_rate(rate: f64) -> f64 {
    if rate.is_finite() {
        rate.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_time_bucket() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 13, 30, 0).unwrap();
        assert_eq!(time_bucket(at), 3);
        let midnight = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(time_bucket(midnight), 0);
    }

    #[test]
    fn test_loss_rate_is_clamped() {
        let ctx = TransactionContext::new("d", DeviceType::Sensor, 10).with_loss_rate(3.0);
        assert_eq!(ctx.recent_loss_rate, 1.0);
        let ctx = ctx.with_loss_rate(f64::NAN);
        assert_eq!(ctx.recent_loss_rate, 0.0);
    }

    #[test]
    fn test_from_profile() {
        let profile = DeviceProfile::new("dev-7", DeviceType::Wearable).with_battery(40);
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 23, 0, 0).unwrap();
        let ctx = TransactionContext::from_profile(&profile, 128, 0.1, at);
        assert_eq!(ctx.device_type, DeviceType::Wearable);
        assert_eq!(ctx.battery_percent, Some(40));
        assert_eq!(ctx.time_of_day_bucket, TIME_BUCKETS - 1);
    }
}
