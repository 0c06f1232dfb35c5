//! Context features the distilled tree splits on

use paumiot_common::TransactionContext;
use serde::{Deserialize, Serialize};

/// Value used for the battery feature when the level is unknown
pub const UNKNOWN_BATTERY: f64 = -1.0;

/// Numeric view of one [`TransactionContext`] field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    DeviceType,
    PayloadSize,
    Battery,
    LossRate,
    TimeOfDay,
}

impl Feature {
    pub const COUNT: usize = 5;

    pub const ALL: [Feature; Feature::COUNT] = [
        Feature::DeviceType,
        Feature::PayloadSize,
        Feature::Battery,
        Feature::LossRate,
        Feature::TimeOfDay,
    ];

    pub const fn index(self) -> usize {
        match self {
            Feature::DeviceType => 0,
            Feature::PayloadSize => 1,
            Feature::Battery => 2,
            Feature::LossRate => 3,
            Feature::TimeOfDay => 4,
        }
    }

    pub fn value(self, ctx: &TransactionContext) -> f64 {
        match self {
            Feature::DeviceType => f64::from(ctx.device_type.code()),
            Feature::PayloadSize => ctx.payload_size_bytes as f64,
            Feature::Battery => ctx
                .battery_percent
                .map(f64::from)
                .unwrap_or(UNKNOWN_BATTERY),
            Feature::LossRate => ctx.recent_loss_rate,
            Feature::TimeOfDay => f64::from(ctx.time_of_day_bucket),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Feature::DeviceType => "device_type",
            Feature::PayloadSize => "payload_size",
            Feature::Battery => "battery",
            Feature::LossRate => "loss_rate",
            Feature::TimeOfDay => "time_of_day",
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// All feature values of a context, indexed by [`Feature::index`]
pub fn feature_vector(ctx: &TransactionContext) -> [f64; Feature::COUNT] {
    let mut values = [0.0; Feature::COUNT];
    for feature in Feature::ALL {
        values[feature.index()] = feature.value(ctx);
    }
    values
}

/// Coarse discretization of a context used to group experiences when
/// deciding which arm performed best "for this context"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextCell {
    device_type: u8,
    /// floor(log2(payload + 1))
    payload_bucket: u8,
    /// Decile, or -1 when unknown
    battery_bucket: i8,
    /// 5% steps
    loss_bucket: u8,
    time_bucket: u8,
}

impl ContextCell {
    pub fn of(ctx: &TransactionContext) -> Self {
        let payload_bucket = (64 - (ctx.payload_size_bytes.saturating_add(1)).leading_zeros() - 1) as u8;
        Self {
            device_type: ctx.device_type.code(),
            payload_bucket,
            battery_bucket: ctx
                .battery_percent
                .map(|b| (b.min(100) / 10) as i8)
                .unwrap_or(-1),
            loss_bucket: (ctx.recent_loss_rate.clamp(0.0, 1.0) * 20.0).floor() as u8,
            time_bucket: ctx.time_of_day_bucket,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paumiot_common::DeviceType;

    #[test]
    fn test_feature_values() {
        let ctx = TransactionContext::new("d", DeviceType::Gateway, 512)
            .with_battery(35)
            .with_loss_rate(0.25)
            .with_time_bucket(2);
        let v = feature_vector(&ctx);
        assert_eq!(v[Feature::DeviceType.index()], 2.0);
        assert_eq!(v[Feature::PayloadSize.index()], 512.0);
        assert_eq!(v[Feature::Battery.index()], 35.0);
        assert_eq!(v[Feature::LossRate.index()], 0.25);
        assert_eq!(v[Feature::TimeOfDay.index()], 2.0);
    }

    #[test]
    fn test_unknown_battery_sorts_below_empty() {
        let ctx = TransactionContext::new("d", DeviceType::Sensor, 10);
        assert!(Feature::Battery.value(&ctx) < 0.0);
    }

    #[test]
    fn test_context_cell_buckets() {
        let small = TransactionContext::new("a", DeviceType::Sensor, 60);
        let similar = TransactionContext::new("b", DeviceType::Sensor, 40);
        let large = TransactionContext::new("c", DeviceType::Sensor, 4096);
        assert_eq!(ContextCell::of(&small), ContextCell::of(&similar));
        assert_ne!(ContextCell::of(&small), ContextCell::of(&large));

        let zero = TransactionContext::new("z", DeviceType::Sensor, 0);
        assert_eq!(ContextCell::of(&zero).payload_bucket, 0);
    }
}
