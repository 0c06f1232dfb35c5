//! Background rebuild loop
//!
//! Wakes on the dispatcher's count trigger or on an interval tick and runs
//! the rebuild on the blocking pool, off the dispatch hot path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::policy::{PolicyDistiller, RebuildOutcome};
use crate::experience::ExperienceStore;
use crate::metering::CoreMetrics;

/// Smallest tick used when the configured interval is zero
const MIN_TICK: Duration = Duration::from_millis(100);

/// Start the rebuild loop; abort the returned handle to stop it
pub fn spawn_rebuild_loop(
    distiller: Arc<PolicyDistiller>,
    store: Arc<ExperienceStore>,
    trigger: Arc<Notify>,
    metrics: Option<CoreMetrics>,
) -> JoinHandle<()> {
    let period = Duration::from_secs(distiller.settings().rebuild_interval_secs).max(MIN_TICK);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(period_ms = period.as_millis() as u64, "Policy rebuild loop started");

        loop {
            tokio::select! {
                _ = trigger.notified() => debug!("Rebuild triggered by experience count"),
                _ = interval.tick() => {
                    if !distiller.is_due(Instant::now()) {
                        continue;
                    }
                    debug!("Rebuild triggered by interval");
                }
            }

            if distiller.is_rebuilding() {
                continue;
            }

            let (d, s) = (Arc::clone(&distiller), Arc::clone(&store));
            match tokio::task::spawn_blocking(move || d.rebuild(&s)).await {
                Ok(outcome) => {
                    if let Some(metrics) = &metrics {
                        metrics.observe_rebuild(&outcome);
                        metrics.experiences.set(store.size() as i64);
                    }
                    if let RebuildOutcome::Skipped(reason) = outcome {
                        debug!(?reason, "Rebuild skipped");
                    }
                }
                Err(e) => error!(error = %e, "Rebuild task failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DistillerSettings;
    use paumiot_common::{Arm, DeviceType, Experience, TransactionContext};

    #[tokio::test]
    async fn test_notify_triggers_rebuild() {
        let distiller = Arc::new(PolicyDistiller::new(DistillerSettings {
            rebuild_interval_secs: 3_600,
            min_samples_rebuild: 10,
            ..DistillerSettings::default()
        }));
        let store = Arc::new(ExperienceStore::new(100, 0.25));
        for _ in 0..20 {
            store.record(Experience::new(
                TransactionContext::new("d", DeviceType::Sensor, 64),
                Arm::Coap,
                0.7,
            ));
        }

        let trigger = Arc::new(Notify::new());
        let handle = spawn_rebuild_loop(distiller.clone(), store, trigger.clone(), None);

        // The first interval tick fires immediately but nothing is pending yet.
        trigger.notify_one();
        for _ in 0..100 {
            if distiller.version() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        assert_eq!(distiller.version(), 1);
        let tree = distiller.current().unwrap();
        assert_eq!(
            tree.recommend(&TransactionContext::new("x", DeviceType::Sensor, 64)).arm,
            Arm::Coap
        );
    }
}
