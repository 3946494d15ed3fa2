//! Interval schedules.
//!
//! Each schedule publishes a tick event on the bus at a fixed period until
//! it is stopped.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::core::EventBus;
use crate::domain::Event;
use crate::error::Error;

/// A recurring event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Event type to publish
    pub event: String,

    /// Period in seconds
    #[serde(default)]
    pub every_secs: Option<u64>,

    /// Period in milliseconds (takes precedence over `every_secs`)
    #[serde(default)]
    pub every_ms: Option<u64>,

    #[serde(default = "default_source")]
    pub source: String,

    /// Payload of every tick; a `tick` counter is added
    #[serde(default)]
    pub data: Map<String, Value>,
}

fn default_source() -> String {
    "schedule".to_string()
}

impl ScheduleConfig {
    pub fn every(event: impl Into<String>, period: Duration) -> Self {
        Self {
            event: event.into(),
            every_secs: None,
            every_ms: Some(period.as_millis() as u64),
            source: default_source(),
            data: Map::new(),
        }
    }

    /// The tick period; zero or missing periods are rejected
    pub fn period(&self) -> Result<Duration, Error> {
        let period = match (self.every_ms, self.every_secs) {
            (Some(ms), _) => Duration::from_millis(ms),
            (None, Some(secs)) => Duration::from_secs(secs),
            (None, None) => {
                return Err(Error::Config(format!(
                    "schedule for '{}' needs every_secs or every_ms",
                    self.event
                )))
            }
        };

        if period.is_zero() {
            return Err(Error::Config(format!(
                "schedule for '{}' has a zero period",
                self.event
            )));
        }
        Ok(period)
    }
}

/// Handle to a running schedule
pub struct ScheduleHandle {
    stop_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<u64>,
}

impl ScheduleHandle {
    /// Stop the schedule; returns the number of ticks published
    pub async fn stop(self) -> Result<u64> {
        let _ = self.stop_tx.send(()).await;
        Ok(self.task.await?)
    }
}

/// Start publishing ticks for a schedule
///
/// The first tick is published one period after starting.
pub fn start_schedule(bus: Arc<EventBus>, config: ScheduleConfig) -> Result<ScheduleHandle, Error> {
    let period = config.period()?;
    let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

    info!(event = %config.event, period_ms = period.as_millis() as u64, "Starting schedule");

    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut ticks = 0u64;
        loop {
            tokio::select! {
                _ = stop_rx.recv() => break,
                _ = interval.tick() => {
                    ticks += 1;
                    let mut data = config.data.clone();
                    data.insert("tick".to_string(), json!(ticks));

                    let event = Event::new(config.event.clone(), config.source.clone()).with_data(data);
                    let report = bus.publish(&event);
                    debug!(
                        event = %config.event,
                        tick = ticks,
                        delivered = report.delivered,
                        "Published schedule tick"
                    );
                }
            }
        }

        info!(event = %config.event, ticks, "Schedule stopped");
        ticks
    });

    Ok(ScheduleHandle { stop_tx, task })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_period() {
        let config: ScheduleConfig = serde_yaml::from_str("event: nightly_sync\nevery_secs: 60").unwrap();
        assert_eq!(config.period().unwrap(), Duration::from_secs(60));
        assert_eq!(config.source, "schedule");

        let missing: ScheduleConfig = serde_yaml::from_str("event: nightly_sync").unwrap();
        assert!(matches!(missing.period(), Err(Error::Config(_))));

        let zero = ScheduleConfig::every("x", Duration::ZERO);
        assert!(zero.period().is_err());
    }

    #[tokio::test]
    async fn test_ticks_until_stopped() {
        let bus = Arc::new(EventBus::new());
        let ticks = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&ticks);
        bus.subscribe_fn("heartbeat", move |e: &Event| {
            sink.lock().unwrap().push(e.data["tick"].clone());
            Ok(())
        });

        let handle = start_schedule(
            Arc::clone(&bus),
            ScheduleConfig::every("heartbeat", Duration::from_millis(20)),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(110)).await;
        let published = handle.stop().await.unwrap();

        let ticks = ticks.lock().unwrap();
        assert!(published >= 2);
        assert_eq!(ticks.len() as u64, published);
        assert_eq!(ticks[0], json!(1));
    }
}
