//! Change feed → anomaly detector → hub.
//!
//! One [`RealtimeBridge`] is opened at startup and closed on shutdown. Its
//! state is published through a `watch` channel so `/health` can report it.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::feed::{ChangeFeed, ChangePayload, FeedError, FeedSource};
use super::hub::{Envelope, Hub};
use crate::anomaly::{detect, AnomalyThresholds};

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    Uninitialized,
    Subscribing,
    Active,
    Reconnecting,
    Disabled,
    Closed,
}

/// Backoff applied after an established feed loses its connection.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    // ---
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failures tolerated before the bridge gives up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    // ---
    /// Delay before reconnect `attempt` (1-based): doubles each time, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

pub struct RealtimeBridge {
    state: Arc<watch::Sender<BridgeState>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RealtimeBridge {
    // ---
    /// Subscribe to `source` and start relaying into `hub`.
    ///
    /// Without a source, or when the first subscription fails, the bridge is
    /// returned `Disabled` and the process carries on without live events.
    pub async fn open(
        source: Option<FeedSource>,
        hub: Hub,
        thresholds: AnomalyThresholds,
        policy: ReconnectPolicy,
    ) -> Self {
        // ---
        let (tx, _) = watch::channel(BridgeState::Uninitialized);
        let state = Arc::new(tx);
        let mut bridge = Self {
            state: state.clone(),
            shutdown: None,
            task: None,
        };

        let Some(source) = source else {
            warn!("Realtime feed not configured; live events disabled");
            set_state(&state, BridgeState::Disabled);
            return bridge;
        };

        set_state(&state, BridgeState::Subscribing);
        let feed = match source.subscribe().await {
            Ok(feed) => feed,
            Err(e) => {
                error!(error = %e, "Realtime subscription failed; live events disabled");
                set_state(&state, BridgeState::Disabled);
                return bridge;
            }
        };

        set_state(&state, BridgeState::Active);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        bridge.shutdown = Some(shutdown_tx);
        bridge.task = Some(tokio::spawn(run(
            feed,
            hub,
            thresholds,
            policy,
            state,
            shutdown_rx,
        )));
        bridge
    }

    pub fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    /// Stop relaying and release the subscription.
    pub async fn close(mut self) {
        // ---
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "Realtime bridge task failed");
            }
        }
        set_state(&self.state, BridgeState::Closed);
    }
}

fn set_state(state: &watch::Sender<BridgeState>, next: BridgeState) {
    // ---
    let prev = state.send_replace(next);
    if prev != next {
        match next {
            BridgeState::Reconnecting | BridgeState::Disabled => {
                warn!(from = ?prev, to = ?next, "Realtime bridge state changed")
            }
            _ => info!(from = ?prev, to = ?next, "Realtime bridge state changed"),
        }
    }
}

/// Decode one notification and relay it; returns the anomalies found.
///
/// Nothing is published when the payload is malformed or out of range.
pub fn dispatch(
    hub: &Hub,
    thresholds: &AnomalyThresholds,
    payload: &str,
) -> Result<Vec<String>, FeedError> {
    // ---
    let reading = ChangePayload::decode(payload)?.into_reading()?;
    let anomalies = detect(&reading.measurements(), thresholds);

    let delivered = hub.publish(Envelope::new_reading(reading.clone()));
    debug!(reading_id = reading.id, delivered, "Relayed sensor reading");

    if !anomalies.is_empty() {
        warn!(
            reading_id = reading.id,
            machine_id = %reading.machine_id,
            anomalies = ?anomalies,
            "Anomaly detected"
        );
        hub.publish(Envelope::anomaly(reading, anomalies.clone()));
    }
    Ok(anomalies)
}

async fn run(
    mut feed: Box<dyn ChangeFeed>,
    hub: Hub,
    thresholds: AnomalyThresholds,
    policy: ReconnectPolicy,
    state: Arc<watch::Sender<BridgeState>>,
    mut shutdown: oneshot::Receiver<()>,
) {
    // ---
    let mut failures: u32 = 0;

    loop {
        let received = tokio::select! {
            _ = &mut shutdown => break,
            received = feed.recv() => received,
        };

        let lost = match received {
            Ok(Some(payload)) => {
                failures = 0;
                set_state(&state, BridgeState::Active);
                if let Err(e) = dispatch(&hub, &thresholds, &payload) {
                    warn!(error = %e, "Dropped change notification");
                }
                false
            }
            Ok(None) => {
                warn!("Realtime connection lost");
                true
            }
            Err(FeedError::Connection(e)) => {
                warn!(error = %e, "Realtime connection error");
                true
            }
            Err(e) => {
                error!(error = %e, "Realtime feed ended");
                set_state(&state, BridgeState::Disabled);
                return;
            }
        };
        if !lost {
            continue;
        }

        failures += 1;
        if failures > policy.max_attempts {
            error!(attempts = policy.max_attempts, "Realtime reconnect budget exhausted");
            set_state(&state, BridgeState::Disabled);
            return;
        }
        set_state(&state, BridgeState::Reconnecting);
        let delay = policy.delay(failures);
        debug!(attempt = failures, ?delay, "Waiting before reconnect");
        tokio::select! {
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    debug!("Realtime bridge stopped");
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::anomaly::DEFAULT_THRESHOLDS;
    use crate::realtime::hub::EventData;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Replays a fixed script, then either stays silent or keeps dropping.
    struct ScriptedFeed {
        script: VecDeque<Option<String>>,
        drop_forever: bool,
    }

    #[async_trait]
    impl ChangeFeed for ScriptedFeed {
        async fn recv(&mut self) -> Result<Option<String>, FeedError> {
            match self.script.pop_front() {
                Some(item) => Ok(item),
                None if self.drop_forever => Ok(None),
                None => std::future::pending().await,
            }
        }
    }

    fn scripted(script: Vec<Option<String>>, drop_forever: bool) -> FeedSource {
        FeedSource::Subscribed(Box::new(ScriptedFeed {
            script: script.into(),
            drop_forever,
        }))
    }

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            max_attempts: 3,
        }
    }

    fn payload(id: i64, air_temp: f64) -> String {
        serde_json::json!({
            "operation": "INSERT",
            "table": "sensor_readings",
            "record": {
                "id": id,
                "machine_id": "0315a637-b0f9-4498-9303-4844504a12f1",
                "recorded_at": "2025-03-26T18:45:00Z",
                "air_temp": air_temp,
                "process_temp": 300.0,
                "rotational_speed": 1000,
                "torque": 40.0,
                "tool_wear": 50
            }
        })
        .to_string()
    }

    #[test]
    fn test_policy_doubles_and_caps() {
        // ---
        let p = ReconnectPolicy::default();
        assert_eq!(p.delay(1), Duration::from_millis(500));
        assert_eq!(p.delay(2), Duration::from_secs(1));
        assert_eq!(p.delay(4), Duration::from_secs(4));
        assert_eq!(p.delay(7), Duration::from_secs(30));
        assert_eq!(p.delay(40), Duration::from_secs(30));
    }

    #[test]
    fn test_dispatch_normal_reading() {
        // ---
        let hub = Hub::new(8);
        let mut rx = hub.subscribe();

        let anomalies = dispatch(&hub, &DEFAULT_THRESHOLDS, &payload(1, 300.0)).unwrap();
        assert!(anomalies.is_empty());
        assert_eq!(rx.try_recv().unwrap().event, "new-reading");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_anomalous_reading_publishes_both_events() {
        // ---
        let hub = Hub::new(8);
        let mut rx = hub.subscribe();

        let anomalies = dispatch(&hub, &DEFAULT_THRESHOLDS, &payload(2, 330.0)).unwrap();
        assert_eq!(anomalies, vec!["Air temperature too high: 330K (max: 310K)"]);

        assert_eq!(rx.try_recv().unwrap().event, "new-reading");
        match rx.try_recv().unwrap().data {
            EventData::Anomaly(report) => {
                assert_eq!(report.reading.id, 2);
                assert_eq!(report.anomalies, anomalies);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_dispatch_drops_invalid_payloads() {
        // ---
        let hub = Hub::new(8);
        let mut rx = hub.subscribe();

        assert!(dispatch(&hub, &DEFAULT_THRESHOLDS, "not json").is_err());
        assert!(dispatch(&hub, &DEFAULT_THRESHOLDS, &payload(3, 900.0)).is_err());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_open_without_source_is_disabled() {
        // ---
        let bridge =
            RealtimeBridge::open(None, Hub::new(8), DEFAULT_THRESHOLDS, fast_policy()).await;
        assert_eq!(bridge.state(), BridgeState::Disabled);
        bridge.close().await;
    }

    #[tokio::test]
    async fn test_failed_subscription_is_disabled() {
        // ---
        let source = FeedSource::Postgres {
            url: "not-a-database-url".to_string(),
            channel: "sensor_readings_changes".to_string(),
        };
        let bridge =
            RealtimeBridge::open(Some(source), Hub::new(8), DEFAULT_THRESHOLDS, fast_policy())
                .await;
        assert_eq!(bridge.state(), BridgeState::Disabled);
    }

    #[tokio::test]
    async fn test_relays_and_recovers_from_dropped_connection() {
        // ---
        let hub = Hub::new(8);
        let mut rx = hub.subscribe();
        let source = scripted(vec![Some(payload(1, 300.0)), None, Some(payload(2, 330.0))], false);

        let bridge = RealtimeBridge::open(Some(source), hub, DEFAULT_THRESHOLDS, fast_policy()).await;
        assert_eq!(bridge.state(), BridgeState::Active);

        let events: Vec<&str> = [
            rx.recv().await.unwrap().event,
            rx.recv().await.unwrap().event,
            rx.recv().await.unwrap().event,
        ]
        .into();
        assert_eq!(events, vec!["new-reading", "new-reading", "anomaly-detected"]);
        assert_eq!(bridge.state(), BridgeState::Active);

        let mut state = bridge.watch();
        bridge.close().await;
        assert_eq!(*state.borrow_and_update(), BridgeState::Closed);
    }

    #[tokio::test]
    async fn test_reconnect_budget_exhaustion_disables() {
        // ---
        let source = scripted(vec![], true);
        let bridge =
            RealtimeBridge::open(Some(source), Hub::new(8), DEFAULT_THRESHOLDS, fast_policy())
                .await;

        let mut state = bridge.watch();
        let reached = matches!(
            tokio::time::timeout(
                Duration::from_secs(5),
                state.wait_for(|s| *s == BridgeState::Disabled),
            )
            .await,
            Ok(Ok(_))
        );
        assert!(reached);

        bridge.close().await;
        assert_eq!(*state.borrow(), BridgeState::Closed);
    }
}
