//! Polling coordinator with a last-known-good cache.
//!
//! One coordinator per configured site. It fetches on a fixed period,
//! swaps the cached [`FetchResult`] atomically on success, and records the
//! failure (keeping the previous cache) otherwise. Entities hold an `Arc`
//! to the coordinator and read the cache whenever they are queried.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

use crate::api::RwisClient;
use crate::model::FetchResult;

/// A poll did not produce a new cache.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Error fetching data: {0}")]
pub struct UpdateFailed(pub String);

/// Snapshot published to listeners after every poll.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorState {
    /// Last successful payload, if any poll has succeeded yet.
    pub data: Option<Arc<FetchResult>>,
    pub last_update_success: bool,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
}

pub struct UpdateCoordinator {
    name: String,
    client: RwisClient,
    site_id: String,
    update_interval: Duration,
    state: watch::Sender<CoordinatorState>,
    // Held for the duration of a fetch; at most one fetch in flight.
    refresh_gate: Mutex<()>,
    // Bumped when a fetch runs to completion, success or failure.
    completed_fetches: AtomicU64,
}

impl std::fmt::Debug for UpdateCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateCoordinator")
            .field("name", &self.name)
            .field("site_id", &self.site_id)
            .field("update_interval", &self.update_interval)
            .finish_non_exhaustive()
    }
}

impl UpdateCoordinator {
    pub fn new(client: RwisClient, site_id: impl Into<String>, update_interval: Duration) -> Self {
        let site_id = site_id.into();
        Self {
            name: format!("{}_{}", crate::DOMAIN, site_id),
            client,
            site_id,
            update_interval,
            state: watch::Sender::new(CoordinatorState::default()),
            refresh_gate: Mutex::new(()),
            completed_fetches: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    pub fn client(&self) -> &RwisClient {
        &self.client
    }

    /// Current cache. Cheap: clones an `Arc`.
    pub fn data(&self) -> Option<Arc<FetchResult>> {
        self.state.borrow().data.clone()
    }

    pub fn state(&self) -> CoordinatorState {
        self.state.borrow().clone()
    }

    pub fn last_update_success(&self) -> bool {
        self.state.borrow().last_update_success
    }

    /// Receive a notification after every poll, successful or not.
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState> {
        self.state.subscribe()
    }

    /// Initial fetch performed during entry setup.
    pub async fn first_refresh(&self) -> Result<(), UpdateFailed> {
        log::info!(
            "[Coordinator] {} initial fetch (interval {:?})",
            self.name,
            self.update_interval
        );
        self.refresh().await
    }

    /// Fetch now and update the cache.
    ///
    /// Callers arriving while a fetch is in flight wait for it and share its
    /// outcome rather than issuing a second request. If that fetch is
    /// cancelled before completing, the waiter fetches itself.
    pub async fn refresh(&self) -> Result<(), UpdateFailed> {
        let seen = self.completed_fetches.load(Ordering::Acquire);
        let _gate = match self.refresh_gate.try_lock() {
            Ok(gate) => gate,
            Err(_) => {
                log::debug!("[Coordinator] {} refresh already in flight", self.name);
                let gate = self.refresh_gate.lock().await;
                if self.completed_fetches.load(Ordering::Acquire) != seen {
                    return self.last_outcome();
                }
                log::debug!(
                    "[Coordinator] {} in-flight refresh was cancelled, fetching",
                    self.name
                );
                gate
            }
        };

        let fetched = self.client.fetch_site(&self.site_id).await;
        self.completed_fetches.fetch_add(1, Ordering::AcqRel);

        match fetched {
            Ok(result) => {
                let recovered = {
                    let state = self.state.borrow();
                    !state.last_update_success && state.last_error.is_some()
                };
                let fetched_at = result.fetched_at;
                self.state.send_modify(|state| {
                    state.data = Some(Arc::new(result));
                    state.last_update_success = true;
                    state.last_error = None;
                    state.last_success_at = Some(fetched_at);
                });
                if recovered {
                    log::info!("[Coordinator] {} fetching data recovered", self.name);
                } else {
                    log::debug!("[Coordinator] {} data updated", self.name);
                }
                Ok(())
            }
            Err(e) => {
                log::error!("[Coordinator] {} error fetching data: {}", self.name, e);
                let failure = UpdateFailed(e.to_string());
                self.state.send_modify(|state| {
                    state.last_update_success = false;
                    state.last_error = Some(failure.0.clone());
                });
                Err(failure)
            }
        }
    }

    fn last_outcome(&self) -> Result<(), UpdateFailed> {
        let state = self.state.borrow();
        if state.last_update_success {
            Ok(())
        } else {
            Err(UpdateFailed(
                state
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "no data fetched yet".to_string()),
            ))
        }
    }

    /// Poll on the configured period until the shutdown signal fires.
    ///
    /// Failures are recorded and the timer keeps running.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<()>) {
        log::info!(
            "[Coordinator] {} polling every {:?}",
            self.name,
            self.update_interval
        );

        let mut interval = tokio::time::interval(self.update_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately; the initial fetch already happened at setup.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // Failure is already logged and recorded in state.
                    let _ = self.refresh().await;
                }
                _ = shutdown.changed() => {
                    log::info!("[Coordinator] {} shutdown signal received, exiting", self.name);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::*;
    use crate::api::HttpResponse;
    use crate::model::fixtures;
    use serde_json::json;

    fn coordinator(mock: &Arc<MockTransport>, minutes: u64) -> Arc<UpdateCoordinator> {
        let client = RwisClient::new(mock.clone(), BASE, "key");
        Arc::new(UpdateCoordinator::new(
            client,
            "123",
            Duration::from_secs(minutes * 60),
        ))
    }

    fn serve_ok(mock: &MockTransport, temp: f64) {
        mock.json(
            SITE_PATH,
            200,
            &fixtures::weather(vec![fixtures::station("S1", "Bozeman", temp)]),
        );
        mock.json(IMAGES_PATH, 200, &fixtures::cameras(9, vec![]));
    }

    fn cached_temp(c: &UpdateCoordinator) -> Option<f64> {
        c.data()?
            .first_station()?
            .reading("airTemperature")
            .value()
            .as_f64()
    }

    #[tokio::test]
    async fn first_refresh_populates_cache() {
        let mock = MockTransport::new();
        serve_ok(&mock, 72.5);
        let c = coordinator(&mock, 15);

        assert!(c.data().is_none());
        c.first_refresh().await.unwrap();

        assert!(c.last_update_success());
        assert_eq!(cached_temp(&c), Some(72.5));
        assert!(c.state().last_success_at.is_some());
        assert_eq!(c.name(), "mdt_rwis_123");
    }

    #[tokio::test]
    async fn failure_keeps_previous_cache() {
        let mock = MockTransport::new();
        serve_ok(&mock, 50.0);
        let c = coordinator(&mock, 15);
        c.refresh().await.unwrap();

        mock.raw(SITE_PATH, 500, b"boom");
        let err = c.refresh().await.unwrap_err();
        assert!(err.0.contains("500"));

        let state = c.state();
        assert!(!state.last_update_success);
        assert!(state.last_error.is_some());
        assert_eq!(cached_temp(&c), Some(50.0));

        serve_ok(&mock, 51.0);
        c.refresh().await.unwrap();
        assert!(c.last_update_success());
        assert!(c.state().last_error.is_none());
        assert_eq!(cached_temp(&c), Some(51.0));
    }

    #[tokio::test]
    async fn readers_keep_old_snapshot_after_swap() {
        let mock = MockTransport::new();
        serve_ok(&mock, 10.0);
        let c = coordinator(&mock, 15);
        c.refresh().await.unwrap();
        let old = c.data().unwrap();

        serve_ok(&mock, 20.0);
        c.refresh().await.unwrap();

        assert_eq!(
            old.first_station().unwrap().reading("airTemperature").value().as_f64(),
            Some(10.0)
        );
        assert_eq!(cached_temp(&c), Some(20.0));
    }

    #[tokio::test]
    async fn first_refresh_failure_is_reported() {
        let mock = MockTransport::new();
        mock.reply(SITE_PATH, Reply::Fail("dns".into()));
        let c = coordinator(&mock, 15);
        assert!(c.first_refresh().await.is_err());
        assert!(c.data().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_refreshes_share_one_fetch() {
        let mock = MockTransport::new();
        mock.reply(
            SITE_PATH,
            Reply::Delayed(
                Duration::from_millis(200),
                HttpResponse::new(200, json!({"features": []}).to_string()),
            ),
        );
        mock.json(IMAGES_PATH, 200, &json!({"features": []}));
        let c = coordinator(&mock, 15);

        let (a, b) = tokio::join!(c.refresh(), c.refresh());
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(mock.call_count(SITE_PATH), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_fetches_when_in_flight_refresh_is_cancelled() {
        let mock = MockTransport::new();
        mock.reply(
            SITE_PATH,
            Reply::Delayed(
                Duration::from_millis(200),
                HttpResponse::new(
                    200,
                    fixtures::weather(vec![fixtures::station("S1", "X", 40.0)]).to_string(),
                ),
            ),
        );
        mock.json(IMAGES_PATH, 200, &fixtures::cameras(9, vec![]));
        let c = coordinator(&mock, 15);

        let (cancelled, waited) = tokio::join!(
            tokio::time::timeout(Duration::from_millis(50), c.refresh()),
            c.refresh()
        );
        assert!(cancelled.is_err());
        assert!(waited.is_ok());
        assert_eq!(mock.call_count(SITE_PATH), 2);
        assert_eq!(cached_temp(&c), Some(40.0));
    }

    #[tokio::test]
    async fn listeners_are_notified_on_failure() {
        let mock = MockTransport::new();
        let c = coordinator(&mock, 15);
        let mut rx = c.subscribe();

        let _ = c.refresh().await;
        assert!(rx.has_changed().unwrap());
        let state = rx.borrow_and_update().clone();
        assert!(!state.last_update_success);
        assert!(state.data.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn run_polls_on_interval_and_survives_failures() {
        let mock = MockTransport::new();
        mock.raw(SITE_PATH, 502, b"bad gateway");
        let c = coordinator(&mock, 1);

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let handle = tokio::spawn(c.clone().run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(3 * 60 + 1)).await;
        assert_eq!(mock.call_count(SITE_PATH), 3);
        assert!(!c.last_update_success());

        serve_ok(&mock, 33.0);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(c.last_update_success());
        assert_eq!(cached_temp(&c), Some(33.0));

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
