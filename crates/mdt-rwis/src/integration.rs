//! Config entry lifecycle: setup and unload.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::{HttpTransport, RwisClient};
use crate::camera::{setup_cameras, RwisCamera};
use crate::config::ConfigEntry;
use crate::coordinator::{UpdateCoordinator, UpdateFailed};
use crate::sensor::{setup_sensors, RwisSensor};

/// Errors from entry setup.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// The first fetch failed; the host may retry setup later.
    #[error("entry {entry_id} not ready: {source}")]
    NotReady {
        entry_id: String,
        #[source]
        source: UpdateFailed,
    },
}

/// A running entry: its coordinator, entities and polling task.
pub struct LoadedEntry {
    pub entry_id: String,
    pub title: String,
    pub coordinator: Arc<UpdateCoordinator>,
    pub sensors: Vec<RwisSensor>,
    pub cameras: Vec<RwisCamera>,
    shutdown_tx: watch::Sender<()>,
    poller: JoinHandle<()>,
}

impl std::fmt::Debug for LoadedEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedEntry")
            .field("entry_id", &self.entry_id)
            .field("title", &self.title)
            .field("sensors", &self.sensors.len())
            .field("cameras", &self.cameras.len())
            .finish_non_exhaustive()
    }
}

/// Set up one config entry.
///
/// Performs the first fetch before anything else; if it fails no entities
/// are created and no task is spawned. Must be called within a Tokio
/// runtime.
pub async fn setup_entry(
    entry: &ConfigEntry,
    transport: Arc<dyn HttpTransport>,
    base_url: &str,
) -> Result<LoadedEntry, SetupError> {
    let data = &entry.data;
    let client = RwisClient::new(transport, base_url, data.api_key.clone());
    let coordinator = Arc::new(UpdateCoordinator::new(
        client,
        data.site_id.clone(),
        data.update_interval.as_duration(),
    ));

    coordinator
        .first_refresh()
        .await
        .map_err(|source| SetupError::NotReady {
            entry_id: entry.entry_id.clone(),
            source,
        })?;

    let sensors = setup_sensors(&coordinator);
    let cameras = setup_cameras(&coordinator);
    log::info!(
        "[Integration] {} set up with {} sensors and {} cameras",
        entry.title,
        sensors.len(),
        cameras.len()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let poller = tokio::spawn(coordinator.clone().run(shutdown_rx));

    Ok(LoadedEntry {
        entry_id: entry.entry_id.clone(),
        title: entry.title.clone(),
        coordinator,
        sensors,
        cameras,
        shutdown_tx,
        poller,
    })
}

impl LoadedEntry {
    /// Stop polling and release the entities.
    ///
    /// Returns `true` when the polling task exited cleanly.
    pub async fn unload(self) -> bool {
        let _ = self.shutdown_tx.send(());
        let clean = match self.poller.await {
            Ok(()) => true,
            Err(e) => {
                log::error!("[Integration] polling task for {} failed: {}", self.title, e);
                false
            }
        };
        log::info!("[Integration] {} unloaded", self.title);
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::*;
    use crate::config::{EntryData, UpdateInterval};
    use crate::entity::SensorEntity;
    use crate::model::fixtures;
    use crate::sensor::SensorValue;
    use std::time::Duration;

    fn entry(minutes: i64) -> ConfigEntry {
        ConfigEntry::new(
            "Montana DOT RWIS - Bozeman Pass",
            Some("mdt_rwis_123".into()),
            EntryData {
                api_key: "key".into(),
                site_id: "123".into(),
                update_interval: UpdateInterval::new(minutes).unwrap(),
            },
        )
    }

    #[tokio::test]
    async fn setup_creates_entities() {
        let mock = MockTransport::new();
        mock.json(
            SITE_PATH,
            200,
            &fixtures::weather(vec![fixtures::station("S1", "Bozeman Pass", 72.5)]),
        );
        mock.json(
            IMAGES_PATH,
            200,
            &fixtures::cameras(9, vec![fixtures::camera("1", "https://img.test/1.jpg")]),
        );

        let loaded = setup_entry(&entry(15), mock.clone(), BASE).await.unwrap();
        assert_eq!(loaded.sensors.len(), 6);
        assert_eq!(loaded.cameras.len(), 1);
        assert_eq!(
            loaded.sensors[0].native_value(),
            Some(SensorValue::Number(72.5))
        );
        assert_eq!(
            loaded.coordinator.update_interval(),
            Duration::from_secs(15 * 60)
        );
        assert!(loaded.unload().await);
    }

    #[tokio::test]
    async fn first_fetch_failure_aborts_setup() {
        let mock = MockTransport::new();
        mock.raw(SITE_PATH, 503, b"down");

        let err = setup_entry(&entry(15), mock.clone(), BASE).await.unwrap_err();
        match err {
            SetupError::NotReady { source, .. } => assert!(source.0.contains("503")),
        }
        assert_eq!(mock.call_count(SITE_PATH), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn loaded_entry_keeps_polling_until_unload() {
        let mock = MockTransport::new();
        mock.json(
            SITE_PATH,
            200,
            &fixtures::weather(vec![fixtures::station("S1", "X", 1.0)]),
        );
        mock.json(IMAGES_PATH, 200, &fixtures::cameras(9, vec![]));

        let loaded = setup_entry(&entry(1), mock.clone(), BASE).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2 * 60 + 1)).await;
        assert_eq!(mock.call_count(SITE_PATH), 3);

        assert!(loaded.unload().await);
        tokio::time::sleep(Duration::from_secs(5 * 60)).await;
        assert_eq!(mock.call_count(SITE_PATH), 3);
    }
}
