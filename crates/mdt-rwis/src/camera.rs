//! Still-image cameras derived from the coordinator cache.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::api::ApiError;
use crate::coordinator::UpdateCoordinator;
use crate::entity::{CameraEntity, DeviceInfo, Entity};

/// MIME type of the images served by the RWIS cameras.
pub const CONTENT_TYPE: &str = "image/jpeg";

/// One roadside camera. Serves static JPEG snapshots only.
#[derive(Debug, Clone)]
pub struct RwisCamera {
    coordinator: Arc<UpdateCoordinator>,
    camera_id: String,
    name: String,
    unique_id: String,
    device_info: DeviceInfo,
}

impl RwisCamera {
    pub fn new(
        coordinator: Arc<UpdateCoordinator>,
        site_id: impl Into<String>,
        camera_id: impl Into<String>,
        name: impl Into<String>,
        station_name: impl Into<String>,
    ) -> Self {
        let camera_id = camera_id.into();
        Self {
            unique_id: format!("rwis_camera_{}", camera_id),
            device_info: DeviceInfo::new(site_id, station_name, "RWIS Camera"),
            name: name.into(),
            coordinator,
            camera_id,
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn content_type(&self) -> &'static str {
        CONTENT_TYPE
    }

    /// Image URL for this camera in the latest cache. URLs rotate between
    /// polls, so this is resolved on every request.
    pub fn current_image_url(&self) -> Option<String> {
        let data = self.coordinator.data()?;
        let camera = data.camera(&self.camera_id)?;
        camera.image_url().map(str::to_string)
    }
}

impl Entity for RwisCamera {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    fn available(&self) -> bool {
        self.coordinator.last_update_success() && self.current_image_url().is_some()
    }
}

#[async_trait]
impl CameraEntity for RwisCamera {
    async fn camera_image(&self) -> Option<Vec<u8>> {
        let Some(url) = self.current_image_url() else {
            log::error!("[Camera] no camera data available for {}", self.camera_id);
            return None;
        };

        match self.coordinator.client().fetch_image(&url).await {
            Ok(bytes) => {
                log::debug!(
                    "[Camera] {} fetched {} bytes",
                    self.camera_id,
                    bytes.len()
                );
                Some(bytes)
            }
            Err(ApiError::Status { status, .. }) => {
                log::error!(
                    "[Camera] failed to fetch image for {}, status code: {}",
                    self.camera_id,
                    status
                );
                None
            }
            Err(e) => {
                log::error!("[Camera] error getting image for {}: {}", self.camera_id, e);
                None
            }
        }
    }

    fn extra_state_attributes(&self) -> BTreeMap<String, Value> {
        let mut attrs = BTreeMap::new();
        let Some(data) = self.coordinator.data() else {
            return attrs;
        };
        let Some(camera) = data.camera(&self.camera_id) else {
            return attrs;
        };

        let text = |v: Option<&str>| v.map_or(Value::Null, |s| Value::String(s.to_string()));
        attrs.insert("description".to_string(), text(camera.description()));
        attrs.insert(
            "update_time".to_string(),
            text(camera.update_time().as_deref()),
        );
        attrs.insert("message".to_string(), text(camera.message()));
        attrs
    }
}

/// Create one camera per entry under the first camera feature.
pub fn setup_cameras(coordinator: &Arc<UpdateCoordinator>) -> Vec<RwisCamera> {
    let Some(data) = coordinator.data() else {
        return Vec::new();
    };

    let site_id = data
        .camera_site_id()
        .unwrap_or_else(|| coordinator.site_id().to_string());
    let station_name = data
        .first_station()
        .and_then(|s| s.name().map(str::to_string))
        .unwrap_or_else(|| format!("RWIS {}", site_id));

    data.cameras()
        .iter()
        .filter_map(|camera| {
            let Some(camera_id) = camera.id() else {
                log::warn!("[Camera] skipping camera without id at site {}", site_id);
                return None;
            };
            let name = camera
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("RWIS Camera {}", camera_id));
            Some(RwisCamera::new(
                coordinator.clone(),
                site_id.clone(),
                camera_id,
                name,
                station_name.clone(),
            ))
        })
        .collect()
}
