//! Cached payload and the read-only views derived from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::json::Field;

/// The coordinator's cache: both documents from one successful poll.
///
/// Replaced wholesale on every successful poll and shared as
/// `Arc<FetchResult>`; never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchResult {
    pub weather: Value,
    pub cameras: Value,
    pub fetched_at: DateTime<Utc>,
}

impl FetchResult {
    pub fn new(weather: Value, cameras: Value) -> Self {
        Self {
            weather,
            cameras,
            fetched_at: Utc::now(),
        }
    }

    /// All station features in the weather document, in API order.
    pub fn stations(&self) -> impl Iterator<Item = StationRecord<'_>> {
        Field::of(&self.weather)
            .key("features")
            .items()
            .iter()
            .map(StationRecord::new)
    }

    /// First station feature, which entity setup binds to.
    pub fn first_station(&self) -> Option<StationRecord<'_>> {
        self.stations().next()
    }

    pub fn station(&self, station_id: &str) -> Option<StationRecord<'_>> {
        self.stations()
            .find(|s| s.id().as_deref() == Some(station_id))
    }

    /// Properties of the first camera feature (the camera site).
    pub fn camera_site(&self) -> Field<'_> {
        Field::of(&self.cameras)
            .key("features")
            .index(0)
            .key("properties")
    }

    /// Identifier of the camera site, from the first camera feature.
    pub fn camera_site_id(&self) -> Option<String> {
        self.camera_site().key("id").as_id()
    }

    /// Cameras listed under the first camera feature.
    pub fn cameras(&self) -> Vec<CameraRecord<'_>> {
        self.camera_site()
            .key("cameras")
            .items()
            .iter()
            .map(CameraRecord::new)
            .collect()
    }

    /// Look up a camera by id across every camera feature.
    pub fn camera(&self, camera_id: &str) -> Option<CameraRecord<'_>> {
        Field::of(&self.cameras)
            .key("features")
            .items()
            .iter()
            .flat_map(|feature| {
                Field::of(feature)
                    .key("properties")
                    .key("cameras")
                    .items()
                    .iter()
            })
            .map(CameraRecord::new)
            .find(|c| c.id().as_deref() == Some(camera_id))
    }
}

/// A `{value, unit}` pair as reported by a station.
#[derive(Debug, Clone, Copy)]
pub struct Reading<'a> {
    field: Field<'a>,
}

impl<'a> Reading<'a> {
    pub fn value(&self) -> Field<'a> {
        self.field.key("value")
    }

    pub fn unit(&self) -> Option<&'a str> {
        self.field.key("unit").as_str()
    }

    pub fn is_present(&self) -> bool {
        self.value().is_present()
    }
}

/// View of one weather station feature.
#[derive(Debug, Clone, Copy)]
pub struct StationRecord<'a> {
    feature: Field<'a>,
}

impl<'a> StationRecord<'a> {
    fn new(feature: &'a Value) -> Self {
        Self {
            feature: Field::of(feature),
        }
    }

    pub fn id(&self) -> Option<String> {
        self.feature.key("id").as_id()
    }

    pub fn name(&self) -> Option<&'a str> {
        self.feature.key("properties").key("name").as_str()
    }

    /// First atmospheric observation block.
    pub fn atmos(&self) -> Field<'a> {
        self.feature.key("properties").key("atmos").index(0)
    }

    /// Reading for an `atmos` field such as `airTemperature`.
    pub fn reading(&self, field: &str) -> Reading<'a> {
        Reading {
            field: self.atmos().key(field),
        }
    }
}

/// View of one roadside camera.
#[derive(Debug, Clone, Copy)]
pub struct CameraRecord<'a> {
    camera: Field<'a>,
}

impl<'a> CameraRecord<'a> {
    fn new(camera: &'a Value) -> Self {
        Self {
            camera: Field::of(camera),
        }
    }

    pub fn id(&self) -> Option<String> {
        self.camera.key("id").as_id()
    }

    pub fn name(&self) -> Option<&'a str> {
        self.camera.key("name").as_str()
    }

    pub fn description(&self) -> Option<&'a str> {
        self.camera.key("description").as_str()
    }

    pub fn update_time(&self) -> Option<String> {
        self.camera.key("updateTime").as_text()
    }

    pub fn message(&self) -> Option<&'a str> {
        self.camera.key("message").as_str()
    }

    /// Current still-image URL. Rotates between polls.
    pub fn image_url(&self) -> Option<&'a str> {
        self.camera.key("image").as_str()
    }
}

/// One selectable site from the all-sites listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteOption {
    pub id: String,
    pub name: String,
}
