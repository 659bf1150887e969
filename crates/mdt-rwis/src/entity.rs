//! Entity contracts the host platform polls or calls on demand.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::{ATTRIBUTION, DOMAIN, MANUFACTURER};

/// Groups entities under one physical device in the host UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub identifiers: BTreeSet<(String, String)>,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
}

impl DeviceInfo {
    /// Device identified by `(DOMAIN, id)`.
    pub fn new(id: impl Into<String>, name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            identifiers: BTreeSet::from([(DOMAIN.to_string(), id.into())]),
            name: name.into(),
            manufacturer: MANUFACTURER.to_string(),
            model: model.into(),
        }
    }
}

/// Base contract shared by sensors and cameras.
pub trait Entity: Send + Sync {
    /// Stable id, unique across the host.
    fn unique_id(&self) -> &str;

    fn name(&self) -> &str;

    fn device_info(&self) -> &DeviceInfo;

    /// False while the backing data is missing or the last poll failed.
    fn available(&self) -> bool;

    fn icon(&self) -> Option<&'static str> {
        None
    }

    fn attribution(&self) -> &'static str {
        ATTRIBUTION
    }
}

/// Host-side classification of a sensor's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Temperature,
    Humidity,
    WindSpeed,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Temperature => "temperature",
            DeviceClass::Humidity => "humidity",
            DeviceClass::WindSpeed => "wind_speed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    Measurement,
}

/// A sensor reading: numeric for measurements, text for compass headings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SensorValue {
    Number(f64),
    Text(String),
}

impl SensorValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SensorValue::Number(n) => Some(*n),
            SensorValue::Text(_) => None,
        }
    }
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorValue::Number(n) => write!(f, "{}", n),
            SensorValue::Text(t) => write!(f, "{}", t),
        }
    }
}

pub trait SensorEntity: Entity {
    /// Current value, or `None` when unavailable.
    fn native_value(&self) -> Option<SensorValue>;

    fn native_unit_of_measurement(&self) -> Option<&'static str>;

    fn device_class(&self) -> Option<DeviceClass>;

    fn state_class(&self) -> Option<StateClass>;
}

#[async_trait]
pub trait CameraEntity: Entity {
    /// Latest still image, or `None` when it cannot be fetched.
    async fn camera_image(&self) -> Option<Vec<u8>>;

    fn extra_state_attributes(&self) -> BTreeMap<String, Value>;
}
