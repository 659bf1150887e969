//! Montana DOT RWIS integration.
//!
//! Polls the MDT road weather conditions API for a single site and exposes
//! the results as typed entities:
//! - six scalar sensors per weather station (temperature, humidity, wind,
//!   dew point, precipitation rate)
//! - one still-image camera per roadside camera
//!
//! The [`coordinator::UpdateCoordinator`] owns the polling timer and the
//! last-known-good cache; entities hold an `Arc` to it and re-derive their
//! values from the cache on every read.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use mdt_rwis::prelude::*;
//!
//! let store = EntryStore::load_or_default("entries.yaml")?;
//! let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new()?);
//!
//! for entry in &store.entries {
//!     let loaded = setup_entry(entry, transport.clone(), &store.base_url()).await?;
//!     for sensor in &loaded.sensors {
//!         log::info!("{} = {:?}", sensor.name(), sensor.native_value());
//!     }
//!     loaded.unload().await;
//! }
//! ```

pub mod api;
pub mod camera;
pub mod config;
pub mod config_flow;
pub mod coordinator;
pub mod entity;
pub mod integration;
pub mod json;
pub mod model;
pub mod sensor;

/// Integration domain, used for unique ids and device identifiers.
pub const DOMAIN: &str = "mdt_rwis";

/// Human-readable integration name.
pub const NAME: &str = "Montana DOT RWIS";

/// Manufacturer reported in device info.
pub const MANUFACTURER: &str = "Montana DOT";

/// Attribution string attached to every entity.
pub const ATTRIBUTION: &str = "Data provided by Montana DOT";

/// Initialize logging with env_logger.
///
/// Respects RUST_LOG environment variable. Defaults to "info" level.
/// Call once, at the start of `main`.
pub fn setup_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

/// Commonly used types, re-exported for binaries and tests.
pub mod prelude {
    pub use crate::api::{ApiError, HttpResponse, HttpTransport, ReqwestTransport, RwisClient};
    pub use crate::camera::{setup_cameras, RwisCamera};
    pub use crate::config::{ConfigEntry, ConfigError, EntryData, EntryStore, UpdateInterval};
    pub use crate::config_flow::{ConfigFlow, FlowError, FlowResult, FlowStep};
    pub use crate::coordinator::{CoordinatorState, UpdateCoordinator, UpdateFailed};
    pub use crate::entity::{CameraEntity, DeviceInfo, Entity, SensorEntity};
    pub use crate::integration::{setup_entry, LoadedEntry, SetupError};
    pub use crate::model::{CameraRecord, FetchResult, SiteOption, StationRecord};
    pub use crate::sensor::{setup_sensors, RwisSensor, SensorKind, SensorValue};
    pub use std::sync::Arc;
}
