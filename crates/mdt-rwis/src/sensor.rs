//! Station sensors derived from the coordinator cache.

use std::sync::Arc;

use crate::coordinator::UpdateCoordinator;
use crate::entity::{DeviceClass, DeviceInfo, Entity, SensorEntity, StateClass};
use crate::model::StationRecord;

pub use crate::entity::SensorValue;

/// The measurements exposed for every station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Temperature,
    Humidity,
    WindSpeed,
    WindDirection,
    DewPoint,
    PrecipitationRate,
}

impl SensorKind {
    pub const ALL: [SensorKind; 6] = [
        SensorKind::Temperature,
        SensorKind::Humidity,
        SensorKind::WindSpeed,
        SensorKind::WindDirection,
        SensorKind::DewPoint,
        SensorKind::PrecipitationRate,
    ];

    /// Field name inside the station's `atmos` block.
    pub fn field(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "airTemperature",
            SensorKind::Humidity => "relativeHumidity",
            SensorKind::WindSpeed => "windSpeed",
            SensorKind::WindDirection => "windDirection",
            SensorKind::DewPoint => "dewpointTemperature",
            SensorKind::PrecipitationRate => "precipRate",
        }
    }

    /// Suffix of the entity's unique id.
    pub fn key(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
            SensorKind::WindSpeed => "wind_speed",
            SensorKind::WindDirection => "wind_direction",
            SensorKind::DewPoint => "dew_point",
            SensorKind::PrecipitationRate => "precip_rate",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "Temperature",
            SensorKind::Humidity => "Humidity",
            SensorKind::WindSpeed => "Wind Speed",
            SensorKind::WindDirection => "Wind Direction",
            SensorKind::DewPoint => "Dew Point",
            SensorKind::PrecipitationRate => "Precipitation Rate",
        }
    }

    pub fn unit(&self) -> Option<&'static str> {
        match self {
            SensorKind::Temperature | SensorKind::DewPoint => Some("°F"),
            SensorKind::Humidity => Some("%"),
            SensorKind::WindSpeed => Some("mph"),
            SensorKind::PrecipitationRate => Some("in/h"),
            SensorKind::WindDirection => None,
        }
    }

    pub fn device_class(&self) -> Option<DeviceClass> {
        match self {
            SensorKind::Temperature | SensorKind::DewPoint => Some(DeviceClass::Temperature),
            SensorKind::Humidity => Some(DeviceClass::Humidity),
            SensorKind::WindSpeed => Some(DeviceClass::WindSpeed),
            SensorKind::WindDirection | SensorKind::PrecipitationRate => None,
        }
    }

    pub fn state_class(&self) -> Option<StateClass> {
        match self {
            SensorKind::WindDirection => None,
            _ => Some(StateClass::Measurement),
        }
    }

    pub fn icon(&self) -> Option<&'static str> {
        match self {
            SensorKind::WindDirection => Some("mdi:compass"),
            _ => None,
        }
    }

    /// Compass headings are text; everything else is numeric.
    pub fn is_numeric(&self) -> bool {
        !matches!(self, SensorKind::WindDirection)
    }

    fn extract(&self, station: &StationRecord<'_>) -> Option<SensorValue> {
        let value = station.reading(self.field()).value();
        if self.is_numeric() {
            value.as_f64().map(SensorValue::Number)
        } else {
            value.as_text().map(SensorValue::Text)
        }
    }
}

/// One measurement of one station.
#[derive(Debug, Clone)]
pub struct RwisSensor {
    coordinator: Arc<UpdateCoordinator>,
    station_id: String,
    kind: SensorKind,
    name: String,
    unique_id: String,
    device_info: DeviceInfo,
}

impl RwisSensor {
    /// Bind `kind` of `station_id`. The station name is read once from the
    /// current cache; the id doubles as the name when it is missing.
    pub fn new(
        coordinator: Arc<UpdateCoordinator>,
        station_id: impl Into<String>,
        kind: SensorKind,
    ) -> Self {
        let station_id = station_id.into();
        let station_name = coordinator
            .data()
            .and_then(|data| {
                data.station(&station_id)
                    .and_then(|s| s.name().map(str::to_string))
            })
            .unwrap_or_else(|| station_id.clone());

        Self {
            name: format!("RWIS {} {}", station_name, kind.label()),
            unique_id: format!("{}_{}", station_id, kind.key()),
            device_info: DeviceInfo::new(
                station_id.clone(),
                format!("RWIS {}", station_name),
                "RWIS Station",
            ),
            coordinator,
            station_id,
            kind,
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    /// Unit string as reported by the API, which may differ from the
    /// fixed unit the entity advertises.
    pub fn reported_unit(&self) -> Option<String> {
        let data = self.coordinator.data()?;
        let station = data.station(&self.station_id)?;
        station
            .reading(self.kind.field())
            .unit()
            .map(str::to_string)
    }
}

impl Entity for RwisSensor {
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
        self.coordinator.last_update_success()
            && self
                .coordinator
                .data()
                .is_some_and(|data| data.station(&self.station_id).is_some())
    }

    fn icon(&self) -> Option<&'static str> {
        self.kind.icon()
    }
}

impl SensorEntity for RwisSensor {
    fn native_value(&self) -> Option<SensorValue> {
        let data = self.coordinator.data()?;
        let station = data.station(&self.station_id)?;
        self.kind.extract(&station)
    }

    fn native_unit_of_measurement(&self) -> Option<&'static str> {
        self.kind.unit()
    }

    fn device_class(&self) -> Option<DeviceClass> {
        self.kind.device_class()
    }

    fn state_class(&self) -> Option<StateClass> {
        self.kind.state_class()
    }
}

/// Create the sensors for the first station in the current cache.
///
/// Returns no entities when the cache holds no station.
pub fn setup_sensors(coordinator: &Arc<UpdateCoordinator>) -> Vec<RwisSensor> {
    let Some(data) = coordinator.data() else {
        log::error!("[Sensor] no weather data available for {}", coordinator.name());
        return Vec::new();
    };

    let Some(station_id) = data.first_station().and_then(|s| s.id()) else {
        log::error!(
            "[Sensor] no station feature in weather data for {}",
            coordinator.name()
        );
        return Vec::new();
    };

    let station_count = data.stations().count();
    if station_count > 1 {
        log::warn!(
            "[Sensor] {} stations returned for {}, binding to {}",
            station_count,
            coordinator.name(),
            station_id
        );
    }

    log::debug!("[Sensor] setting up sensors for station {}", station_id);
    SensorKind::ALL
        .iter()
        .map(|kind| RwisSensor::new(coordinator.clone(), station_id.clone(), *kind))
        .collect()
}
