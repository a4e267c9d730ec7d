use std::fmt;
use std::ops::RangeInclusive;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::error::ValidationError;

/// Declared range of a station identifier.
pub const STATION_ID_RANGE: RangeInclusive<u8> = 1..=5;

/// Declared temperature range in degrees Celsius.
pub const TEMPERATURE_RANGE: RangeInclusive<f64> = -50.0..=60.0;

/// Declared relative humidity range in percent.
pub const HUMIDITY_RANGE: RangeInclusive<f64> = 0.0..=100.0;

/// Declared barometric pressure range in hectopascal.
pub const PRESSURE_RANGE: RangeInclusive<f64> = 850.0..=1100.0;

/// A field of the reading wire schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    StationId,
    Temperature,
    Humidity,
    Pressure,
    Timestamp,
}

impl Field {
    /// Fields every payload must carry, in canonical order.
    pub const REQUIRED: [Field; 4] = [
        Field::StationId,
        Field::Temperature,
        Field::Humidity,
        Field::Timestamp,
    ];

    /// Canonical JSON key.
    pub fn as_str(self) -> &'static str {
        match self {
            Field::StationId => "stationId",
            Field::Temperature => "temperature",
            Field::Humidity => "humidity",
            Field::Pressure => "pressure",
            Field::Timestamp => "timestamp",
        }
    }

    /// Key used by legacy producers for the same field.
    pub fn legacy_key(self) -> &'static str {
        match self {
            Field::StationId => "estacion_id",
            Field::Temperature => "temperatura",
            Field::Humidity => "humedad",
            Field::Pressure => "presion",
            Field::Timestamp => "fecha",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single weather-station measurement.
///
/// Fields are private: a `Reading` can only be obtained through [`Reading::new`]
/// or [`crate::codec::decode`], both of which enforce the declared ranges, so
/// holding a `Reading` means holding a valid one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    station_id: u8,
    temperature: f64,
    humidity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pressure: Option<f64>,
    /// Producer-assigned, UTC, no offset on the wire.
    timestamp: NaiveDateTime,
}

impl Reading {
    /// Build a reading, rejecting any value outside its declared range.
    ///
    /// Fields are checked in canonical order and the first violation is reported.
    pub fn new(
        station_id: u8,
        temperature: f64,
        humidity: f64,
        timestamp: NaiveDateTime,
    ) -> Result<Self, ValidationError> {
        if !STATION_ID_RANGE.contains(&station_id) {
            return Err(ValidationError::OutOfRange {
                field: Field::StationId,
                value: f64::from(station_id),
            });
        }
        check_range(Field::Temperature, temperature, &TEMPERATURE_RANGE)?;
        check_range(Field::Humidity, humidity, &HUMIDITY_RANGE)?;

        Ok(Self {
            station_id,
            temperature,
            humidity,
            pressure: None,
            timestamp,
        })
    }

    /// Attach a pressure measurement.
    pub fn with_pressure(mut self, pressure: f64) -> Result<Self, ValidationError> {
        check_range(Field::Pressure, pressure, &PRESSURE_RANGE)?;
        self.pressure = Some(pressure);
        Ok(self)
    }

    pub fn station_id(&self) -> u8 {
        self.station_id
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn humidity(&self) -> f64 {
        self.humidity
    }

    pub fn pressure(&self) -> Option<f64> {
        self.pressure
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    /// Routing key for this reading on the topic exchange.
    pub fn routing_key(&self) -> String {
        format!("station.{}", self.station_id)
    }

    /// Check the reading against a narrower band than the declared ranges.
    pub fn check_band(&self, band: &DomainBand) -> Result<(), ValidationError> {
        if !band.station_id.contains(&self.station_id) {
            return Err(ValidationError::OutOfRange {
                field: Field::StationId,
                value: f64::from(self.station_id),
            });
        }
        check_range(Field::Temperature, self.temperature, &band.temperature)?;
        check_range(Field::Humidity, self.humidity, &band.humidity)?;
        if let Some(pressure) = self.pressure {
            check_range(Field::Pressure, pressure, &band.pressure)?;
        }
        Ok(())
    }
}

pub(crate) fn check_range(
    field: Field,
    value: f64,
    range: &RangeInclusive<f64>,
) -> Result<(), ValidationError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange { field, value })
    }
}

/// Operating band of the simulated stations.
///
/// Narrower than the declared ranges: it describes what the producer is
/// expected to generate, not what the consumer accepts.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainBand {
    pub station_id: RangeInclusive<u8>,
    pub temperature: RangeInclusive<f64>,
    pub humidity: RangeInclusive<f64>,
    pub pressure: RangeInclusive<f64>,
}

impl Default for DomainBand {
    fn default() -> Self {
        Self {
            station_id: 1..=5,
            temperature: 15.0..=35.0,
            humidity: 40.0..=90.0,
            pressure: 900.0..=1100.0,
        }
    }
}
