//! Wire codec for station readings.
//!
//! The wire format is a UTF-8 JSON object with canonical keys
//! `stationId`, `temperature`, `humidity`, `pressure` (optional) and
//! `timestamp`. Decoding also accepts the legacy keys `estacion_id`,
//! `temperatura`, `humedad`, `presion` and `fecha`; the canonical key wins
//! when both are present.
//!
//! Decoding is all-or-nothing: it either yields a fully validated
//! [`Reading`] or an error, never a partial value.

use chrono::{DateTime, NaiveDateTime};
use serde_json::{Map, Value};

use crate::error::{CodecError, ValidationError};
use crate::models::{Field, Reading};

/// Maximum number of payload bytes echoed into log lines.
pub const MAX_PREVIEW_BYTES: usize = 256;

/// Accepted naive timestamp layouts (`T` and space separated).
const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Serialize a reading to its canonical wire payload.
pub fn encode(reading: &Reading) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(reading)?)
}

/// Parse and validate a wire payload.
///
/// # Errors
///
/// - `CodecError::Decode` if the payload is not a JSON object
/// - `ValidationError::MissingFields` listing every absent required field
/// - `ValidationError::InvalidType` if a field has the wrong JSON type
/// - `ValidationError::OutOfRange` if a value violates its declared range
/// - `ValidationError::InvalidTimestamp` if the timestamp does not parse
pub fn decode(payload: &[u8]) -> Result<Reading, CodecError> {
    let value: Value = serde_json::from_slice(payload)?;
    let Value::Object(object) = value else {
        return Err(CodecError::Decode(format!(
            "expected a JSON object, found {}",
            json_kind(&value)
        )));
    };

    let (Some(station_id), Some(temperature), Some(humidity), Some(timestamp)) = (
        lookup(&object, Field::StationId),
        lookup(&object, Field::Temperature),
        lookup(&object, Field::Humidity),
        lookup(&object, Field::Timestamp),
    ) else {
        let missing = Field::REQUIRED
            .into_iter()
            .filter(|field| lookup(&object, *field).is_none())
            .collect();
        return Err(ValidationError::MissingFields(missing).into());
    };

    let station_id = parse_station_id(station_id)?;
    let temperature = parse_number(Field::Temperature, temperature)?;
    let humidity = parse_number(Field::Humidity, humidity)?;
    let timestamp = parse_timestamp(timestamp)?;
    let pressure = lookup(&object, Field::Pressure)
        .map(|value| parse_number(Field::Pressure, value))
        .transpose()?;

    let reading = Reading::new(station_id, temperature, humidity, timestamp)?;
    Ok(match pressure {
        Some(pressure) => reading.with_pressure(pressure)?,
        None => reading,
    })
}

/// Lossy, length-bounded rendering of a payload for log lines.
pub fn payload_preview(payload: &[u8]) -> String {
    let end = payload.len().min(MAX_PREVIEW_BYTES);
    let mut preview = String::from_utf8_lossy(payload.get(..end).unwrap_or_default()).into_owned();
    if payload.len() > MAX_PREVIEW_BYTES {
        preview.push_str("...");
    }
    preview
}

/// Find a field by canonical key, falling back to its legacy key.
/// JSON `null` counts as absent.
fn lookup(object: &Map<String, Value>, field: Field) -> Option<&Value> {
    object
        .get(field.as_str())
        .filter(|v| !v.is_null())
        .or_else(|| object.get(field.legacy_key()).filter(|v| !v.is_null()))
}

fn parse_station_id(value: &Value) -> Result<u8, ValidationError> {
    let field = Field::StationId;
    if let Some(id) = value.as_i64() {
        return u8::try_from(id).map_err(|_| ValidationError::OutOfRange {
            field,
            value: id as f64,
        });
    }
    if let Some(id) = value.as_u64() {
        return Err(ValidationError::OutOfRange {
            field,
            value: id as f64,
        });
    }
    Err(ValidationError::InvalidType { field })
}

fn parse_number(field: Field, value: &Value) -> Result<f64, ValidationError> {
    value
        .as_f64()
        .ok_or(ValidationError::InvalidType { field })
}

fn parse_timestamp(value: &Value) -> Result<NaiveDateTime, ValidationError> {
    let raw = value.as_str().ok_or(ValidationError::InvalidType {
        field: Field::Timestamp,
    })?;

    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.naive_utc())
        })
        .ok_or_else(|| ValidationError::InvalidTimestamp(raw.to_string()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn validation(result: Result<Reading, CodecError>) -> ValidationError {
        match result {
            Err(CodecError::Validation(e)) => e,
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_canonical_payload() {
        let payload = br#"{"stationId":3,"temperature":22.5,"humidity":60.0,"timestamp":"2025-11-11T12:30:45"}"#;
        let reading = decode(payload).unwrap();

        assert_eq!(reading.station_id(), 3);
        assert_eq!(reading.temperature(), 22.5);
        assert_eq!(reading.humidity(), 60.0);
        assert_eq!(reading.pressure(), None);
        assert_eq!(reading.timestamp().to_string(), "2025-11-11 12:30:45");
    }

    #[test]
    fn test_decode_legacy_payload() {
        let payload = br#"{"estacion_id":1,"temperatura":25.5,"humedad":65.0,"fecha":"2025-11-11T12:30:45.123456"}"#;
        let reading = decode(payload).unwrap();

        assert_eq!(reading.station_id(), 1);
        assert_eq!(reading.temperature(), 25.5);
    }

    #[test]
    fn test_canonical_key_wins_over_legacy() {
        let payload = br#"{"stationId":2,"estacion_id":9,"temperature":20,"humidity":50,"timestamp":"2025-01-01T00:00:00"}"#;
        assert_eq!(decode(payload).unwrap().station_id(), 2);
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        let result = decode(br#"{"estacion_id": 1, "temperatura": 25.0"#);
        assert!(matches!(result, Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_non_object() {
        let result = decode(b"[1,2,3]");
        match result {
            Err(CodecError::Decode(msg)) => assert!(msg.contains("an array")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_missing_fields_are_all_reported() {
        let err = validation(decode(br#"{"stationId":3,"temperature":22.5}"#));
        assert_eq!(
            err,
            ValidationError::MissingFields(vec![Field::Humidity, Field::Timestamp])
        );
    }

    #[test]
    fn test_null_counts_as_missing() {
        let err = validation(decode(
            br#"{"stationId":3,"temperature":null,"humidity":50,"timestamp":"2025-01-01T00:00:00"}"#,
        ));
        assert_eq!(err, ValidationError::MissingFields(vec![Field::Temperature]));
    }

    #[test]
    fn test_station_out_of_range() {
        let err = validation(decode(
            br#"{"stationId":7,"temperature":20,"humidity":50,"timestamp":"2025-01-01T00:00:00"}"#,
        ));
        assert_eq!(err.field(), Some(Field::StationId));

        let err = validation(decode(
            br#"{"stationId":-1,"temperature":20,"humidity":50,"timestamp":"2025-01-01T00:00:00"}"#,
        ));
        assert_eq!(err.field(), Some(Field::StationId));
    }

    #[test]
    fn test_wrong_types() {
        let err = validation(decode(
            br#"{"stationId":"3","temperature":20,"humidity":50,"timestamp":"2025-01-01T00:00:00"}"#,
        ));
        assert_eq!(
            err,
            ValidationError::InvalidType {
                field: Field::StationId
            }
        );

        let err = validation(decode(
            br#"{"stationId":3.5,"temperature":20,"humidity":50,"timestamp":"2025-01-01T00:00:00"}"#,
        ));
        assert_eq!(err.field(), Some(Field::StationId));

        let err = validation(decode(
            br#"{"stationId":3,"temperature":20,"humidity":50,"timestamp":1700000000}"#,
        ));
        assert_eq!(err.field(), Some(Field::Timestamp));
    }

    #[test]
    fn test_invalid_timestamp() {
        let err = validation(decode(
            br#"{"stationId":3,"temperature":20,"humidity":50,"timestamp":"yesterday"}"#,
        ));
        assert_eq!(err, ValidationError::InvalidTimestamp("yesterday".to_string()));
    }

    #[test]
    fn test_rfc3339_timestamp_is_normalised_to_utc() {
        let reading = decode(
            br#"{"stationId":3,"temperature":20,"humidity":50,"timestamp":"2025-01-01T02:00:00+02:00"}"#,
        )
        .unwrap();
        assert_eq!(reading.timestamp().to_string(), "2025-01-01 00:00:00");
    }

    #[test]
    fn test_pressure_is_validated_when_present() {
        let err = validation(decode(
            br#"{"stationId":3,"temperature":20,"humidity":50,"pressure":1200,"timestamp":"2025-01-01T00:00:00"}"#,
        ));
        assert_eq!(err.field(), Some(Field::Pressure));
    }

    #[test]
    fn test_encode_uses_canonical_keys() {
        let reading = decode(
            br#"{"estacion_id":4,"temperatura":18.25,"humedad":70.5,"fecha":"2025-11-11T12:30:45"}"#,
        )
        .unwrap();
        let json: Value = serde_json::from_slice(&encode(&reading).unwrap()).unwrap();

        assert_eq!(json["stationId"], 4);
        assert_eq!(json["temperature"], 18.25);
        assert_eq!(json["humidity"], 70.5);
        assert_eq!(json["timestamp"], "2025-11-11T12:30:45");
        assert!(json.get("pressure").is_none());
    }

    #[test]
    fn test_payload_preview_is_bounded() {
        let payload = vec![b'a'; MAX_PREVIEW_BYTES * 2];
        let preview = payload_preview(&payload);
        assert_eq!(preview.len(), MAX_PREVIEW_BYTES + 3);
        assert!(preview.ends_with("..."));

        assert_eq!(payload_preview(b"short"), "short");
    }
}
