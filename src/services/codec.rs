//! Row codec
//!
//! The one place rows turn into typed models and back. Field mapping is
//! declared on the models with serde attributes; this module adds the
//! timestamp handling the database needs.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::{ServiceError, ServiceResult};

pub fn decode_row<T: DeserializeOwned>(row: Value) -> ServiceResult<T> {
    serde_json::from_value(row).map_err(|e| ServiceError::Decoding(e.to_string()))
}

pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> ServiceResult<Vec<T>> {
    rows.into_iter().map(decode_row).collect()
}

pub fn encode_row<T: Serialize>(value: &T) -> ServiceResult<Value> {
    serde_json::to_value(value).map_err(|e| ServiceError::InvalidData(e.to_string()))
}

/// Parses the timestamp shapes the backend emits: RFC 3339,
/// `YYYY-MM-DD HH:MM:SS[.f][+TZ]`, zone-less date-times (read as UTC) and bare
/// dates (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(parsed) = DateTime::parse_from_str(raw, format) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
}

/// Serde adapter for `DateTime<Utc>` fields. Writes RFC 3339, reads anything
/// [`parse_timestamp`] accepts.
pub mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw).ok_or_else(|| D::Error::custom(format!("unrecognised timestamp {:?}", raw)))
    }
}

/// [`timestamp`] for nullable columns. Pair with `#[serde(default)]`.
pub mod option_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_str(&value.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => super::parse_timestamp(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("unrecognised timestamp {:?}", raw))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde::Deserialize;
    use serde_json::json;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_rfc3339() {
        assert_eq!(parse_timestamp("2024-03-01T10:00:00Z"), Some(utc(2024, 3, 1, 10, 0, 0)));
        assert_eq!(parse_timestamp("2024-03-01T12:00:00+02:00"), Some(utc(2024, 3, 1, 10, 0, 0)));
    }

    #[test]
    fn test_database_format_with_short_offset() {
        assert_eq!(parse_timestamp("2024-03-01 10:00:00+00"), Some(utc(2024, 3, 1, 10, 0, 0)));
        let parsed = parse_timestamp("2024-03-01 19:00:00.250+09").unwrap();
        assert_eq!(parsed.timestamp_millis(), utc(2024, 3, 1, 10, 0, 0).timestamp_millis() + 250);
    }

    #[test]
    fn test_zoneless_is_utc() {
        assert_eq!(parse_timestamp("2024-03-01T10:00:00"), Some(utc(2024, 3, 1, 10, 0, 0)));
        assert_eq!(parse_timestamp("2024-03-01 10:00:00.123456").map(|t| t.timestamp()), Some(utc(2024, 3, 1, 10, 0, 0).timestamp()));
    }

    #[test]
    fn test_bare_date_is_midnight() {
        assert_eq!(parse_timestamp("2024-03-01"), Some(utc(2024, 3, 1, 0, 0, 0)));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[derive(Debug, Deserialize)]
    struct Row {
        #[serde(with = "timestamp")]
        created_at: DateTime<Utc>,
        #[serde(default, with = "option_timestamp")]
        read_at: Option<DateTime<Utc>>,
    }

    #[test]
    fn test_serde_adapters() {
        let row: Row = decode_row(json!({"created_at": "2024-03-01 10:00:00+00", "read_at": null})).unwrap();
        assert_eq!(row.created_at, utc(2024, 3, 1, 10, 0, 0));
        assert!(row.read_at.is_none());

        let row: Row = decode_row(json!({"created_at": "2024-03-01"})).unwrap();
        assert!(row.read_at.is_none());

        let err = decode_row::<Row>(json!({"created_at": "soon"})).unwrap_err();
        assert!(matches!(err, ServiceError::Decoding(_)));
    }
}
