//! Protobuf-JSON duration strings ("1.500s").
//!
//! Google APIs encode `google.protobuf.Duration` as a decimal number of
//! seconds with an `s` suffix. Use with `#[serde(with = "crate::domain::duration")]`.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Parse "1.5s", "3s" or "0.250s" into a Duration
pub fn parse(value: &str) -> Option<Duration> {
    let trimmed = value.trim();
    let number = trimmed.strip_suffix('s').unwrap_or(trimmed);
    let seconds: f64 = number.parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

/// Format a Duration as "<secs>s", using millisecond precision when needed
pub fn format(value: Duration) -> String {
    let millis = value.subsec_millis();
    if millis == 0 {
        format!("{}s", value.as_secs())
    } else {
        format!("{}.{:03}s", value.as_secs(), millis)
    }
}

pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format(*value))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid duration '{}'", raw)))
}

/// Same encoding for optional fields (missing → None)
pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_str(&super::format(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            Some(s) => super::parse(&s)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid duration '{}'", s))),
            None => Ok(None),
        }
    }
}
