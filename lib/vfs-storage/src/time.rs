use std::ops::Add;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Creation timestamp with microsecond precision, matching TIMESTAMPTZ.
///
/// Serializes as RFC 3339 with six fractional digits and a `Z` suffix, so the
/// serialized forms of two values order the same way the values do.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageDatetime(pub DateTime<Utc>);

impl StorageDatetime {
    pub fn now() -> Self {
        StorageDatetime(datetime_micros())
    }

    /// The later of now and one microsecond after `previous`.
    pub fn now_after(previous: Option<&StorageDatetime>) -> Self {
        let now = Self::now();
        match previous {
            Some(previous) if now <= *previous => previous.clone() + Duration::from_micros(1),
            _ => now,
        }
    }

    pub fn inner(&self) -> &DateTime<Utc> {
        &self.0
    }

    pub fn parse(s: &str) -> Result<Self, chrono::ParseError> {
        DateTime::parse_from_rfc3339(s).map(|dt| StorageDatetime(truncate(dt.with_timezone(&Utc))))
    }
}

impl Serialize for StorageDatetime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for StorageDatetime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        StorageDatetime::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl Add<Duration> for StorageDatetime {
    type Output = StorageDatetime;

    fn add(self, rhs: Duration) -> Self::Output {
        let new_time = self.0 + chrono::Duration::from_std(rhs).unwrap_or(chrono::Duration::zero());
        StorageDatetime(new_time)
    }
}

impl std::fmt::Display for StorageDatetime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
    }
}

impl From<DateTime<Utc>> for StorageDatetime {
    fn from(dt: DateTime<Utc>) -> Self {
        StorageDatetime(truncate(dt))
    }
}

impl From<StorageDatetime> for DateTime<Utc> {
    fn from(dt: StorageDatetime) -> Self {
        dt.0
    }
}

fn truncate(dt: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(dt.timestamp_micros()).unwrap_or(dt)
}

/// Create a DateTime truncated to microsecond precision (6 decimal places)
fn datetime_micros() -> DateTime<Utc> {
    let now = match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(time) => time,
        Err(_) => std::time::Duration::from_secs(0),
    };

    let timestamp_micros = (now.as_secs() as i64 * 1_000_000) + (now.subsec_micros() as i64);
    if let Some(time) = DateTime::from_timestamp_micros(timestamp_micros) {
        time
    } else {
        DateTime::<Utc>::from_timestamp_nanos(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_after_is_strictly_later() {
        let first = StorageDatetime::now() + Duration::from_secs(3600);
        let next = StorageDatetime::now_after(Some(&first));
        assert!(next > first);
        assert_eq!(next, first + Duration::from_micros(1));
    }

    #[test]
    fn accepts_offset_timestamps() {
        let dt = StorageDatetime::parse("2024-05-01T10:00:00.123456+00:00").unwrap();
        assert_eq!(dt.to_string(), "2024-05-01T10:00:00.123456Z");
    }
}
