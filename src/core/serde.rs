use serde::{Serialize, Deserialize, Serializer, Deserializer};
use std::time::{SystemTime, Duration, UNIX_EPOCH};

/// Serializes Duration as seconds
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    duration.as_secs_f64().serialize(serializer)
}

/// Deserializes Duration from seconds
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

/// Serializes an optional SystemTime as nanoseconds since UNIX_EPOCH
///
/// Nanosecond integers keep `received_at` exact across a bincode round trip.
pub fn serialize_opt_time<S>(time: &Option<SystemTime>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    time.map(|t| {
        t.duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0))
            .as_nanos() as u64
    })
    .serialize(serializer)
}

/// Deserializes an optional SystemTime from nanoseconds since UNIX_EPOCH
pub fn deserialize_opt_time<'de, D>(deserializer: D) -> Result<Option<SystemTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let nanos = Option::<u64>::deserialize(deserializer)?;
    Ok(nanos.map(|n| UNIX_EPOCH + Duration::from_nanos(n)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json;

    #[test]
    fn test_time_serialization() {
        #[derive(Serialize, Deserialize)]
        struct Test {
            #[serde(serialize_with = "serialize_opt_time")]
            #[serde(deserialize_with = "deserialize_opt_time")]
            time: Option<SystemTime>,
        }

        let original = Test {
            time: Some(SystemTime::now()),
        };

        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: Test = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized.time, original.time);

        let empty = serde_json::to_string(&Test { time: None }).unwrap();
        let deserialized: Test = serde_json::from_str(&empty).unwrap();
        assert!(deserialized.time.is_none());
    }

    #[test]
    fn test_duration_serialization() {
        #[derive(Serialize, Deserialize)]
        struct Test {
            #[serde(serialize_with = "serialize_duration")]
            #[serde(deserialize_with = "deserialize_duration")]
            timeout: Duration,
        }

        let serialized = serde_json::to_string(&Test { timeout: Duration::from_millis(1500) }).unwrap();
        assert_eq!(serialized, r#"{"timeout":1.5}"#);

        let negative: std::result::Result<Test, _> = serde_json::from_str(r#"{"timeout":-1.0}"#);
        assert!(negative.is_err());
    }
}
