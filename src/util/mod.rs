//! Utility module
//!
//! Logging setup and time conversions used throughout the library.

use std::time::SystemTime;

use chrono::{DateTime, TimeZone, Utc};
use tracing_subscriber::EnvFilter;

use crate::core::{Error, Result};

/// Leap seconds between the GPS and UTC time scales since 2017-01-01
pub const GPS_LEAP_SECONDS: i64 = 18;

/// Installs a formatting subscriber.
///
/// `RUST_LOG` takes precedence over `filter`.
pub fn init_tracing(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .map_err(|e| Error::invalid_argument(format!("invalid log filter: {}", e)))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| Error::failed_precondition(format!("tracing already initialized: {}", e)))
}

fn gps_epoch() -> Result<DateTime<Utc>> {
    Utc.with_ymd_and_hms(1980, 1, 6, 0, 0, 0)
        .single()
        .ok_or_else(|| Error::invalid_argument("invalid GPS epoch"))
}

/// Converts a time to whole GPS seconds and 1/256 s fractions
pub fn to_gps_time(time: SystemTime) -> Result<(u32, u8)> {
    let time = DateTime::<Utc>::from(time);
    let since_epoch = time.signed_duration_since(gps_epoch()?);
    let seconds = since_epoch.num_seconds() + GPS_LEAP_SECONDS;
    let seconds = u32::try_from(seconds)
        .map_err(|_| Error::invalid_argument(format!("{} is outside the GPS time range", time)))?;
    let nanos = time.timestamp_subsec_nanos().min(999_999_999);
    let fractional = (u64::from(nanos) * 256 / 1_000_000_000) as u8;
    Ok((seconds, fractional))
}
