// Copyright © 2024 Pathway

use std::fmt::{self, Display};

use chrono::TimeZone;
use serde::{Deserialize, Serialize};

use super::error::DynResult;
use super::Error;

/// UTC timestamp with nanosecond precision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DateTime {
    timestamp: i64,
}

impl DateTime {
    pub fn new(timestamp_ns: i64) -> Self {
        Self {
            timestamp: timestamp_ns,
        }
    }

    pub fn from_timestamp_millis(timestamp_ms: i64) -> Self {
        Self::new(timestamp_ms.saturating_mul(1_000_000))
    }

    pub fn now() -> Self {
        chrono::Utc::now().into()
    }

    pub fn timestamp_ns(&self) -> i64 {
        self.timestamp
    }

    pub fn strptime(date_string: &str, format: &str) -> DynResult<Self> {
        if let Ok(datetime) = chrono::DateTime::parse_from_str(date_string, format) {
            return Ok(datetime.into());
        }
        match chrono::NaiveDateTime::parse_from_str(date_string, format) {
            Ok(datetime) => Ok(datetime.and_utc().into()),
            Err(e) => Err(Error::ParseError(format!(
                "cannot parse date {date_string:?} using format {format:?}: {e}"
            ))
            .into()),
        }
    }

    pub fn strftime(&self, format: &str) -> String {
        chrono::Utc
            .timestamp_nanos(self.timestamp)
            .format(format)
            .to_string()
    }
}

impl<Tz: chrono::TimeZone> From<chrono::DateTime<Tz>> for DateTime {
    fn from(value: chrono::DateTime<Tz>) -> Self {
        Self {
            timestamp: value.timestamp_nanos_opt().unwrap_or(i64::MAX),
        }
    }
}

impl Display for DateTime {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.strftime("%Y-%m-%dT%H:%M:%S%.9f%z"))
    }
}
