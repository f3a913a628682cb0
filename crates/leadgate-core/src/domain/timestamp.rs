use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::macros::datetime;
use time::{format_description, OffsetDateTime, UtcOffset};

use crate::ValidationError;

/// Date-string dialect accepted by the upstream lead API.
const UPSTREAM_FORMAT: &str = "[year]-[month]-[day] [hour]:[minute]:[second]";

const LATEST: UtcDateTime = UtcDateTime(datetime!(9999-12-31 23:59:59.999_999_999 UTC));

/// RFC3339 timestamp guaranteed to be UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UtcDateTime(OffsetDateTime);

impl UtcDateTime {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let parsed = OffsetDateTime::parse(input, &Rfc3339).map_err(|_| {
            ValidationError::TimestampNotUtc {
                value: input.to_owned(),
            }
        })?;

        Self::from_offset_datetime(parsed).map_err(|_| ValidationError::TimestampNotUtc {
            value: input.to_owned(),
        })
    }

    pub fn from_offset_datetime(value: OffsetDateTime) -> Result<Self, ValidationError> {
        if value.offset() != UtcOffset::UTC {
            return Err(ValidationError::TimestampNotUtc {
                value: value
                    .format(&Rfc3339)
                    .unwrap_or_else(|_| String::from("<unformattable>")),
            });
        }
        if !Self::in_range(value) {
            return Err(ValidationError::TimestampOutOfRange {
                value: value.to_string(),
            });
        }

        Ok(Self(value))
    }

    /// RFC3339 only covers four-digit years.
    fn in_range(value: OffsetDateTime) -> bool {
        (0..=9999).contains(&value.year())
    }

    pub fn into_inner(self) -> OffsetDateTime {
        self.0
    }

    pub fn format_rfc3339(self) -> String {
        self.0
            .format(&Rfc3339)
            .expect("UtcDateTime must be RFC3339 formattable")
    }

    /// Renders the timestamp as `YYYY-MM-DD HH:MM:SS`, the form the upstream
    /// expects in its `start_date`/`end_date` query parameters.
    pub fn format_upstream(self) -> Result<String, ValidationError> {
        let format = format_description::parse(UPSTREAM_FORMAT).map_err(|_| {
            ValidationError::UpstreamFormat {
                value: self.format_rfc3339(),
            }
        })?;
        self.0
            .format(&format)
            .map_err(|_| ValidationError::UpstreamFormat {
                value: self.format_rfc3339(),
            })
    }

    /// Elapsed time from `earlier` to `self`, or zero when `earlier` is later.
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        let delta = self.0 - earlier.0;
        if delta.is_negative() {
            Duration::ZERO
        } else {
            delta.unsigned_abs()
        }
    }

    /// `None` when the result falls outside years 0000 to 9999.
    pub fn checked_add(self, duration: Duration) -> Option<Self> {
        let delta = time::Duration::try_from(duration).ok()?;
        self.0
            .checked_add(delta)
            .filter(|value| Self::in_range(*value))
            .map(Self)
    }

    pub fn checked_sub(self, duration: Duration) -> Option<Self> {
        let delta = time::Duration::try_from(duration).ok()?;
        self.0
            .checked_sub(delta)
            .filter(|value| Self::in_range(*value))
            .map(Self)
    }

    /// Like [`checked_add`](Self::checked_add), clamping to the last instant
    /// of year 9999 on overflow.
    pub fn saturating_add(self, duration: Duration) -> Self {
        self.checked_add(duration).unwrap_or(LATEST)
    }
}

impl Display for UtcDateTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format_rfc3339())
    }
}

impl Serialize for UtcDateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.format_rfc3339())
    }
}

impl<'de> Deserialize<'de> for UtcDateTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).map_err(D::Error::custom)
    }
}
