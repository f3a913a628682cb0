use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::UtcDateTime;

/// Requested query window.
///
/// Both bounds are optional so that a caller-supplied range can be handed to
/// the compliance validator as-is; a missing or unparseable bound is reported
/// there instead of failing construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<UtcDateTime>,
    pub end: Option<UtcDateTime>,
}

impl DateRange {
    pub const fn new(start: UtcDateTime, end: UtcDateTime) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub const fn from_bounds(start: Option<UtcDateTime>, end: Option<UtcDateTime>) -> Self {
        Self { start, end }
    }

    /// Builds a range from raw RFC3339 strings. Malformed bounds become `None`.
    pub fn from_rfc3339(start: Option<&str>, end: Option<&str>) -> Self {
        Self {
            start: start.and_then(|raw| UtcDateTime::parse(raw.trim()).ok()),
            end: end.and_then(|raw| UtcDateTime::parse(raw.trim()).ok()),
        }
    }

    /// Range ending at `end` and spanning `span` backwards.
    pub fn ending_at(end: UtcDateTime, span: Duration) -> Self {
        Self {
            start: end.checked_sub(span),
            end: Some(end),
        }
    }

    /// Both bounds, when present.
    pub fn bounds(&self) -> Option<(UtcDateTime, UtcDateTime)> {
        Some((self.start?, self.end?))
    }

    /// Length of a well-ordered range; `None` if a bound is missing or the
    /// range is inverted.
    pub fn span(&self) -> Option<Duration> {
        let (start, end) = self.bounds()?;
        (start < end).then(|| end.saturating_duration_since(start))
    }
}
