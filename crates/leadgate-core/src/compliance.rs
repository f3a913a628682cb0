//! Date-range compliance rules enforced by the upstream lead API.
//!
//! The upstream rejects ranges wider than a fixed span or reaching too far into
//! the past. Checking locally avoids burning a rate-limited call on a request
//! that can only fail. Every rule runs independently, so a caller sees all
//! problems with a range at once.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{DateRange, UtcDateTime};

const DAY: Duration = Duration::from_secs(86_400);

/// Rule that a date range broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    MissingBound,
    InvertedRange,
    RangeTooLong,
    TooHistorical,
    FutureEnd,
}

impl ViolationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingBound => "MISSING_BOUND",
            Self::InvertedRange => "INVERTED_RANGE",
            Self::RangeTooLong => "RANGE_TOO_LONG",
            Self::TooHistorical => "TOO_HISTORICAL",
            Self::FutureEnd => "FUTURE_END",
        }
    }
}

impl Display for ViolationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub message: String,
}

impl Violation {
    fn new(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Outcome of validating one range. `valid` is true iff `violations` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceResult {
    pub valid: bool,
    pub violations: Vec<Violation>,
}

impl ComplianceResult {
    fn from_violations(violations: Vec<Violation>) -> Self {
        Self {
            valid: violations.is_empty(),
            violations,
        }
    }

    pub fn has(&self, kind: ViolationKind) -> bool {
        self.violations.iter().any(|violation| violation.kind == kind)
    }

    pub fn kinds(&self) -> Vec<ViolationKind> {
        self.violations.iter().map(|violation| violation.kind).collect()
    }

    /// All violation messages joined into a single line.
    pub fn summary(&self) -> String {
        if self.valid {
            return String::from("date range is compliant");
        }
        self.violations
            .iter()
            .map(|violation| violation.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Fixed upstream limits on the queried period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComplianceLimits {
    /// Longest allowed `end - start`.
    pub max_span: Duration,
    /// Oldest allowed `start`, measured back from now.
    pub max_history: Duration,
}

impl Default for ComplianceLimits {
    fn default() -> Self {
        Self {
            max_span: DAY * 7,
            max_history: DAY * 365,
        }
    }
}

impl ComplianceLimits {
    pub fn validate(&self, range: &DateRange, now: UtcDateTime) -> ComplianceResult {
        let mut violations = Vec::new();

        if range.start.is_none() {
            violations.push(Violation::new(
                ViolationKind::MissingBound,
                "start date is missing or not a valid RFC3339 UTC timestamp",
            ));
        }
        if range.end.is_none() {
            violations.push(Violation::new(
                ViolationKind::MissingBound,
                "end date is missing or not a valid RFC3339 UTC timestamp",
            ));
        }

        if let Some((start, end)) = range.bounds() {
            if start >= end {
                violations.push(Violation::new(
                    ViolationKind::InvertedRange,
                    format!("start date {start} must be before end date {end}"),
                ));
            }
        }

        if let Some(end) = range.end {
            if end > now {
                violations.push(Violation::new(
                    ViolationKind::FutureEnd,
                    format!("end date {end} is in the future"),
                ));
            }
        }

        if let Some((start, end)) = range.bounds() {
            let span = end.saturating_duration_since(start);
            if span > self.max_span {
                violations.push(Violation::new(
                    ViolationKind::RangeTooLong,
                    format!(
                        "range spans {} days, the upstream allows at most {} days",
                        whole_days_ceil(span),
                        whole_days_ceil(self.max_span)
                    ),
                ));
            }
        }

        if let Some(start) = range.start {
            if now.saturating_duration_since(start) > self.max_history {
                violations.push(Violation::new(
                    ViolationKind::TooHistorical,
                    format!(
                        "start date {start} is more than {} days in the past",
                        whole_days_ceil(self.max_history)
                    ),
                ));
            }
        }

        ComplianceResult::from_violations(violations)
    }

    /// Cuts a well-ordered range into consecutive windows no longer than
    /// `max_span`. Returns an empty list for ranges with a missing bound or
    /// `start >= end`.
    pub fn split(&self, range: &DateRange) -> Vec<DateRange> {
        let Some((start, end)) = range.bounds() else {
            return Vec::new();
        };
        if start >= end || self.max_span.is_zero() {
            return Vec::new();
        }

        let mut windows = Vec::new();
        let mut cursor = start;
        while cursor < end {
            let window_end = cursor
                .checked_add(self.max_span)
                .filter(|candidate| *candidate < end)
                .unwrap_or(end);
            windows.push(DateRange::new(cursor, window_end));
            cursor = window_end;
        }
        windows
    }
}

/// Validates `range` against the default upstream limits.
pub fn validate(range: &DateRange, now: UtcDateTime) -> ComplianceResult {
    ComplianceLimits::default().validate(range, now)
}

fn whole_days_ceil(duration: Duration) -> u64 {
    duration.as_secs().div_ceil(DAY.as_secs())
}
