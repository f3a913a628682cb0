//! Maps upstream failures onto a closed, typed taxonomy.
//!
//! The upstream reports most problems as free text, sometimes with a
//! misleading status code, so classification matches `(status, message)`
//! pairs against an ordered rule table. First match wins.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Serialize, Serializer};

use crate::transport::TransportError;

/// Closed set of failure kinds surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    RateLimitShort,
    RateLimitBlocked,
    InvalidCredential,
    CredentialExpired,
    NoResults,
    RangeTooLarge,
    MissingParameters,
    MalformedDate,
    UpstreamInternal,
    TransportFailure,
    Unknown,
}

impl ErrorKind {
    pub const ALL: [Self; 11] = [
        Self::RateLimitShort,
        Self::RateLimitBlocked,
        Self::InvalidCredential,
        Self::CredentialExpired,
        Self::NoResults,
        Self::RangeTooLarge,
        Self::MissingParameters,
        Self::MalformedDate,
        Self::UpstreamInternal,
        Self::TransportFailure,
        Self::Unknown,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimitShort => "RATE_LIMIT_SHORT",
            Self::RateLimitBlocked => "RATE_LIMIT_BLOCKED",
            Self::InvalidCredential => "INVALID_CREDENTIAL",
            Self::CredentialExpired => "CREDENTIAL_EXPIRED",
            Self::NoResults => "NO_RESULTS",
            Self::RangeTooLarge => "RANGE_TOO_LARGE",
            Self::MissingParameters => "MISSING_PARAMETERS",
            Self::MalformedDate => "MALFORMED_DATE",
            Self::UpstreamInternal => "UPSTREAM_INTERNAL",
            Self::TransportFailure => "TRANSPORT_FAILURE",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Terminal kinds can never succeed on retry.
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimitShort
                | Self::RateLimitBlocked
                | Self::UpstreamInternal
                | Self::TransportFailure
                | Self::Unknown
        )
    }

    pub const fn is_rate_limit(self) -> bool {
        matches!(self, Self::RateLimitShort | Self::RateLimitBlocked)
    }

    pub const fn default_retry_after(self) -> Duration {
        match self {
            Self::RateLimitShort => Duration::from_secs(300),
            Self::RateLimitBlocked => Duration::from_secs(900),
            Self::UpstreamInternal => Duration::from_secs(30),
            Self::TransportFailure => Duration::from_secs(10),
            Self::Unknown => Duration::from_secs(60),
            Self::InvalidCredential
            | Self::CredentialExpired
            | Self::NoResults
            | Self::RangeTooLarge
            | Self::MissingParameters
            | Self::MalformedDate => Duration::ZERO,
        }
    }

    pub const fn suggestion(self) -> &'static str {
        match self {
            Self::RateLimitShort => "wait for the minimum call interval to pass before calling again",
            Self::RateLimitBlocked => "the API key is temporarily suspended; wait for the block to expire",
            Self::InvalidCredential => "check that the configured API key is correct",
            Self::CredentialExpired => "renew the API key with the provider",
            Self::NoResults => "no leads exist for this period; try a different date range",
            Self::RangeTooLarge => "shorten the date range to at most 7 days",
            Self::MissingParameters => "supply both start and end dates",
            Self::MalformedDate => "send dates as RFC3339 UTC timestamps with start before end",
            Self::UpstreamInternal => "the provider had an internal error; retry later",
            Self::TransportFailure => "check network connectivity to the provider",
            Self::Unknown => "retry later; contact the provider if the error persists",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed upstream failure with retry guidance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedError {
    kind: ErrorKind,
    http_status: Option<u16>,
    message: String,
    retryable: bool,
    #[serde(rename = "retry_after_ms", serialize_with = "serialize_millis")]
    retry_after: Duration,
    suggestion: String,
}

impl ClassifiedError {
    /// Error of `kind` carrying the kind's default retry guidance.
    pub fn new(kind: ErrorKind, http_status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            http_status,
            message: message.into(),
            retryable: kind.is_retryable(),
            retry_after: kind.default_retry_after(),
            suggestion: kind.suggestion().to_owned(),
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn non_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }

    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub const fn http_status(&self) -> Option<u16> {
        self.http_status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn retry_after(&self) -> Duration {
        self.retry_after
    }

    pub fn suggestion(&self) -> &str {
        &self.suggestion
    }

    pub const fn code(&self) -> &'static str {
        self.kind.as_str()
    }
}

impl Display for ClassifiedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for ClassifiedError {}

#[derive(Debug, Clone, Copy)]
enum StatusMatch {
    Any,
    Only(&'static [u16]),
    ServerError,
}

impl StatusMatch {
    fn matches(self, status: u16) -> bool {
        match self {
            Self::Any => true,
            Self::Only(statuses) => statuses.contains(&status),
            Self::ServerError => (500..600).contains(&status),
        }
    }
}

struct Rule {
    kind: ErrorKind,
    status: StatusMatch,
    pattern: Option<Regex>,
}

impl Rule {
    fn new(kind: ErrorKind, status: StatusMatch, pattern: &str) -> Self {
        Self {
            kind,
            status,
            pattern: Some(Regex::new(pattern).expect("classifier rule pattern is valid")),
        }
    }

    fn status_only(kind: ErrorKind, status: StatusMatch) -> Self {
        Self {
            kind,
            status,
            pattern: None,
        }
    }

    fn matches(&self, status: u16, message: &str) -> bool {
        self.status.matches(status)
            && self
                .pattern
                .as_ref()
                .map_or(true, |pattern| pattern.is_match(message))
    }
}

const CLIENT_ERRORS: &[u16] = &[400, 422];
const AUTH_ERRORS: &[u16] = &[401, 403];

lazy_static! {
    static ref RULES: Vec<Rule> = vec![
        Rule::new(
            ErrorKind::RateLimitBlocked,
            StatusMatch::Any,
            r"(?i)\bblock(ed)?\b|suspend|\b15\s*min|per\s+hour|hourly",
        ),
        Rule::new(
            ErrorKind::RateLimitShort,
            StatusMatch::Any,
            r"(?i)\b5\s*min|once\s+every|rate[\s_-]*limit|too\s+many\s+requests|too\s+frequent",
        ),
        Rule::new(
            ErrorKind::CredentialExpired,
            StatusMatch::Only(&[400, 401, 403]),
            r"(?i)expired",
        ),
        Rule::new(
            ErrorKind::InvalidCredential,
            StatusMatch::Only(AUTH_ERRORS),
            r"(?i)incorrect|invalid\s+(api\s+)?(key|token|credential)|unauthori[sz]ed|forbidden|authentication",
        ),
        Rule::new(
            ErrorKind::NoResults,
            StatusMatch::Any,
            r"(?i)\bno\s+(leads?|results?|data|records?)\b|nothing\s+found",
        ),
        Rule::new(
            ErrorKind::RangeTooLarge,
            StatusMatch::Only(CLIENT_ERRORS),
            r"(?i)range.*(too|exceed|max|more\s+than)|\b7\s*days|too\s+(large|long|wide)",
        ),
        Rule::new(
            ErrorKind::MissingParameters,
            StatusMatch::Only(CLIENT_ERRORS),
            r"(?i)missing|required|must\s+(be\s+)?provided?",
        ),
        Rule::new(
            ErrorKind::MalformedDate,
            StatusMatch::Only(CLIENT_ERRORS),
            r"(?i)date.*(format|invalid|malformed|parse)|(format|invalid|malformed|parse).*date",
        ),
        Rule::status_only(ErrorKind::UpstreamInternal, StatusMatch::ServerError),
        Rule::status_only(ErrorKind::InvalidCredential, StatusMatch::Only(AUTH_ERRORS)),
        Rule::status_only(ErrorKind::RateLimitShort, StatusMatch::Only(&[429])),
    ];

    static ref EXPLICIT_RETRY_HINT: Regex = Regex::new(
        r"(?i)(?:retry|wait|try\s+again)\D{0,20}?(\d+)\s*(seconds?|secs?|minutes?|mins?|hours?)\b"
    )
    .expect("retry hint pattern is valid");

    static ref BARE_DURATION_HINT: Regex =
        Regex::new(r"(?i)\b(\d+)\s*(seconds?|secs?|minutes?|mins?|hours?)\b")
            .expect("duration hint pattern is valid");
}

/// Classify an application-level upstream response.
pub fn classify(http_status: u16, message: &str) -> ClassifiedError {
    let kind = RULES
        .iter()
        .find(|rule| rule.matches(http_status, message))
        .map_or(ErrorKind::Unknown, |rule| rule.kind);

    let mut error = ClassifiedError::new(kind, Some(http_status), message.trim());
    if kind.is_rate_limit() {
        if let Some(hint) = retry_hint(message) {
            error = error.with_retry_after(hint);
        }
    }

    tracing::debug!(
        status = http_status,
        kind = %kind,
        retry_after_ms = error.retry_after.as_millis() as u64,
        "classified upstream failure"
    );
    error
}

/// Classify a failure that happened before any response arrived.
pub fn classify_transport(error: &TransportError) -> ClassifiedError {
    let classified = ClassifiedError::new(
        ErrorKind::TransportFailure,
        None,
        format!("transport error: {}", error.message()),
    );
    if error.retryable() {
        classified
    } else {
        classified.non_retryable()
    }
}

fn retry_hint(message: &str) -> Option<Duration> {
    let captures = EXPLICIT_RETRY_HINT
        .captures(message)
        .or_else(|| BARE_DURATION_HINT.captures(message))?;
    let amount: u64 = captures.get(1)?.as_str().parse().ok()?;
    let unit = captures.get(2)?.as_str().to_ascii_lowercase();

    let seconds = if unit.starts_with('h') {
        amount.checked_mul(3_600)?
    } else if unit.starts_with('m') {
        amount.checked_mul(60)?
    } else {
        amount
    };
    Some(Duration::from_secs(seconds))
}

fn serialize_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}
