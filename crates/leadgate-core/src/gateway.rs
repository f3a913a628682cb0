//! Access orchestrator composing compliance, cache, rate limiting and retry
//! around a [`Transport`].
//!
//! Per logical request:
//!
//! 1. validate the date range; violations never reach the cache, the limiter
//!    or the network
//! 2. serve from cache when the mode allows it (cached reads are free)
//! 3. ask the rate limiter for admission
//! 4. call the transport, classifying and retrying failures with backoff
//!    (each retry goes back through admission)
//! 5. cache and record the outcome once
//!
//! Dropping the returned future cancels the request; nothing is recorded or
//! cached for a request that did not complete.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::cache::{cache_key, CacheMode, CacheStats, ResponseCache};
use crate::classifier::{classify, classify_transport, ClassifiedError, ErrorKind};
use crate::clock::{Clock, SystemClock};
use crate::compliance::{ComplianceLimits, ComplianceResult, ViolationKind};
use crate::domain::DateRange;
use crate::error::ValidationError;
use crate::policy::UpstreamPolicy;
use crate::rate_limiter::{RateLimitDecision, RateLimitStatus, RateLimiter};
use crate::retry::RetryPolicy;
use crate::transport::{Transport, TransportRequest};

const CACHE_NAMESPACE: &str = "leads";

/// One logical request for a page of leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeadQuery {
    pub range: DateRange,
    pub page: u32,
    pub cache_mode: CacheMode,
}

impl LeadQuery {
    pub const fn new(range: DateRange) -> Self {
        Self {
            range,
            page: 1,
            cache_mode: CacheMode::Use,
        }
    }

    pub const fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub const fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    pub const fn request(&self) -> TransportRequest {
        TransportRequest::new(self.range, self.page)
    }

    pub fn cache_key(&self) -> String {
        cache_key(CACHE_NAMESPACE, self.request().cache_params())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessSuccess {
    pub payload: Value,
    pub from_cache: bool,
    /// Transport attempts made; zero for cache hits.
    pub attempts: u32,
}

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("date range rejected: {}", .result.summary())]
    Compliance { result: ComplianceResult },

    #[error("{}", .decision.message())]
    RateLimited {
        error: ClassifiedError,
        decision: RateLimitDecision,
    },

    #[error("upstream request failed after {attempts} attempt(s): {error}")]
    Upstream { error: ClassifiedError, attempts: u32 },
}

impl AccessError {
    /// The failure expressed in the upstream error taxonomy.
    pub fn classified(&self) -> ClassifiedError {
        match self {
            Self::Compliance { result } => {
                ClassifiedError::new(compliance_error_kind(result), None, result.summary())
            }
            Self::RateLimited { error, .. } | Self::Upstream { error, .. } => error.clone(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Compliance { result } => compliance_error_kind(result),
            Self::RateLimited { error, .. } | Self::Upstream { error, .. } => error.kind(),
        }
    }

    pub fn retryable(&self) -> bool {
        match self {
            Self::Compliance { .. } => false,
            Self::RateLimited { error, .. } | Self::Upstream { error, .. } => error.retryable(),
        }
    }
}

fn compliance_error_kind(result: &ComplianceResult) -> ErrorKind {
    if result.has(ViolationKind::MissingBound) {
        ErrorKind::MissingParameters
    } else if result.has(ViolationKind::InvertedRange) || result.has(ViolationKind::FutureEnd) {
        ErrorKind::MalformedDate
    } else {
        ErrorKind::RangeTooLarge
    }
}

fn rate_limited_error(decision: &RateLimitDecision) -> ClassifiedError {
    let kind = match decision.reason {
        Some(reason) if reason.is_block() => ErrorKind::RateLimitBlocked,
        _ => ErrorKind::RateLimitShort,
    };
    ClassifiedError::new(kind, None, decision.message()).with_retry_after(decision.retry_after)
}

/// Compliance-aware, rate-limited access to the upstream lead API.
#[derive(Debug)]
pub struct AccessGateway<T> {
    transport: T,
    limits: ComplianceLimits,
    retry: RetryPolicy,
    cache: ResponseCache<Value>,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
}

impl<T: Transport> AccessGateway<T> {
    pub fn new(transport: T, policy: UpstreamPolicy) -> Self {
        Self::with_clock(transport, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(transport: T, policy: UpstreamPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            transport,
            limits: policy.compliance,
            retry: policy.retry,
            cache: ResponseCache::with_clock(policy.cache_capacity, policy.cache_ttl, clock.clone()),
            limiter: Arc::new(RateLimiter::new(policy.rate_limit)),
            clock,
        }
    }

    /// Replace the rate limiter, e.g. with one backed by a persistent store
    /// or shared with another gateway.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn validate(&self, range: &DateRange) -> ComplianceResult {
        self.limits.validate(range, self.clock.now())
    }

    pub async fn check_and_call(&self, query: &LeadQuery) -> Result<AccessSuccess, AccessError> {
        let compliance = self.validate(&query.range);
        if !compliance.valid {
            tracing::warn!(violations = %compliance.summary(), "rejected non-compliant date range");
            return Err(AccessError::Compliance { result: compliance });
        }

        let request = query.request();
        let key = query.cache_key();
        if query.cache_mode.reads() {
            if let Some(payload) = self.cache.get(&key).await {
                tracing::debug!(%key, "served from cache");
                return Ok(AccessSuccess {
                    payload,
                    from_cache: true,
                    attempts: 0,
                });
            }
        }

        let permit = match self.limiter.acquire(self.clock.now()) {
            Ok(permit) => permit,
            Err(decision) => return Err(Self::denied(decision, 0)),
        };

        let mut attempts = 0_u32;
        loop {
            if attempts > 0 {
                let decision = permit.recheck(self.clock.now());
                if !decision.allowed {
                    permit.complete(self.clock.now(), false);
                    return Err(Self::denied(decision, attempts));
                }
            }

            attempts += 1;
            let error = match self.transport.send(request).await {
                Ok(response) if response.is_success() => {
                    if query.cache_mode.writes() {
                        self.cache.set(key.as_str(), response.body.clone(), None).await;
                    }
                    permit.complete(self.clock.now(), true);
                    tracing::info!(page = query.page, attempts, "upstream call succeeded");
                    return Ok(AccessSuccess {
                        payload: response.body,
                        from_cache: false,
                        attempts,
                    });
                }
                Ok(response) => classify(response.status, &response.error_message()),
                Err(error) => classify_transport(&error),
            };

            if error.kind() == ErrorKind::RateLimitBlocked {
                self.limiter
                    .block_until(self.clock.now().saturating_add(error.retry_after()));
            }

            // An upstream wait longer than the backoff cap cannot be honored
            // within this request.
            let honorable = error.retry_after() <= self.retry.max_delay;
            if !(honorable && self.retry.should_retry(&error, attempts)) {
                permit.complete(self.clock.now(), false);
                tracing::warn!(kind = %error.kind(), attempts, "upstream call failed");
                return Err(AccessError::Upstream { error, attempts });
            }

            let delay = self.retry.retry_delay(&error, attempts);
            tracing::warn!(
                kind = %error.kind(),
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "retrying upstream call"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn denied(decision: RateLimitDecision, attempts: u32) -> AccessError {
        tracing::warn!(
            reason = ?decision.reason,
            retry_after_ms = decision.retry_after.as_millis() as u64,
            attempts,
            "call denied by rate limiter"
        );
        AccessError::RateLimited {
            error: rate_limited_error(&decision),
            decision,
        }
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub fn rate_limit_status(&self) -> RateLimitStatus {
        self.limiter.status(self.clock.now())
    }

    /// Remove cached responses whose key matches a glob, or all of them.
    pub async fn invalidate_cache(&self, pattern: Option<&str>) -> Result<usize, ValidationError> {
        self.cache.invalidate(pattern).await
    }

    pub fn reset_rate_limiter(&self) {
        self.limiter.reset();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::clock::MockClock;
    use crate::rate_limiter::RateLimitConfig;
    use crate::transport::{FnTransport, TransportError, TransportResponse};
    use crate::UtcDateTime;

    fn now() -> UtcDateTime {
        UtcDateTime::parse("2024-06-15T12:00:00Z").expect("valid timestamp")
    }

    fn day_range() -> DateRange {
        DateRange::ending_at(now(), Duration::from_secs(86_400))
    }

    /// Transport replaying `responses` in order, repeating the last one.
    fn scripted(
        responses: Vec<Result<TransportResponse, TransportError>>,
    ) -> (impl Transport, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let responses = Arc::new(responses);
        let transport = FnTransport::new(move |_request: TransportRequest| {
            let index = counter.fetch_add(1, Ordering::SeqCst) as usize;
            let response = responses[index.min(responses.len() - 1)].clone();
            async move { response }
        });
        (transport, calls)
    }

    fn gateway<T: Transport>(transport: T) -> AccessGateway<T> {
        AccessGateway::with_clock(
            transport,
            UpstreamPolicy::default(),
            Arc::new(MockClock::new(now())),
        )
    }

    #[tokio::test]
    async fn non_compliant_range_never_reaches_transport() {
        let (transport, calls) = scripted(vec![Ok(TransportResponse::ok(json!([])))]);
        let gateway = gateway(transport);
        let inverted = DateRange::new(now(), now().checked_sub(Duration::from_secs(60)).expect("in range"));

        let error = gateway
            .check_and_call(&LeadQuery::new(inverted))
            .await
            .expect_err("inverted range");

        assert!(matches!(error, AccessError::Compliance { .. }));
        assert_eq!(error.kind(), ErrorKind::MalformedDate);
        assert!(!error.retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(gateway.rate_limit_status().recorded_failures, 0);
        assert_eq!(gateway.cache_stats().await.misses, 0);
    }

    #[tokio::test]
    async fn success_is_cached_and_counted_once() {
        let (transport, calls) = scripted(vec![Ok(TransportResponse::ok(json!([{"id": 1}])))]);
        let gateway = gateway(transport);
        let query = LeadQuery::new(day_range());

        let first = gateway.check_and_call(&query).await.expect("first call");
        let second = gateway.check_and_call(&query).await.expect("cached call");

        assert!(!first.from_cache);
        assert_eq!(first.attempts, 1);
        assert!(second.from_cache);
        assert_eq!(second.payload, json!([{"id": 1}]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.rate_limit_status().recorded_successes, 1);
    }

    #[tokio::test]
    async fn bypass_is_denied_by_min_interval() {
        let (transport, calls) = scripted(vec![Ok(TransportResponse::ok(json!([])))]);
        let gateway = gateway(transport);
        let query = LeadQuery::new(day_range()).with_cache_mode(CacheMode::Bypass);

        gateway.check_and_call(&query).await.expect("first call");
        let error = gateway.check_and_call(&query).await.expect_err("too soon");

        assert_eq!(error.kind(), ErrorKind::RateLimitShort);
        assert!(error.retryable());
        assert_eq!(error.classified().retry_after(), Duration::from_secs(300));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.cache_stats().await.size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failure_is_retried_until_success() {
        let (transport, calls) = scripted(vec![
            Ok(TransportResponse::new(503, json!({"message": "Service Unavailable"}))),
            Err(TransportError::new("connection reset")),
            Ok(TransportResponse::ok(json!(["lead"]))),
        ]);
        let gateway = gateway(transport);

        let success = gateway
            .check_and_call(&LeadQuery::new(day_range()))
            .await
            .expect("third attempt succeeds");

        assert_eq!(success.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let status = gateway.rate_limit_status();
        assert_eq!(status.recorded_successes, 1);
        assert_eq!(status.recorded_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_record_one_failure() {
        let (transport, calls) = scripted(vec![Ok(TransportResponse::new(
            500,
            json!({"error": "internal"}),
        ))]);
        let gateway = gateway(transport);

        let error = gateway
            .check_and_call(&LeadQuery::new(day_range()))
            .await
            .expect_err("always failing");

        match error {
            AccessError::Upstream { error, attempts } => {
                assert_eq!(error.kind(), ErrorKind::UpstreamInternal);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(gateway.rate_limit_status().recorded_failures, 1);
    }

    #[tokio::test]
    async fn terminal_failure_is_not_retried() {
        let (transport, calls) = scripted(vec![Ok(TransportResponse::new(
            401,
            json!({"message": "incorrect"}),
        ))]);
        let gateway = gateway(transport);

        let error = gateway
            .check_and_call(&LeadQuery::new(day_range()))
            .await
            .expect_err("bad credentials");

        assert_eq!(error.kind(), ErrorKind::InvalidCredential);
        assert!(!error.retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn upstream_block_blocks_the_limiter() {
        let (transport, calls) = scripted(vec![Ok(TransportResponse::new(
            429,
            json!({"message": "API key blocked for 15 minutes"}),
        ))]);
        let gateway = gateway(transport);
        let query = LeadQuery::new(day_range());

        let error = gateway.check_and_call(&query).await.expect_err("blocked");
        assert_eq!(error.kind(), ErrorKind::RateLimitBlocked);

        let status = gateway.rate_limit_status();
        assert!(status.blocked);
        assert_eq!(
            status.blocked_until,
            now().checked_add(Duration::from_secs(900))
        );

        let denied = gateway.check_and_call(&query).await.expect_err("still blocked");
        assert!(matches!(denied, AccessError::RateLimited { .. }));
        assert_eq!(denied.kind(), ErrorKind::RateLimitBlocked);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reset_and_invalidate_restore_fresh_state() {
        let (transport, calls) = scripted(vec![Ok(TransportResponse::ok(json!([])))]);
        let gateway = AccessGateway::with_clock(
            transport,
            UpstreamPolicy {
                rate_limit: RateLimitConfig {
                    max_per_hour: 1,
                    ..RateLimitConfig::default()
                },
                ..UpstreamPolicy::default()
            },
            Arc::new(MockClock::new(now())),
        );
        let query = LeadQuery::new(day_range());

        gateway.check_and_call(&query).await.expect("first call");
        assert_eq!(gateway.invalidate_cache(Some("leads?*")).await, Ok(1));
        assert!(gateway.check_and_call(&query).await.is_err());

        gateway.reset_rate_limiter();
        gateway.check_and_call(&query).await.expect("allowed after reset");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn compliance_errors_map_to_caller_kinds() {
        let gateway = gateway(crate::transport::NoopTransport);

        let missing = gateway.validate(&DateRange::from_bounds(None, Some(now())));
        assert_eq!(compliance_error_kind(&missing), ErrorKind::MissingParameters);

        let too_long = gateway.validate(&DateRange::ending_at(now(), Duration::from_secs(30 * 86_400)));
        let error = AccessError::Compliance { result: too_long };
        assert_eq!(error.classified().kind(), ErrorKind::RangeTooLarge);
        assert!(!error.classified().retryable());
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_admission_slot() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let transport = FnTransport::new(move |_request: TransportRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::task::yield_now().await;
                Ok::<_, TransportError>(TransportResponse::ok(json!([])))
            }
        });
        let gateway = gateway(transport);
        let first_page = LeadQuery::new(day_range());
        let second_page = LeadQuery::new(day_range()).with_page(2);

        let (first, second) = tokio::join!(
            gateway.check_and_call(&first_page),
            gateway.check_and_call(&second_page)
        );

        let (admitted, denied): (Vec<_>, Vec<_>) =
            [first, second].into_iter().partition(Result::is_ok);
        assert_eq!(admitted.len(), 1);
        let error = denied
            .into_iter()
            .find_map(Result::err)
            .expect("one caller waits for the min interval");
        assert_eq!(error.kind(), ErrorKind::RateLimitShort);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let status = gateway.rate_limit_status();
        assert_eq!(status.recorded_successes, 1);
        assert_eq!(status.recorded_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_denied_by_limiter_records_one_failure() {
        let limiter = Arc::new(RateLimiter::default());
        let blocker = Arc::clone(&limiter);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        // Another client suspends access while the first attempt is in flight.
        let transport = FnTransport::new(move |_request: TransportRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            blocker.block_until(now().saturating_add(Duration::from_secs(600)));
            async {
                Ok::<_, TransportError>(TransportResponse::new(
                    503,
                    json!({"message": "Service Unavailable"}),
                ))
            }
        });
        let gateway = gateway(transport).with_rate_limiter(Arc::clone(&limiter));

        let error = gateway
            .check_and_call(&LeadQuery::new(day_range()))
            .await
            .expect_err("retry is blocked");

        match &error {
            AccessError::RateLimited { decision, .. } => {
                assert_eq!(decision.reason, Some(crate::rate_limiter::DenyReason::Blocked));
                assert_eq!(decision.retry_after, Duration::from_secs(600));
            }
            other => panic!("expected a rate-limit denial, got {other:?}"),
        }
        assert_eq!(error.kind(), ErrorKind::RateLimitBlocked);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let status = limiter.status(now());
        assert_eq!(status.recorded_failures, 1);
        assert_eq!(status.recorded_successes, 0);
        assert!(status.blocked);
    }
}
