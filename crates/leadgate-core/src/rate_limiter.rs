//! Call-cadence limiter and blocking state machine.
//!
//! ```text
//!            hourly ceiling crossed / upstream suspension
//!   ALLOWED ───────────────────────────────────────────▶ BLOCKED
//!      ▲                                                    │
//!      └───────────── now >= blocked_until ─────────────────┘
//! ```
//!
//! Independently of the block, every admission check enforces a minimum
//! interval since the last call and per-minute / per-hour sliding-window
//! ceilings. A window of length W covers `(now - W, now]`, so a call exactly
//! W old no longer counts. History older than the retention window is pruned
//! on each check; nothing runs in the background.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use crate::persistence::{CallRecord, RateLimitSnapshot, RateLimitStore, StoreError};
use crate::UtcDateTime;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3_600);

/// Upstream call-cadence limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub min_interval: Duration,
    pub max_per_minute: u32,
    pub max_per_hour: u32,
    /// Penalty applied when the hourly ceiling is crossed.
    pub block_duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(300),
            max_per_minute: 1,
            max_per_hour: 12,
            block_duration: Duration::from_secs(900),
        }
    }
}

impl RateLimitConfig {
    fn retention(&self) -> Duration {
        HOUR.max(self.min_interval)
    }
}

/// Why the limiter refused a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    Blocked,
    MinInterval,
    PerMinute,
    HourlyLimit,
}

impl DenyReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Blocked => "blocked",
            Self::MinInterval => "min_interval",
            Self::PerMinute => "per_minute",
            Self::HourlyLimit => "hourly_limit",
        }
    }

    /// True for denials that put or keep the limiter in the BLOCKED state.
    pub const fn is_block(self) -> bool {
        matches!(self, Self::Blocked | Self::HourlyLimit)
    }
}

impl Display for DenyReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub reason: Option<DenyReason>,
    #[serde(rename = "retry_after_ms", serialize_with = "serialize_millis")]
    pub retry_after: Duration,
}

impl RateLimitDecision {
    pub const fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            retry_after: Duration::ZERO,
        }
    }

    pub const fn deny(reason: DenyReason, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            retry_after,
        }
    }

    pub fn message(&self) -> String {
        let wait = self.retry_after.as_secs_f64();
        match self.reason {
            None => String::from("call allowed"),
            Some(DenyReason::Blocked) => {
                format!("upstream access is blocked; retry in {wait:.0}s")
            }
            Some(DenyReason::MinInterval) => {
                format!("minimum interval between calls not reached; retry in {wait:.0}s")
            }
            Some(DenyReason::PerMinute) => {
                format!("per-minute call limit reached; retry in {wait:.0}s")
            }
            Some(DenyReason::HourlyLimit) => {
                format!("hourly call limit reached, access blocked; retry in {wait:.0}s")
            }
        }
    }
}

/// Raw block timer as stored by the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockState {
    pub is_blocked: bool,
    pub blocked_until: Option<UtcDateTime>,
}

/// Operator-facing view of the limiter at a given instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub blocked: bool,
    pub blocked_until: Option<UtcDateTime>,
    pub last_call: Option<UtcDateTime>,
    pub calls_last_minute: u32,
    pub calls_last_hour: u32,
    pub remaining_minute: u32,
    pub remaining_hour: u32,
    pub next_call_reason: Option<DenyReason>,
    #[serde(rename = "next_call_in_ms", serialize_with = "serialize_millis")]
    pub next_call_in: Duration,
    pub recorded_successes: u32,
    pub recorded_failures: u32,
}

#[derive(Debug, Default)]
struct LimiterState {
    calls: VecDeque<CallRecord>,
    blocked_until: Option<UtcDateTime>,
    /// Calls before this instant no longer count toward re-entering BLOCKED.
    hourly_floor: Option<UtcDateTime>,
    /// Admitted calls still in flight, keyed by permit id.
    pending: BTreeMap<u64, UtcDateTime>,
    next_permit: u64,
    generation: u64,
}

impl LimiterState {
    fn from_snapshot(snapshot: RateLimitSnapshot) -> Self {
        let mut calls = snapshot.calls;
        calls.sort_by_key(|record| record.at);
        Self {
            calls: calls.into(),
            blocked_until: snapshot.blocked_until,
            hourly_floor: snapshot.hourly_floor,
            ..Self::default()
        }
    }

    fn snapshot(&self) -> RateLimitSnapshot {
        RateLimitSnapshot {
            calls: self.calls.iter().copied().collect(),
            blocked_until: self.blocked_until,
            hourly_floor: self.hourly_floor,
        }
    }

    fn prune(&mut self, now: UtcDateTime, retention: Duration) -> bool {
        let before = self.calls.len();
        self.calls
            .retain(|record| now.saturating_duration_since(record.at) < retention);
        let mut changed = before != self.calls.len();

        if self
            .hourly_floor
            .is_some_and(|floor| now.saturating_duration_since(floor) >= retention)
        {
            self.hourly_floor = None;
            changed = true;
        }
        changed
    }

    /// Instants of recorded and in-flight calls, minus the permit `exclude`.
    fn admitted(&self, exclude: Option<u64>) -> impl Iterator<Item = UtcDateTime> + '_ {
        self.calls.iter().map(|record| record.at).chain(
            self.pending
                .iter()
                .filter(move |(id, _)| Some(**id) != exclude)
                .map(|(_, at)| *at),
        )
    }

    fn count_within(&self, now: UtcDateTime, window: Duration, exclude: Option<u64>) -> u32 {
        let count = self
            .admitted(exclude)
            .filter(|at| now.saturating_duration_since(*at) < window)
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Hourly count that can still trigger a block: calls made before the
    /// last block lapsed were already paid for by that block.
    fn count_toward_block(&self, now: UtcDateTime, exclude: Option<u64>) -> u32 {
        let count = self
            .admitted(exclude)
            .filter(|at| now.saturating_duration_since(*at) < HOUR)
            .filter(|at| self.hourly_floor.map_or(true, |floor| *at >= floor))
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    fn oldest_within(
        &self,
        now: UtcDateTime,
        window: Duration,
        exclude: Option<u64>,
    ) -> Option<UtcDateTime> {
        self.admitted(exclude)
            .filter(|at| now.saturating_duration_since(*at) < window)
            .min()
    }

    fn last_call(&self, exclude: Option<u64>) -> Option<UtcDateTime> {
        self.admitted(exclude).max()
    }

    fn active_block(&self, now: UtcDateTime) -> Option<UtcDateTime> {
        self.blocked_until.filter(|until| now < *until)
    }
}

type Checkpoint = Option<(u64, RateLimitSnapshot)>;

/// Thread-safe sliding-window rate limiter with an explicit block timer.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
    store: Option<Arc<dyn RateLimitStore>>,
    /// Generation of the last snapshot written to `store`.
    store_gate: Mutex<u64>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState::default()),
            store: None,
            store_gate: Mutex::new(0),
        }
    }

    /// Create a limiter whose history is loaded from and saved to `store`.
    pub fn with_store(
        config: RateLimitConfig,
        store: Arc<dyn RateLimitStore>,
    ) -> Result<Self, StoreError> {
        let state = store
            .load()?
            .map(LimiterState::from_snapshot)
            .unwrap_or_default();
        tracing::debug!(
            calls = state.calls.len(),
            blocked_until = ?state.blocked_until,
            "loaded rate-limit state"
        );

        Ok(Self {
            config,
            state: Mutex::new(state),
            store: Some(store),
            store_gate: Mutex::new(0),
        })
    }

    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admission check. A denial never counts toward quota.
    pub fn can_call(&self, now: UtcDateTime) -> RateLimitDecision {
        let (decision, checkpoint) = {
            let mut state = self.lock();
            self.admit(&mut state, now, None)
        };
        self.persist(checkpoint);
        decision
    }

    /// Admission check that, when allowed, reserves the call slot until the
    /// returned permit is completed or dropped.
    ///
    /// While a permit is outstanding its call counts toward the minimum
    /// interval and both windows, so concurrent callers cannot all be
    /// admitted before any of them is recorded.
    pub fn acquire(&self, now: UtcDateTime) -> Result<CallPermit<'_>, RateLimitDecision> {
        let (result, checkpoint) = {
            let mut state = self.lock();
            let (decision, checkpoint) = self.admit(&mut state, now, None);
            let result = if decision.allowed {
                let id = state.next_permit;
                state.next_permit += 1;
                state.pending.insert(id, now);
                Ok(CallPermit {
                    limiter: self,
                    id,
                    settled: false,
                })
            } else {
                Err(decision)
            };
            (result, checkpoint)
        };
        self.persist(checkpoint);
        result
    }

    /// Record a call that reached the upstream.
    pub fn record_call(&self, now: UtcDateTime, success: bool) {
        let checkpoint = {
            let mut state = self.lock();
            self.push_record(&mut state, now, success);
            self.checkpoint(&mut state)
        };
        self.persist(checkpoint);
    }

    /// Enter (or extend) the BLOCKED state until `until`.
    pub fn block_until(&self, until: UtcDateTime) {
        let checkpoint = {
            let mut state = self.lock();
            let until = state.blocked_until.map_or(until, |current| current.max(until));
            state.blocked_until = Some(until);
            tracing::warn!(blocked_until = %until, "upstream access blocked");
            self.checkpoint(&mut state)
        };
        self.persist(checkpoint);
    }

    /// Forget all history and any active block.
    pub fn reset(&self) {
        let checkpoint = {
            let mut state = self.lock();
            let generation = state.generation;
            *state = LimiterState {
                generation,
                ..LimiterState::default()
            };
            tracing::info!("rate limiter reset");
            self.checkpoint(&mut state)
        };
        self.persist(checkpoint);
    }

    pub fn block_state(&self) -> BlockState {
        let state = self.lock();
        BlockState {
            is_blocked: state.blocked_until.is_some(),
            blocked_until: state.blocked_until,
        }
    }

    /// Snapshot of counters as seen at `now`. Does not mutate state.
    pub fn status(&self, now: UtcDateTime) -> RateLimitStatus {
        let state = self.lock();
        let calls_last_minute = state.count_within(now, MINUTE, None);
        let calls_last_hour = state.count_within(now, HOUR, None);
        let next = self.evaluate(&state, now, None);
        let active_block = state.active_block(now);
        let recorded_successes = state.calls.iter().filter(|record| record.success).count();
        let recorded_failures = state.calls.len() - recorded_successes;

        RateLimitStatus {
            blocked: active_block.is_some(),
            blocked_until: active_block,
            last_call: state.last_call(None),
            calls_last_minute,
            calls_last_hour,
            remaining_minute: self.config.max_per_minute.saturating_sub(calls_last_minute),
            remaining_hour: self.config.max_per_hour.saturating_sub(calls_last_hour),
            next_call_reason: next.reason,
            next_call_in: next.retry_after,
            recorded_successes: u32::try_from(recorded_successes).unwrap_or(u32::MAX),
            recorded_failures: u32::try_from(recorded_failures).unwrap_or(u32::MAX),
        }
    }

    /// Prune, lapse an expired block, evaluate, and enter BLOCKED when the
    /// hourly ceiling is crossed.
    fn admit(
        &self,
        state: &mut LimiterState,
        now: UtcDateTime,
        exclude: Option<u64>,
    ) -> (RateLimitDecision, Checkpoint) {
        let mut dirty = state.prune(now, self.config.retention());

        if let Some(until) = state.blocked_until {
            if now >= until {
                state.blocked_until = None;
                state.hourly_floor = Some(until);
                dirty = true;
                tracing::info!(blocked_until = %until, "rate-limit block expired");
            }
        }

        let decision = self.evaluate(state, now, exclude);
        if decision.reason == Some(DenyReason::HourlyLimit) {
            let until = now.saturating_add(self.config.block_duration);
            state.blocked_until = Some(until);
            dirty = true;
            tracing::warn!(
                blocked_until = %until,
                max_per_hour = self.config.max_per_hour,
                "hourly call limit crossed; blocking upstream access"
            );
        } else if let Some(reason) = decision.reason {
            tracing::debug!(
                %reason,
                retry_after_ms = decision.retry_after.as_millis() as u64,
                "rate limiter denied call"
            );
        }

        let checkpoint = if dirty { self.checkpoint(state) } else { None };
        (decision, checkpoint)
    }

    fn evaluate(
        &self,
        state: &LimiterState,
        now: UtcDateTime,
        exclude: Option<u64>,
    ) -> RateLimitDecision {
        if let Some(until) = state.active_block(now) {
            return RateLimitDecision::deny(
                DenyReason::Blocked,
                until.saturating_duration_since(now),
            );
        }

        if let Some(last) = state.last_call(exclude) {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.config.min_interval {
                return RateLimitDecision::deny(
                    DenyReason::MinInterval,
                    self.config.min_interval - elapsed,
                );
            }
        }

        if state.count_within(now, MINUTE, exclude) >= self.config.max_per_minute {
            let retry_after = state
                .oldest_within(now, MINUTE, exclude)
                .map_or(MINUTE, |oldest| {
                    MINUTE.saturating_sub(now.saturating_duration_since(oldest))
                });
            return RateLimitDecision::deny(DenyReason::PerMinute, retry_after);
        }

        if state.count_toward_block(now, exclude) >= self.config.max_per_hour {
            return RateLimitDecision::deny(DenyReason::HourlyLimit, self.config.block_duration);
        }

        RateLimitDecision::allow()
    }

    fn push_record(&self, state: &mut LimiterState, now: UtcDateTime, success: bool) {
        state.prune(now, self.config.retention());
        state.calls.push_back(CallRecord { at: now, success });
        tracing::debug!(success, calls_retained = state.calls.len(), "recorded upstream call");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LimiterState> {
        self.state
            .lock()
            .expect("rate limiter lock is not poisoned")
    }

    /// Stamp the current state for saving once the state lock is released.
    fn checkpoint(&self, state: &mut LimiterState) -> Checkpoint {
        self.store.as_ref()?;
        state.generation += 1;
        Some((state.generation, state.snapshot()))
    }

    /// Saves outside the state lock. Snapshots older than the last one
    /// written are skipped, so concurrent saves never move the store back.
    fn persist(&self, checkpoint: Checkpoint) {
        let (Some(store), Some((generation, snapshot))) = (&self.store, checkpoint) else {
            return;
        };
        let mut written = self
            .store_gate
            .lock()
            .expect("rate limiter store gate is not poisoned");
        if generation <= *written {
            return;
        }
        match store.save(&snapshot) {
            Ok(()) => *written = generation,
            Err(error) => tracing::warn!(%error, "failed to persist rate-limit state"),
        }
    }
}

/// Reservation of one admitted upstream call.
///
/// Complete it with the outcome once the call finishes. Dropping it without
/// completing releases the slot and records nothing.
#[derive(Debug)]
pub struct CallPermit<'a> {
    limiter: &'a RateLimiter,
    id: u64,
    settled: bool,
}

impl CallPermit<'_> {
    /// Admission check for a retry of this call. The reservation itself is
    /// not counted against the retry.
    pub fn recheck(&self, now: UtcDateTime) -> RateLimitDecision {
        let (decision, checkpoint) = {
            let mut state = self.limiter.lock();
            self.limiter.admit(&mut state, now, Some(self.id))
        };
        self.limiter.persist(checkpoint);
        decision
    }

    /// Replace the reservation with a recorded call.
    pub fn complete(mut self, now: UtcDateTime, success: bool) {
        self.settled = true;
        let checkpoint = {
            let mut state = self.limiter.lock();
            state.pending.remove(&self.id);
            self.limiter.push_record(&mut state, now, success);
            self.limiter.checkpoint(&mut state)
        };
        self.limiter.persist(checkpoint);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.limiter.lock().pending.remove(&self.id);
            tracing::debug!(permit = self.id, "released unused call reservation");
        }
    }
}

fn serialize_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}
