//! # Leadgate Core
//!
//! Compliance-aware, rate-limited access to a third-party lead API.
//!
//! ## Overview
//!
//! The upstream enforces a minimum interval between calls, per-minute and
//! per-hour ceilings, temporary key suspension, and a bounded query period.
//! This crate decides whether a request may go out at all, whether a cached
//! response can answer it, and how to react when the upstream refuses it:
//!
//! - **Compliance validation** of requested date ranges
//! - **Response cache** with LRU eviction and per-entry TTL
//! - **Rate limiter** with sliding windows and an explicit block timer
//! - **Error classification** into a closed taxonomy with retry guidance
//! - **Access gateway** composing all of the above around a transport
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | In-memory response cache |
//! | [`classifier`] | Upstream failure taxonomy |
//! | [`clock`] | Injectable time source |
//! | [`compliance`] | Date-range rules |
//! | [`domain`] | Timestamps and date ranges |
//! | [`error`] | Core error types |
//! | [`gateway`] | Access orchestrator |
//! | [`persistence`] | Rate-limit state stores |
//! | [`policy`] | Upstream policy and environment configuration |
//! | [`rate_limiter`] | Sliding-window limiter and block state machine |
//! | [`retry`] | Backoff policy |
//! | [`transport`] | Upstream transport abstraction |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use leadgate_core::{AccessGateway, DateRange, LeadQuery, ReqwestTransport, UpstreamPolicy};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = ReqwestTransport::new("https://leads.example.com/v1/leads")
//!         .with_api_key(std::env::var("LEADGATE_API_KEY")?);
//!     let gateway = AccessGateway::new(transport, UpstreamPolicy::from_env()?);
//!
//!     let range = DateRange::from_rfc3339(Some("2024-03-01T00:00:00Z"), Some("2024-03-07T00:00:00Z"));
//!     let leads = gateway.check_and_call(&LeadQuery::new(range)).await?;
//!     println!("{}", leads.payload);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  CLI / Caller   │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Access Gateway  │────▶│ Compliance Rules │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ├─────────────▶ Response Cache
//!          │
//!          ├─────────────▶ Rate Limiter ───▶ RateLimitStore
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Transport       │────▶│ Error Classifier │
//! │ (reqwest/fn)    │     │ + Retry Policy   │
//! └─────────────────┘     └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Every failure surfaced by the gateway maps onto one [`ErrorKind`]:
//!
//! ```rust
//! use leadgate_core::{AccessError, ErrorKind};
//!
//! fn handle_error(error: &AccessError) {
//!     let classified = error.classified();
//!     match classified.kind() {
//!         ErrorKind::RateLimitShort | ErrorKind::RateLimitBlocked => {
//!             // Wait `classified.retry_after()` and try again
//!         }
//!         ErrorKind::InvalidCredential | ErrorKind::CredentialExpired => {
//!             // Fix configuration
//!         }
//!         _ => {}
//!     }
//! }
//! ```

pub mod cache;
pub mod classifier;
pub mod clock;
pub mod compliance;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod persistence;
pub mod policy;
pub mod rate_limiter;
pub mod retry;
pub mod transport;

// Caching
pub use cache::{cache_key, CacheMode, CacheStats, ResponseCache};

// Error classification
pub use classifier::{classify, classify_transport, ClassifiedError, ErrorKind};

// Time
pub use clock::{Clock, MockClock, SystemClock};

// Compliance
pub use compliance::{ComplianceLimits, ComplianceResult, Violation, ViolationKind};

// Domain types
pub use domain::{DateRange, UtcDateTime};

// Error types
pub use error::{CoreError, ValidationError};

// Gateway
pub use gateway::{AccessError, AccessGateway, AccessSuccess, LeadQuery};

// Persistence
pub use persistence::{
    CallRecord, JsonFileStore, MemoryStore, RateLimitSnapshot, RateLimitStore, StoreError,
};

// Policy and configuration
pub use policy::{ConnectionSettings, UpstreamPolicy};

// Rate limiting
pub use rate_limiter::{
    BlockState, CallPermit, DenyReason, RateLimitConfig, RateLimitDecision, RateLimitStatus,
    RateLimiter,
};

// Retry logic
pub use retry::RetryPolicy;

// Transport
pub use transport::{
    FnTransport, NoopTransport, ReqwestTransport, Transport, TransportError, TransportRequest,
    TransportResponse,
};
