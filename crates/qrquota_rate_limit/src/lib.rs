//! Tiered multi-window quota enforcement.
//!
//! Every metered request is checked against its subscription tier's budget
//! in several fixed UTC windows at once (minute, hour, day, month). Counters
//! live in a [`CounterStore`](qrquota_store::CounterStore); the only
//! synchronization is the store's atomic increment.
//!
//! ## Components
//!
//! - [`TierPolicyTable`] - tier name to window limits, loaded once
//! - [`evaluate`] - pure allow/deny over post-increment counts
//! - [`RateLimiter`] - increments, evaluates, applies the counting policy
//! - [`EnforcementGate`] - verdicts and rate-limit header metadata
//! - [`QuotaConfig`] - TOML configuration with user overrides
//!
//! ## Failure policy
//!
//! Every internal fault fails closed. Unknown tiers and unreachable or slow
//! stores deny the request with a reason that keeps them apart from quota
//! exhaustion, so callers can answer "retry shortly" instead of "over quota".

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod evaluator;
mod gate;
mod limiter;
mod tiers;

pub use config::{
    CountingPolicy, LimiterConfig, QuotaConfig, ServerConfig, StoreBackend, StoreConfig,
    TierConfig,
};
pub use evaluator::evaluate;
pub use gate::{
    EnforcementGate, GateOutcome, GateVerdict, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET,
    HEADER_RETRY_AFTER, HEADER_STATUS, RateLimitHeaders, RateLimitStatus, count_header,
};
pub use limiter::{DEFAULT_STORE_TIMEOUT, RateLimiter, UsageReport};
pub use tiers::{ShippedTier, TierPolicyTable};
