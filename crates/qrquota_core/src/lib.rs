//! Core data types for the qrquota usage quota engine.
//!
//! This crate provides the vocabulary shared by every other qrquota crate:
//! window kinds and their UTC boundary arithmetic, per-tier limits, subjects,
//! and the decision record produced for every metered request.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod decision;
mod policy;
mod subject;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::{DecisionReason, QuotaDecision, WindowUsage};
pub use policy::{Limit, TierPolicy, UNLIMITED_SENTINEL, WindowLimit};
pub use subject::SubjectId;
pub use window::{WindowKey, WindowKind, reset_at, window_key};
