//! Error types for the qrquota workspace.
//!
//! This crate provides the foundation error types used throughout the quota engine.
//!
//! # Error Hierarchy
//!
//! All errors follow the `ErrorKind` + wrapper struct pattern:
//! - `*ErrorKind` enum defines specific error conditions
//! - `*Error` struct wraps the kind with source location tracking
//! - All errors use `#[track_caller]` for automatic location capture
//!
//! Quota *decisions* never surface these errors directly. The rate limiter folds
//! tier and store failures into a denied decision; errors are returned from
//! configuration, administration and startup paths.
//!
//! # Examples
//!
//! ```
//! use qrquota_error::{QrQuotaResult, StoreError, StoreErrorKind};
//!
//! fn read_counter() -> QrQuotaResult<u64> {
//!     Err(StoreError::new(StoreErrorKind::Unavailable("connection refused".into())))?
//! }
//!
//! assert!(read_counter().is_err());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod server;
mod store;
mod tier;

pub use config::ConfigError;
pub use error::{QrQuotaError, QrQuotaErrorKind, QrQuotaResult};
pub use server::{ServerError, ServerErrorKind};
pub use store::{StoreError, StoreErrorKind, StoreResult};
pub use tier::{TierError, TierErrorKind};
