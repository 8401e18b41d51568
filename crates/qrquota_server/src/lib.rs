//! HTTP quota enforcement service.
//!
//! Wraps the [`EnforcementGate`](qrquota_rate_limit::EnforcementGate) in axum
//! middleware and exposes quota introspection endpoints:
//!
//! | Method | Path | |
//! |--------|------|-|
//! | GET | `/health` | liveness |
//! | GET | `/api/v1/rate-limits/usage` | caller's usage per window |
//! | GET | `/api/v1/rate-limits/limits` | every tier's limits |
//! | POST | `/api/v1/rate-limits/reset` | clear caller's counters, enterprise only |
//! | GET | `/api/v1/rate-limits/status` | counter backend health |
//!
//! Subjects come from the [`MeteredSubject`] request extension, inserted by an
//! authentication layer this crate does not provide.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod middleware;
mod observability;
mod routes;
mod server;
mod state;

pub use middleware::quota_middleware;
pub use observability::{ObservabilityConfig, init_observability, shutdown_observability};
pub use routes::{ApiError, create_router, with_enforcement};
pub use server::{build_state, connect_store, serve};
pub use state::{AppState, MeteredSubject};
