//! Shared handler state and the metered subject extension.

use qrquota_core::SubjectId;
use qrquota_rate_limit::{EnforcementGate, RateLimiter, ServerConfig};
use std::sync::Arc;

/// The subject a request is metered as.
///
/// An authentication layer in front of the service inserts this into request
/// extensions. Requests without one are metered by client address under the
/// configured anonymous tier, and the enforcement middleware inserts the
/// resolved value so handlers always find it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeteredSubject {
    /// Subject identifier
    pub id: SubjectId,
    /// Current tier of the subject
    pub tier: String,
}

impl MeteredSubject {
    /// Subject `id` on `tier`.
    pub fn new(id: SubjectId, tier: impl Into<String>) -> Self {
        Self {
            id,
            tier: tier.into(),
        }
    }
}

/// State shared by the middleware and the quota endpoints.
#[derive(Debug, Clone)]
pub struct AppState {
    gate: Arc<EnforcementGate>,
    server: Arc<ServerConfig>,
}

impl AppState {
    /// State over `gate` with `server` settings.
    pub fn new(gate: EnforcementGate, server: ServerConfig) -> Self {
        Self {
            gate: Arc::new(gate),
            server: Arc::new(server),
        }
    }

    /// The enforcement gate.
    pub fn gate(&self) -> &EnforcementGate {
        &self.gate
    }

    /// The rate limiter behind the gate.
    pub fn limiter(&self) -> &RateLimiter {
        self.gate.limiter()
    }

    /// HTTP settings.
    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    /// Whether `path` is subject to quota enforcement.
    pub fn is_metered(&self, path: &str) -> bool {
        path.starts_with(&self.server.metered_prefix)
            && !self
                .server
                .excluded_paths
                .iter()
                .any(|excluded| path.starts_with(excluded.as_str()))
    }
}
