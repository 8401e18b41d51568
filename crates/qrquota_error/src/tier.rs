//! Tier policy error types.

/// Kinds of tier errors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum TierErrorKind {
    /// The tier is not registered in the policy table.
    ///
    /// This is a configuration defect, never a per-request condition. Callers
    /// must fail closed.
    #[display("Unknown tier: {}", _0)]
    Unknown(String),
    /// The tier definition violates a policy invariant.
    #[display("Invalid tier '{}': {}", tier, reason)]
    Invalid {
        /// Tier name
        tier: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Tier error with location tracking.
///
/// # Examples
///
/// ```
/// use qrquota_error::{TierError, TierErrorKind};
///
/// let err = TierError::new(TierErrorKind::Unknown("platinum".to_string()));
/// assert!(format!("{}", err).contains("Unknown tier: platinum"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Tier Error: {} at line {} in {}", kind, line, file)]
pub struct TierError {
    /// The kind of error that occurred
    pub kind: TierErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl TierError {
    /// Create a new tier error with automatic location tracking.
    #[track_caller]
    pub fn new(kind: TierErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Get the error kind.
    pub fn kind(&self) -> &TierErrorKind {
        &self.kind
    }
}
