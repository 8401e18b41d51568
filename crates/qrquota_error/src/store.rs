//! Counter store error types.

/// Kinds of counter store errors.
///
/// Every kind means the same thing to the rate limiter: the current count is
/// unknown, so the request must be denied. They are kept apart for logging.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum StoreErrorKind {
    /// Backing store unreachable or refused the command
    #[display("Counter store unavailable: {}", _0)]
    Unavailable(String),
    /// Store call exceeded its deadline
    #[display("Counter store timed out after {}ms", _0)]
    Timeout(u64),
    /// Store replied with something that is not a counter
    #[display("Unexpected counter store reply: {}", _0)]
    Protocol(String),
}

/// Counter store error with location tracking.
///
/// # Examples
///
/// ```
/// use qrquota_error::{StoreError, StoreErrorKind};
///
/// let err = StoreError::new(StoreErrorKind::Timeout(250));
/// assert!(err.is_timeout());
/// assert!(format!("{}", err).contains("250ms"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Store Error: {} at line {} in {}", kind, line, file)]
pub struct StoreError {
    /// The kind of error that occurred
    pub kind: StoreErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl StoreError {
    /// Create a new store error with automatic location tracking.
    #[track_caller]
    pub fn new(kind: StoreErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Get the error kind.
    pub fn kind(&self) -> &StoreErrorKind {
        &self.kind
    }

    /// Whether this error came from a deadline rather than the store itself.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, StoreErrorKind::Timeout(_))
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    #[track_caller]
    fn from(err: redis::RedisError) -> Self {
        let kind = if err.kind() == redis::ErrorKind::TypeError {
            StoreErrorKind::Protocol(err.to_string())
        } else {
            StoreErrorKind::Unavailable(err.to_string())
        };
        StoreError::new(kind)
    }
}

/// Result type for counter store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
