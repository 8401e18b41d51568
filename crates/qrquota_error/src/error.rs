//! Top-level error wrapper types.

use crate::{ConfigError, ServerError, StoreError, TierError};

/// Union of every error the workspace can return.
///
/// # Examples
///
/// ```
/// use qrquota_error::{QrQuotaError, TierError, TierErrorKind};
///
/// let tier_err = TierError::new(TierErrorKind::Unknown("gold".into()));
/// let err: QrQuotaError = tier_err.into();
/// assert!(format!("{}", err).contains("Tier Error"));
/// ```
#[derive(Debug, derive_more::From, derive_more::Display, derive_more::Error)]
pub enum QrQuotaErrorKind {
    /// Configuration error
    #[from(ConfigError)]
    Config(ConfigError),
    /// Tier policy error
    #[from(TierError)]
    Tier(TierError),
    /// Counter store error
    #[from(StoreError)]
    Store(StoreError),
    /// HTTP service error
    #[from(ServerError)]
    Server(ServerError),
}

/// qrquota error with kind discrimination.
///
/// # Examples
///
/// ```
/// use qrquota_error::{ConfigError, QrQuotaResult};
///
/// fn might_fail() -> QrQuotaResult<()> {
///     Err(ConfigError::new("Missing field"))?
/// }
///
/// assert!(might_fail().is_err());
/// ```
#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("qrquota Error: {}", _0)]
pub struct QrQuotaError(Box<QrQuotaErrorKind>);

impl QrQuotaError {
    /// Create a new error from a kind.
    pub fn new(kind: QrQuotaErrorKind) -> Self {
        Self(Box::new(kind))
    }

    /// Get the error kind.
    pub fn kind(&self) -> &QrQuotaErrorKind {
        &self.0
    }
}

// Generic From implementation for any type that converts to QrQuotaErrorKind
impl<T> From<T> for QrQuotaError
where
    T: Into<QrQuotaErrorKind>,
{
    fn from(err: T) -> Self {
        Self::new(err.into())
    }
}

/// Result type for qrquota operations.
pub type QrQuotaResult<T> = std::result::Result<T, QrQuotaError>;
