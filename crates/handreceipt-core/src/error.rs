use thiserror::Error;

/// HandReceipt domain errors.
///
/// Every variant maps to one of the kinds in the error taxonomy; the HTTP
/// layer maps these to status codes and never improvises new kinds.
#[derive(Debug, Error)]
pub enum HandReceiptError {
    // Validation
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("missing field: {0}")]
    MissingField(String),
    #[error("value out of range: {0}")]
    OutOfRange(String),

    // Auth
    #[error("authentication required")]
    Unauthenticated,
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("session has been revoked")]
    SessionRevoked,
    #[error("token has expired")]
    TokenExpired,

    // Not found
    #[error("property not found: {0}")]
    PropertyNotFound(String),
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("transfer not found: {0}")]
    TransferNotFound(String),
    #[error("QR code not found: {0}")]
    QRNotFound(String),

    // Conflict
    #[error("serial number already exists: {serial} (existing id {existing_id})")]
    SerialAlreadyExists { serial: String, existing_id: i64 },
    #[error("a transfer is already pending for this property")]
    TransferAlreadyPending,
    #[error("transfer is not in a pending state")]
    TransferNotPending,
    #[error("ownership changed since this transfer was requested")]
    OwnershipChanged,
    #[error("a user cannot transfer an item to themselves")]
    SelfTransferForbidden,
    #[error("QR hash collision, regenerate with a fresh timestamp")]
    QRHashCollision,

    // QR integrity
    #[error("QR payload hash does not match its contents")]
    QRInvalidHash,
    #[error("QR code has been deactivated")]
    QRDeactivated,
    #[error("QR code is outdated; ownership has since changed")]
    QROutdated,
    #[error("property referenced by this QR code is reported lost")]
    QRPropertyLost,

    // Infrastructure
    #[error("database unavailable: {0}")]
    DatabaseUnavailable(String),
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),
    #[error("operation timed out")]
    Timeout,
    #[error("operation canceled")]
    Canceled,
}

impl HandReceiptError {
    /// Stable string discriminator surfaced to clients as `error.kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "InvalidInput",
            Self::MissingField(_) => "MissingField",
            Self::OutOfRange(_) => "OutOfRange",
            Self::Unauthenticated => "Unauthenticated",
            Self::Unauthorized(_) => "Unauthorized",
            Self::SessionRevoked => "SessionRevoked",
            Self::TokenExpired => "TokenExpired",
            Self::PropertyNotFound(_) => "PropertyNotFound",
            Self::UserNotFound(_) => "UserNotFound",
            Self::TransferNotFound(_) => "TransferNotFound",
            Self::QRNotFound(_) => "QRNotFound",
            Self::SerialAlreadyExists { .. } => "SerialAlreadyExists",
            Self::TransferAlreadyPending => "TransferAlreadyPending",
            Self::TransferNotPending => "TransferNotPending",
            Self::OwnershipChanged => "OwnershipChanged",
            Self::SelfTransferForbidden => "SelfTransferForbidden",
            Self::QRHashCollision => "QRHashCollision",
            Self::QRInvalidHash => "QRInvalidHash",
            Self::QRDeactivated => "QRDeactivated",
            Self::QROutdated => "QROutdated",
            Self::QRPropertyLost => "QRPropertyLost",
            Self::DatabaseUnavailable(_) => "DatabaseUnavailable",
            Self::LedgerUnavailable(_) => "LedgerUnavailable",
            Self::Timeout => "Timeout",
            Self::Canceled => "Canceled",
        }
    }

    /// Infrastructure errors are the only ones worth retrying or alerting on.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::DatabaseUnavailable(_) | Self::LedgerUnavailable(_) | Self::Timeout
        )
    }
}

impl From<sqlx::Error> for HandReceiptError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                // 23505 = unique_violation. Callers that care about *which*
                // constraint fired inspect the constraint name themselves
                // before this conversion; this is the fallback mapping.
                if db_err.code().as_deref() == Some("23505") {
                    HandReceiptError::InvalidInput(format!("uniqueness violation: {db_err}"))
                } else {
                    HandReceiptError::DatabaseUnavailable(db_err.to_string())
                }
            }
            sqlx::Error::PoolTimedOut => HandReceiptError::Timeout,
            other => HandReceiptError::DatabaseUnavailable(other.to_string()),
        }
    }
}
