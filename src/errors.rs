use thiserror::Error;

/// Failure taxonomy of the device security engine.
///
/// Every variant maps onto a UPnP-style numeric code via [`SecurityError::code`];
/// the transport only ever sees the code and [`SecurityError::description`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Signature missing")]
    SignatureMissing,

    #[error("Caller is not authorized for {0}")]
    AuthorizationDenied(String),

    #[error("Replay detected")]
    ReplayDetected,

    #[error("No session with device key id {0}")]
    NoSuchSession(u32),

    #[error("No ACL entry at index {0}")]
    NoSuchAclEntry(usize),

    #[error("Malformed ACL entry: {0}")]
    MalformedAclEntry(String),

    #[error("ACL version conflict")]
    AclVersionConflict,

    #[error("Device is already owned")]
    AlreadyOwned,

    #[error("Ownership claim HMAC mismatch")]
    OwnershipClaimRejected,

    #[error("The last owner may not revoke itself")]
    CannotSelfOrphan,

    #[error("Identity is not an owner")]
    NoSuchOwner,

    #[error("Identity is already an owner")]
    OwnerAlreadyPresent,

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(&'static str),

    #[error("Action {0} is not implemented")]
    NotImplemented(String),

    #[error("Action dispatch failed: {0}")]
    DispatchFailed(String),

    #[error("Cryptographic failure: {0}")]
    Crypto(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SecurityError {
    /// UPnP error code for this failure.
    pub fn code(&self) -> u16 {
        match self {
            SecurityError::MalformedInput(_)
            | SecurityError::InvalidEncoding(_)
            | SecurityError::Crypto(_) => 402,
            SecurityError::UnsupportedAlgorithm(_) => 721,
            SecurityError::AuthenticationFailed => 711,
            SecurityError::SignatureMissing => 712,
            SecurityError::AuthorizationDenied(_) => 701,
            SecurityError::ReplayDetected => 714,
            SecurityError::NoSuchSession(_) => 781,
            SecurityError::NoSuchAclEntry(_) => 772,
            SecurityError::MalformedAclEntry(_) => 773,
            SecurityError::AclVersionConflict => 774,
            SecurityError::AlreadyOwned => 761,
            SecurityError::OwnershipClaimRejected => 762,
            SecurityError::CannotSelfOrphan => 763,
            SecurityError::NoSuchOwner => 764,
            SecurityError::OwnerAlreadyPresent => 765,
            SecurityError::CapacityExceeded(_) => 751,
            SecurityError::NotImplemented(_) => 602,
            SecurityError::DispatchFailed(_) | SecurityError::Internal(_) => 501,
        }
    }

    /// Wire description; never names the check that failed.
    pub fn description(&self) -> &'static str {
        match self {
            SecurityError::MalformedInput(_)
            | SecurityError::InvalidEncoding(_)
            | SecurityError::Crypto(_) => "Invalid args",
            SecurityError::UnsupportedAlgorithm(_) => "Algorithm not supported",
            SecurityError::AuthenticationFailed => "Signature failure",
            SecurityError::SignatureMissing => "Signature missing",
            SecurityError::AuthorizationDenied(_) => "Not authorized",
            SecurityError::ReplayDetected => "Invalid sequence",
            SecurityError::NoSuchSession(_) => "No such session",
            SecurityError::NoSuchAclEntry(_) => "Entry does not exist",
            SecurityError::MalformedAclEntry(_) => "Malformed entry",
            SecurityError::AclVersionConflict => "Incorrect ACL version",
            SecurityError::AlreadyOwned => "Device already owned",
            SecurityError::OwnershipClaimRejected => "Failed HMAC",
            SecurityError::CannotSelfOrphan => "May not delete self",
            SecurityError::NoSuchOwner => "No such entry",
            SecurityError::OwnerAlreadyPresent => "Entry already present",
            SecurityError::CapacityExceeded(_) => "Out of memory",
            SecurityError::NotImplemented(_) => "Optional action not implemented",
            SecurityError::DispatchFailed(_) | SecurityError::Internal(_) => "Action failed",
        }
    }
}

impl From<anyhow::Error> for SecurityError {
    fn from(err: anyhow::Error) -> Self {
        SecurityError::Internal(err.to_string())
    }
}

impl From<base64::DecodeError> for SecurityError {
    fn from(err: base64::DecodeError) -> Self {
        SecurityError::InvalidEncoding(err.to_string())
    }
}

impl From<rsa::Error> for SecurityError {
    fn from(err: rsa::Error) -> Self {
        SecurityError::Crypto(err.to_string())
    }
}

pub type SecurityResult<T> = Result<T, SecurityError>;

/// Structured error returned across the action boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionError {
    pub code: u16,
    pub description: String,
}

impl ActionError {
    pub fn new(code: u16, description: impl Into<String>) -> Self {
        ActionError {
            code,
            description: description.into(),
        }
    }
}

impl std::fmt::Display for ActionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.description)
    }
}

impl std::error::Error for ActionError {}

impl From<SecurityError> for ActionError {
    fn from(err: SecurityError) -> Self {
        ActionError::new(err.code(), err.description())
    }
}
