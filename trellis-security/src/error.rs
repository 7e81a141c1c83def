//! Security error types.

/// Errors from authentication and credential handling.
#[derive(Debug)]
pub enum SecurityError {
    /// Credentials missing, malformed, revoked, or not recognized.
    Unauthorized(String),
    /// The token signature or claims failed validation.
    Token(String),
    TokenExpired,
    /// Revoking something already revoked, or similar state conflicts.
    Conflict(String),
    NotFound(String),
    Configuration(String),
    Database(String),
}

impl std::fmt::Display for SecurityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityError::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            SecurityError::Token(msg) => write!(f, "invalid token: {msg}"),
            SecurityError::TokenExpired => write!(f, "token expired"),
            SecurityError::Conflict(msg) => write!(f, "conflict: {msg}"),
            SecurityError::NotFound(msg) => write!(f, "not found: {msg}"),
            SecurityError::Configuration(msg) => write!(f, "configuration error: {msg}"),
            SecurityError::Database(msg) => write!(f, "database error: {msg}"),
        }
    }
}

impl std::error::Error for SecurityError {}

impl From<sqlx::Error> for SecurityError {
    fn from(err: sqlx::Error) -> Self {
        SecurityError::Database(err.to_string())
    }
}

/// Errors from access-policy decisions.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyError {
    /// The operation is denied with an explanation for the caller.
    Denied(String),
    /// The policy could not compute a decision (misconfiguration,
    /// unresolvable identity).
    Unresolvable(String),
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyError::Denied(msg) => write!(f, "{msg}"),
            PolicyError::Unresolvable(msg) => write!(f, "access policy error: {msg}"),
        }
    }
}

impl std::error::Error for PolicyError {}
