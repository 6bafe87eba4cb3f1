use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Security-related errors for JWT validation and authentication.
#[derive(Debug)]
pub enum SecurityError {
    /// The Authorization header is missing from the request.
    MissingAuthHeader,

    /// The authorization scheme is not "Bearer".
    InvalidAuthScheme,

    /// The JWT token is invalid (malformed, bad signature, etc.).
    InvalidToken(String),

    /// The JWT token has expired.
    TokenExpired,

    /// The key ID (kid) from the JWT header is not found in the JWKS.
    UnknownKeyId(String),

    /// Failed to fetch the JWKS from the remote endpoint.
    JwksFetchError(String),

    /// Token validation failed (issuer, audience, or other claim mismatch).
    ValidationFailed(String),
}

impl std::fmt::Display for SecurityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityError::MissingAuthHeader => write!(f, "Missing Authorization header"),
            SecurityError::InvalidAuthScheme => write!(f, "Invalid authorization scheme"),
            SecurityError::InvalidToken(msg) => write!(f, "Invalid token: {msg}"),
            SecurityError::TokenExpired => write!(f, "Token expired"),
            SecurityError::UnknownKeyId(kid) => write!(f, "Unknown signing key: {kid}"),
            SecurityError::JwksFetchError(msg) => write!(f, "JWKS fetch error: {msg}"),
            SecurityError::ValidationFailed(msg) => write!(f, "Token validation failed: {msg}"),
        }
    }
}

impl std::error::Error for SecurityError {}

impl SecurityError {
    pub fn public_message(&self) -> &'static str {
        "Unauthorized"
    }
}

impl IntoResponse for SecurityError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.public_message() });
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

/// Every variant collapses to the wire's `AUTHENTICATION_FAILED` code (§4.7):
/// the node stays connected, unauthenticated, and this is reported on the
/// correlated call rather than torn down as a transport error.
impl From<SecurityError> for helene_core::error::HeleneError {
    fn from(err: SecurityError) -> Self {
        helene_core::error::HeleneError::AuthenticationFailed(err.to_string())
    }
}
