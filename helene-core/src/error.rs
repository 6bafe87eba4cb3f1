//! Unified error taxonomy for Helene, converging protocol errors, HTTP
//! errors and handler exceptions onto the fixed wire error-code vocabulary
//! of the design (`PARSE_ERROR`, `METHOD_NOT_FOUND`, ...).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// The fixed wire error-code vocabulary. Every `ERROR` payload carries one
/// of these in its `code` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    EventNotProvided,
    ParamsNotFound,
    MethodForbidden,
    EventForbidden,
    InvalidMethodName,
    MethodNotSpecified,
    SubscriptionError,
    EventNotFound,
    EventNotSubscribed,
    AuthenticationFailed,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::MethodNotFound => "METHOD_NOT_FOUND",
            ErrorCode::InvalidParams => "INVALID_PARAMS",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::EventNotProvided => "EVENT_NOT_PROVIDED",
            ErrorCode::ParamsNotFound => "PARAMS_NOT_FOUND",
            ErrorCode::MethodForbidden => "METHOD_FORBIDDEN",
            ErrorCode::EventForbidden => "EVENT_FORBIDDEN",
            ErrorCode::InvalidMethodName => "INVALID_METHOD_NAME",
            ErrorCode::MethodNotSpecified => "METHOD_NOT_SPECIFIED",
            ErrorCode::SubscriptionError => "SUBSCRIPTION_ERROR",
            ErrorCode::EventNotFound => "EVENT_NOT_FOUND",
            ErrorCode::EventNotSubscribed => "EVENT_NOT_SUBSCRIBED",
            ErrorCode::AuthenticationFailed => "AUTHENTICATION_FAILED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A server-side error, carrying both the wire code it maps to and a
/// human-readable message. Converts to a wire `ERROR` payload via
/// [`HeleneError::code`]/[`HeleneError::message`], and to an HTTP response
/// via `IntoResponse` for the small number of plain-HTTP endpoints
/// (health, method POST ingress before a node is resolved).
#[derive(Debug)]
pub enum HeleneError {
    Parse(String),
    InvalidRequest(String),
    MethodNotFound(String),
    InvalidParams(String),
    Internal(String),
    EventNotProvided,
    ParamsNotFound,
    MethodForbidden(String),
    EventForbidden(String),
    InvalidMethodName(String),
    MethodNotSpecified,
    SubscriptionError(String),
    EventNotFound(String),
    EventNotSubscribed(String),
    AuthenticationFailed(String),
    TooManyRequests,
}

impl HeleneError {
    pub fn code(&self) -> ErrorCode {
        match self {
            HeleneError::Parse(_) => ErrorCode::ParseError,
            HeleneError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            HeleneError::MethodNotFound(_) => ErrorCode::MethodNotFound,
            HeleneError::InvalidParams(_) => ErrorCode::InvalidParams,
            HeleneError::Internal(_) => ErrorCode::InternalError,
            HeleneError::EventNotProvided => ErrorCode::EventNotProvided,
            HeleneError::ParamsNotFound => ErrorCode::ParamsNotFound,
            HeleneError::MethodForbidden(_) => ErrorCode::MethodForbidden,
            HeleneError::EventForbidden(_) => ErrorCode::EventForbidden,
            HeleneError::InvalidMethodName(_) => ErrorCode::InvalidMethodName,
            HeleneError::MethodNotSpecified => ErrorCode::MethodNotSpecified,
            HeleneError::SubscriptionError(_) => ErrorCode::SubscriptionError,
            HeleneError::EventNotFound(_) => ErrorCode::EventNotFound,
            HeleneError::EventNotSubscribed(_) => ErrorCode::EventNotSubscribed,
            HeleneError::AuthenticationFailed(_) => ErrorCode::AuthenticationFailed,
            HeleneError::TooManyRequests => ErrorCode::InternalError,
        }
    }

    pub fn message(&self) -> String {
        match self {
            HeleneError::Parse(m)
            | HeleneError::InvalidRequest(m)
            | HeleneError::MethodNotFound(m)
            | HeleneError::InvalidParams(m)
            | HeleneError::Internal(m)
            | HeleneError::MethodForbidden(m)
            | HeleneError::EventForbidden(m)
            | HeleneError::InvalidMethodName(m)
            | HeleneError::SubscriptionError(m)
            | HeleneError::EventNotFound(m)
            | HeleneError::EventNotSubscribed(m)
            | HeleneError::AuthenticationFailed(m) => m.clone(),
            HeleneError::EventNotProvided => "event name was not provided".to_string(),
            HeleneError::ParamsNotFound => "params were not provided".to_string(),
            HeleneError::MethodNotSpecified => "method name was not specified".to_string(),
            HeleneError::TooManyRequests => "Too Many Requests".to_string(),
        }
    }

    fn http_status(&self) -> StatusCode {
        match self {
            HeleneError::MethodNotFound(_) | HeleneError::EventNotFound(_) => StatusCode::NOT_FOUND,
            HeleneError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            HeleneError::MethodForbidden(_) | HeleneError::EventForbidden(_) => StatusCode::FORBIDDEN,
            HeleneError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            HeleneError::Parse(_)
            | HeleneError::InvalidRequest(_)
            | HeleneError::InvalidParams(_)
            | HeleneError::InvalidMethodName(_)
            | HeleneError::MethodNotSpecified
            | HeleneError::EventNotProvided
            | HeleneError::ParamsNotFound
            | HeleneError::SubscriptionError(_)
            | HeleneError::EventNotSubscribed(_) => StatusCode::BAD_REQUEST,
            HeleneError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for HeleneError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl std::error::Error for HeleneError {}

impl IntoResponse for HeleneError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        let body = serde_json::json!({
            "code": self.code().as_str(),
            "message": self.message(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for HeleneError {
    fn from(err: std::io::Error) -> Self {
        HeleneError::Internal(err.to_string())
    }
}

/// Generate `From<E> for HeleneError` implementations that map error types
/// to a specific `HeleneError` variant requiring a message argument.
#[macro_export]
macro_rules! map_error {
    ( $( $err_ty:ty => $variant:ident ),* $(,)? ) => {
        $(
            impl From<$err_ty> for $crate::error::HeleneError {
                fn from(err: $err_ty) -> Self {
                    $crate::error::HeleneError::$variant(err.to_string())
                }
            }
        )*
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn error_parts(err: HeleneError) -> (StatusCode, serde_json::Value) {
        let resp = err.into_response();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        (status, json)
    }

    #[tokio::test]
    async fn method_not_found_maps_to_404_and_wire_code() {
        let (status, body) = error_parts(HeleneError::MethodNotFound("sum".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "METHOD_NOT_FOUND");
        assert_eq!(body["message"], "sum");
    }

    #[tokio::test]
    async fn authentication_failed_maps_to_401() {
        let (status, body) = error_parts(HeleneError::AuthenticationFailed("bad token".into())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "AUTHENTICATION_FAILED");
    }

    #[tokio::test]
    async fn too_many_requests_maps_to_429() {
        let (status, _) = error_parts(HeleneError::TooManyRequests).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn display_combines_code_and_message() {
        assert_eq!(
            HeleneError::MethodForbidden("logout".into()).to_string(),
            "METHOD_FORBIDDEN: logout"
        );
    }
}
