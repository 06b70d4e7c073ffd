use crate::http::response::{IntoResponse, Response};
use crate::http::{Json, StatusCode};

/// Helper to create a JSON error response with a standard `{ "error": message }` body.
fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = serde_json::json!({ "error": message.into() });
    (status, Json(body)).into_response()
}

/// Canonical HTTP error type shared by every handler in the gateway.
///
/// Variant-to-status mapping follows the external error taxonomy exactly:
/// 401/402/403/404/409/423/429/500/502, plus 400 for malformed requests and
/// a `Custom` escape hatch for responses that need a structured body.
pub enum HttpError {
    BadRequest(String),
    Unauthorized(String),
    PaymentRequired(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Locked(String),
    TooManyRequests(String),
    Internal(String),
    BadGateway(String),
    Custom {
        status: StatusCode,
        body: serde_json::Value,
    },
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        match self {
            HttpError::Custom { status, body } => (status, Json(body)).into_response(),
            other => {
                let (status, message) = match other {
                    HttpError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
                    HttpError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
                    HttpError::PaymentRequired(msg) => (StatusCode::PAYMENT_REQUIRED, msg),
                    HttpError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
                    HttpError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
                    HttpError::Conflict(msg) => (StatusCode::CONFLICT, msg),
                    HttpError::Locked(msg) => (StatusCode::LOCKED, msg),
                    HttpError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
                    HttpError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
                    HttpError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
                    HttpError::Custom { .. } => unreachable!(),
                };
                error_response(status, message)
            }
        }
    }
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpError::BadRequest(msg) => write!(f, "Bad Request: {msg}"),
            HttpError::Unauthorized(msg) => write!(f, "Unauthorized: {msg}"),
            HttpError::PaymentRequired(msg) => write!(f, "Payment Required: {msg}"),
            HttpError::Forbidden(msg) => write!(f, "Forbidden: {msg}"),
            HttpError::NotFound(msg) => write!(f, "Not Found: {msg}"),
            HttpError::Conflict(msg) => write!(f, "Conflict: {msg}"),
            HttpError::Locked(msg) => write!(f, "Locked: {msg}"),
            HttpError::TooManyRequests(msg) => write!(f, "Too Many Requests: {msg}"),
            HttpError::Internal(msg) => write!(f, "Internal Error: {msg}"),
            HttpError::BadGateway(msg) => write!(f, "Bad Gateway: {msg}"),
            HttpError::Custom { status, body } => write!(f, "Custom Error ({status}): {body}"),
        }
    }
}

impl std::fmt::Debug for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

impl From<std::io::Error> for HttpError {
    fn from(err: std::io::Error) -> Self {
        HttpError::Internal(err.to_string())
    }
}

/// Generate `From<E> for HttpError` implementations that map error types to
/// a specific `HttpError` variant.
///
/// # Example
///
/// ```ignore
/// r2e_core::map_error! {
///     sqlx::Error => Internal,
///     std::io::Error => Internal,
/// }
/// ```
#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn error_parts(err: HttpError) -> (StatusCode, serde_json::Value) {
        let resp = err.into_response();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        (status, json)
    }

    #[tokio::test]
    async fn not_found_status() {
        let (status, body) = error_parts(HttpError::NotFound("resource missing".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "resource missing");
    }

    #[tokio::test]
    async fn bad_request_status() {
        let (status, body) = error_parts(HttpError::BadRequest("invalid input".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid input");
    }

    #[tokio::test]
    async fn unauthorized_status() {
        let (status, body) = error_parts(HttpError::Unauthorized("no token".into())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "no token");
    }

    #[tokio::test]
    async fn payment_required_status() {
        let (status, body) =
            error_parts(HttpError::PaymentRequired("insufficient budget".into())).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["error"], "insufficient budget");
    }

    #[tokio::test]
    async fn forbidden_status() {
        let (status, body) = error_parts(HttpError::Forbidden("access denied".into())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "access denied");
    }

    #[tokio::test]
    async fn conflict_status() {
        let (status, body) =
            error_parts(HttpError::Conflict("idempotency conflict".into())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "idempotency conflict");
    }

    #[tokio::test]
    async fn locked_status() {
        let (status, _) = error_parts(HttpError::Locked("agent locked".into())).await;
        assert_eq!(status, StatusCode::LOCKED);
    }

    #[tokio::test]
    async fn too_many_requests_status() {
        let (status, _) = error_parts(HttpError::TooManyRequests("rate limited".into())).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn internal_status() {
        let (status, body) = error_parts(HttpError::Internal("server broke".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "server broke");
    }

    #[tokio::test]
    async fn bad_gateway_status() {
        let (status, _) = error_parts(HttpError::BadGateway("upstream failed".into())).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn custom_status_and_body() {
        let custom_body = serde_json::json!({"detail": "teapot"});
        let (status, body) = error_parts(HttpError::Custom {
            status: StatusCode::IM_A_TEAPOT,
            body: custom_body.clone(),
        })
        .await;
        assert_eq!(status, StatusCode::IM_A_TEAPOT);
        assert_eq!(body, custom_body);
    }

    #[test]
    fn display_formatting() {
        assert_eq!(HttpError::NotFound("x".into()).to_string(), "Not Found: x");
        assert_eq!(
            HttpError::Unauthorized("y".into()).to_string(),
            "Unauthorized: y"
        );
        assert_eq!(
            HttpError::Forbidden("z".into()).to_string(),
            "Forbidden: z"
        );
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let app_err: HttpError = io_err.into();
        match app_err {
            HttpError::Internal(msg) => assert!(msg.contains("file missing")),
            other => panic!("expected Internal, got {other}"),
        }
    }
}

#[macro_export]
macro_rules! map_error {
    ( $( $err_ty:ty => $variant:ident ),* $(,)? ) => {
        $(
            impl From<$err_ty> for $crate::HttpError {
                fn from(err: $err_ty) -> Self {
                    $crate::HttpError::$variant(err.to_string())
                }
            }
        )*
    };
}
