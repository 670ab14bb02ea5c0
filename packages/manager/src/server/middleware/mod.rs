//! HTTP middleware: API-token auth, security headers, panic recovery.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use constant_time_eq::constant_time_eq;

use crate::common::error::ErrorBody;
use crate::server::app::AppState;

/// Paths reachable without a token.
const PUBLIC_PATHS: [&str; 2] = ["/health", "/api/v2/health"];

/// Token auth: when a token is configured, every non-health request must
/// present it as `Authorization: Bearer`, `X-API-Key`, or `?api_key=`.
/// Comparison is constant-time.
pub async fn require_api_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.api_token else {
        return next.run(request).await;
    };
    if PUBLIC_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let presented = bearer_token(&request)
        .or_else(|| header_token(&request))
        .or_else(|| query_token(&request));

    match presented {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => {
            next.run(request).await
        }
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody {
                code: StatusCode::UNAUTHORIZED.as_u16(),
                message: "missing or invalid api token".to_string(),
            }),
        )
            .into_response(),
    }
}

fn bearer_token(request: &Request) -> Option<String> {
    let value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::to_string)
}

fn header_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get("x-api-key")?
        .to_str()
        .ok()
        .map(str::to_string)
}

fn query_token(request: &Request) -> Option<String> {
    let query = request.uri().query()?;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == "api_key").then(|| value.to_string())
    })
}

/// Stamp the standard security headers onto every response.
pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "x-xss-protection",
        HeaderValue::from_static("1; mode=block"),
    );
    response
}

/// Turn a handler panic into a logged 500 with the standard error body.
pub fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> axum::http::Response<Body> {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %detail, "handler panicked");

    let body = serde_json::to_string(&ErrorBody {
        code: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        message: "internal server error".to_string(),
    })
    .unwrap_or_else(|_| r#"{"code":500,"message":"internal server error"}"#.to_string());

    axum::http::Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap_or_default()
}
