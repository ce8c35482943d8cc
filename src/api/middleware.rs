//! API Middleware
//!
//! Operation context extraction and request logging.

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use std::net::IpAddr;
use uuid::Uuid;

use crate::domain::OperationContext;
use crate::error::AppError;

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
pub const REQUEST_USER_HEADER: &str = "x-request-user-id";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

// =========================================================================
// Operation context
// =========================================================================

/// First address in `X-Forwarded-For`, if it parses
fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
}

/// Build the request's operation context from its headers
pub fn context_from_headers(headers: &HeaderMap) -> Result<OperationContext, AppError> {
    // Extract correlation ID or generate new one
    let correlation_id = headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
        .unwrap_or_else(Uuid::new_v4);

    let mut context = OperationContext::new().with_correlation_id(correlation_id);

    if let Some(value) = headers.get(REQUEST_USER_HEADER) {
        let user_id = value
            .to_str()
            .ok()
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .ok_or_else(|| AppError::InvalidHeader("X-Request-User-Id".to_string()))?;
        context = context.with_request_user(user_id);
    }

    if let Some(ip) = client_ip(headers) {
        context = context.with_client_ip(ip);
    }

    Ok(context)
}

/// Attach an [`OperationContext`] to every request and echo the
/// correlation id on the response
pub async fn context_middleware(
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let context = context_from_headers(request.headers())?;
    let correlation_id = context.correlation_id;
    request.extensions_mut().insert(context);

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    Ok(response)
}

// =========================================================================
// Request logging
// =========================================================================

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &["x-api-key", "authorization", "cookie", "set-cookie"];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name_lower = name.as_str().to_lowercase();
            let masked_value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

/// Request logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = mask_headers_for_logging(request.headers());
    let correlation_id = request
        .extensions()
        .get::<OperationContext>()
        .map(|ctx| ctx.correlation_id);

    let start = std::time::Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        correlation_id = ?correlation_id,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        duration_ms = %start.elapsed().as_millis(),
        correlation_id = ?correlation_id,
        "Request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_headers_for_logging() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        headers.insert("authorization", "Bearer secret".parse().unwrap());
        headers.insert("x-request-user-id", "user-123".parse().unwrap());

        let masked = mask_headers_for_logging(&headers);

        let auth = masked.iter().find(|(k, _)| k == "authorization");
        let content_type = masked.iter().find(|(k, _)| k == "content-type");
        let user_id = masked.iter().find(|(k, _)| k == "x-request-user-id");

        assert_eq!(auth.unwrap().1, "[REDACTED]");
        assert_eq!(content_type.unwrap().1, "application/json");
        assert_eq!(user_id.unwrap().1, "user-123");
    }

    #[test]
    fn test_context_uses_supplied_headers() {
        let correlation_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(CORRELATION_ID_HEADER, correlation_id.to_string().parse().unwrap());
        headers.insert(REQUEST_USER_HEADER, user_id.to_string().parse().unwrap());
        headers.insert(FORWARDED_FOR_HEADER, "203.0.113.7, 10.0.0.1".parse().unwrap());

        let context = context_from_headers(&headers).unwrap();
        assert_eq!(context.correlation_id, correlation_id);
        assert_eq!(context.request_user_id, Some(user_id));
        assert_eq!(context.client_ip, Some("203.0.113.7".parse().unwrap()));
    }

    #[test]
    fn test_context_generates_correlation_id() {
        let context = context_from_headers(&HeaderMap::new()).unwrap();
        assert!(context.request_user_id.is_none());
        assert!(!context.correlation_id.is_nil());
    }

    #[test]
    fn test_malformed_request_user_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_USER_HEADER, "alice".parse().unwrap());
        assert!(matches!(
            context_from_headers(&headers),
            Err(AppError::InvalidHeader(_))
        ));
    }
}
