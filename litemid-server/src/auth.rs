//! Access control middleware
//!
//! Two independent wrappers for the route table: unconditional security
//! headers, and an optional basic-auth gate that covers the proxy route
//! only, so health checks and the service-info page keep working with
//! locked-down credentials.

use crate::config::AuthConfig;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::{engine::general_purpose, Engine};
use subtle::ConstantTimeEq;

/// Fixed response headers applied to every route.
pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("X-XSS-Protection", HeaderValue::from_static("1; mode=block"));
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "Content-Security-Policy",
        HeaderValue::from_static("default-src 'self'"),
    );
    response
}

/// Basic-auth gate. Only layered onto the proxy route, and only when auth is
/// enabled.
pub async fn require_basic_auth(
    State(auth): State<AuthConfig>,
    request: Request,
    next: Next,
) -> Response {
    let credentials = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(decode_basic);

    let Some((username, password)) = credentials else {
        return challenge();
    };

    // Both comparisons always run; equal-time regardless of where a mismatch
    // occurs.
    let ok = username.as_bytes().ct_eq(auth.username.as_bytes())
        & password.as_bytes().ct_eq(auth.password.as_bytes());
    if !bool::from(ok) {
        return challenge();
    }

    next.run(request).await
}

fn decode_basic(value: &HeaderValue) -> Option<(String, String)> {
    let value = value.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

fn challenge() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static(r#"Basic realm="LiteMID""#),
        )],
        "Unauthorized",
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_for(user: &str, pass: &str) -> HeaderValue {
        let encoded = general_purpose::STANDARD.encode(format!("{user}:{pass}"));
        HeaderValue::from_str(&format!("Basic {encoded}")).unwrap()
    }

    #[test]
    fn decode_basic_roundtrip() {
        let value = header_for("admin", "hunter2");
        assert_eq!(
            decode_basic(&value),
            Some(("admin".to_string(), "hunter2".to_string()))
        );
    }

    #[test]
    fn decode_basic_handles_colon_in_password() {
        let value = header_for("admin", "pa:ss");
        assert_eq!(
            decode_basic(&value),
            Some(("admin".to_string(), "pa:ss".to_string()))
        );
    }

    #[test]
    fn decode_basic_rejects_garbage() {
        assert_eq!(decode_basic(&HeaderValue::from_static("Bearer abc")), None);
        assert_eq!(decode_basic(&HeaderValue::from_static("Basic ???")), None);
        assert_eq!(
            decode_basic(&HeaderValue::from_static("Basic bm9jb2xvbg==")),
            None
        );
    }

    #[test]
    fn comparison_matches_plain_equality() {
        // Verified as a timing-insensitive equality check; the constant-time
        // property comes from subtle, not from wall-clock measurement.
        let cases = [
            ("admin", "admin", true),
            ("admin", "admim", false),
            ("bdmin", "admin", false),
            ("admin", "admin2", false),
            ("", "admin", false),
        ];
        for (given, expected, want) in cases {
            let got = bool::from(given.as_bytes().ct_eq(expected.as_bytes()));
            assert_eq!(got, want, "{given} vs {expected}");
        }
    }
}
