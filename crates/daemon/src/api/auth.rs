//! Daemon-token authentication.
//!
//! Every `/api` request must present the shared secret from the lock
//! file, either as an `x-daemon-token` header or a `?token=` query
//! parameter. Missing or mismatched tokens get a 401 with no side
//! effects; comparison is constant-time over SHA-256 digests.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use cd_domain::Error;

use crate::state::AppState;

pub const TOKEN_HEADER: &str = "x-daemon-token";

pub async fn require_daemon_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let presented = token_from_request(&req).unwrap_or_default();
    if !state.token_matches(&presented) {
        return super::api_error(&Error::Auth("missing or invalid daemon token".into()));
    }
    next.run(req).await
}

fn token_from_request(req: &Request<Body>) -> Option<String> {
    if let Some(header) = req.headers().get(TOKEN_HEADER) {
        return header.to_str().ok().map(str::to_owned);
    }
    let query = req.uri().query()?;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == "token").then(|| value.to_owned())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str, header: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = header {
            builder = builder.header(TOKEN_HEADER, token);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn header_takes_precedence() {
        let req = request("/api/health?token=from-query", Some("from-header"));
        assert_eq!(token_from_request(&req).as_deref(), Some("from-header"));
    }

    #[test]
    fn query_token_is_accepted() {
        let req = request("/api/health?a=1&token=abc123", None);
        assert_eq!(token_from_request(&req).as_deref(), Some("abc123"));
    }

    #[test]
    fn absent_token_is_none() {
        let req = request("/api/health", None);
        assert!(token_from_request(&req).is_none());
    }
}
