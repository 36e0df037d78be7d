//! Static browser-UI service with SPA fallback and security headers.
//!
//! Mounted as the router fallback, so every non-`/api` path lands here.
//! Paths without a file extension get the SPA root document; asset paths
//! are served from the UI directory or 404 honestly. All UI responses
//! carry framing/sniffing/CSP/no-cache headers.

use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

const CSP: &str = "default-src 'self'; \
    script-src 'self' https://cdn.jsdelivr.net https://unpkg.com; \
    style-src 'self' 'unsafe-inline' https://cdn.jsdelivr.net https://unpkg.com; \
    img-src 'self' data:; connect-src 'self' ws: wss:";

pub async fn serve_ui(State(state): State<AppState>, uri: Uri) -> Response {
    let path = uri.path();
    let last_segment = path.rsplit('/').next().unwrap_or_default();

    // SPA rule: no extension means the root document answers.
    let relative = if last_segment.contains('.') {
        path.trim_start_matches('/').to_owned()
    } else {
        "index.html".to_owned()
    };

    // Never serve outside the UI directory.
    if relative.split('/').any(|seg| seg == "..") {
        return with_headers((StatusCode::NOT_FOUND, "not found").into_response());
    }

    let file = state.ui_dir.join(&relative);
    match tokio::fs::read(&file).await {
        Ok(bytes) => {
            let mut resp = Response::new(bytes.into());
            resp.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(content_type(&relative)),
            );
            with_headers(resp)
        }
        Err(_) if relative == "index.html" => with_headers(
            (
                StatusCode::NOT_FOUND,
                "web UI assets not installed; API is at /api",
            )
                .into_response(),
        ),
        Err(_) => with_headers((StatusCode::NOT_FOUND, "not found").into_response()),
    }
}

fn content_type(path: &str) -> &'static str {
    match path.rsplit('.').next().unwrap_or_default() {
        "html" => "text/html; charset=utf-8",
        "js" | "mjs" => "application/javascript",
        "css" => "text/css",
        "json" | "map" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "ico" => "image/x-icon",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}

fn with_headers(mut resp: Response) -> Response {
    let headers = resp.headers_mut();
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(CSP),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    resp
}
