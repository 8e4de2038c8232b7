use crate::error::DevServerError;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use std::path::Path;

pub const JAVASCRIPT: &str = "application/javascript; charset=utf-8";

/// Guess content type from file extension
pub fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") | Some("mjs") | Some("cjs") => JAVASCRIPT,
        Some("json") | Some("map") => "application/json; charset=utf-8",
        Some("txt") => "text/plain; charset=utf-8",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("webp") => "image/webp",
        Some("wasm") => "application/wasm",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}

/// Serve a file from disk with a content type from its extension
pub async fn serve_file(path: &Path) -> Result<Response, DevServerError> {
    let content = tokio::fs::read(path).await.map_err(|source| DevServerError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, content_type(path)),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        content,
    )
        .into_response())
}
