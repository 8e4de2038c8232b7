use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use ouroboros_talos_importmap::ImportMapError;
use ouroboros_talos_prebundle::PrebundleError;
use ouroboros_talos_transform::{format_diagnostics, Diagnostic};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DevServerError {
    #[error("Transform failed for {path:?}:\n{}", format_diagnostics(.diagnostics))]
    Transform {
        path: PathBuf,
        diagnostics: Vec<Diagnostic>,
    },

    #[error(transparent)]
    Prebundle(#[from] PrebundleError),

    #[error(transparent)]
    ImportMap(#[from] ImportMapError),

    #[error("Upstream {url} unreachable: {source}")]
    Upstream {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Upstream {url} timed out")]
    UpstreamTimeout { url: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Invalid proxy request: {0}")]
    InvalidProxyRequest(String),

    #[error("Request body exceeds the {limit} byte proxy limit")]
    ProxyBodyTooLarge { limit: usize },

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),

    #[error("Internal task failed: {0}")]
    Task(String),
}

impl DevServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            DevServerError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            DevServerError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            DevServerError::InvalidProxyRequest(_) => StatusCode::BAD_REQUEST,
            DevServerError::ProxyBodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            DevServerError::Prebundle(
                PrebundleError::UnknownPackage(_)
                | PrebundleError::InvalidName(_)
                | PrebundleError::UnresolvedSubpath { .. },
            ) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DevServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }
        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}
