use crate::config::ProxyRule;
use crate::error::DevServerError;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderName};
use axum::response::Response;
use futures::StreamExt;
use std::time::Duration;

/// Headers that describe one connection rather than the message
fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Copy end-to-end headers; `host` is left for the client to set
fn forwardable_headers(headers: &HeaderMap, drop_host: bool) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name) || (drop_host && name == header::HOST) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Declared `content-length`, if it parses
fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

/// Collect a request body, failing once it grows past `limit` bytes
async fn read_body(body: Body, limit: usize) -> Result<Vec<u8>, DevServerError> {
    let mut stream = body.into_data_stream();
    let mut buf = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| DevServerError::InvalidProxyRequest(e.to_string()))?;
        if buf.len() + chunk.len() > limit {
            return Err(DevServerError::ProxyBodyTooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(buf)
}

/// Reverse proxy to configured upstreams
#[derive(Clone)]
pub struct Proxy {
    client: reqwest::Client,
    timeout: Duration,
    max_body: usize,
}

impl Proxy {
    pub fn new(timeout: Duration, max_body: usize) -> Result<Self, DevServerError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(timeout)
            // Pass encoded bodies through untouched
            .no_gzip()
            .no_brotli()
            .build()?;

        Ok(Self {
            client,
            timeout,
            max_body,
        })
    }

    /// Forward `request` to the rule's target and stream the answer back.
    ///
    /// The request body is buffered up to the configured limit. The timeout bounds the wait for upstream
    /// response headers; the response body then streams for as long as the
    /// upstream keeps sending.
    pub async fn forward(&self, rule: &ProxyRule, request: Request) -> Result<Response, DevServerError> {
        let (parts, body) = request.into_parts();
        let url = rule.upstream_url(parts.uri.path(), parts.uri.query());

        tracing::debug!("Proxy {} {} -> {}", parts.method, parts.uri, url);

        if declared_length(&parts.headers).is_some_and(|length| length > self.max_body) {
            return Err(DevServerError::ProxyBodyTooLarge { limit: self.max_body });
        }
        let body = read_body(body, self.max_body).await?;

        let mut upstream = self
            .client
            .request(parts.method.clone(), &url)
            .headers(forwardable_headers(&parts.headers, true));
        if !body.is_empty() {
            upstream = upstream.body(body);
        }

        let response = match tokio::time::timeout(self.timeout, upstream.send()).await {
            Err(_) => return Err(DevServerError::UpstreamTimeout { url }),
            Ok(Err(e)) if e.is_timeout() => return Err(DevServerError::UpstreamTimeout { url }),
            Ok(Err(e)) if e.is_builder() => return Err(DevServerError::InvalidProxyRequest(e.to_string())),
            Ok(Err(source)) => return Err(DevServerError::Upstream { url, source }),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        let headers = forwardable_headers(response.headers(), false);

        let mut builder = Response::builder().status(status);
        if let Some(target) = builder.headers_mut() {
            *target = headers;
        }

        builder
            .body(Body::from_stream(response.bytes_stream()))
            .map_err(|e| DevServerError::InvalidProxyRequest(e.to_string()))
    }
}
