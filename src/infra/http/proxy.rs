//! Reverse proxy to the upstream application.

use axum::{
    body::{Body, to_bytes},
    extract::State,
    http::{HeaderMap, HeaderName, Request, header},
    response::Response,
};
use tracing::{debug, instrument};
use url::Url;

use crate::{error::AppError, infra::error::InfraError};

/// Largest request body forwarded upstream.
pub const MAX_PROXY_BODY_BYTES: usize = 16 * 1024 * 1024;

const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

#[derive(Clone)]
pub struct ProxyState {
    client: reqwest::Client,
    upstream: Url,
}

impl ProxyState {
    pub fn new(client: reqwest::Client, upstream: Url) -> Self {
        Self { client, upstream }
    }

    /// Upstream URL for a request path and query.
    fn target(&self, path: &str, query: Option<&str>) -> Url {
        let mut target = self.upstream.clone();
        let base = target.path().trim_end_matches('/').to_string();
        target.set_path(&format!("{base}{path}"));
        target.set_query(query);
        target
    }
}

#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn forward(
    State(proxy): State<ProxyState>,
    request: Request<Body>,
) -> Result<Response, AppError> {
    let (parts, body) = request.into_parts();
    let target = proxy.target(parts.uri.path(), parts.uri.query());

    let body = to_bytes(body, MAX_PROXY_BODY_BYTES)
        .await
        .map_err(|err| AppError::validation(format!("request body rejected: {err}")))?;

    let mut headers = parts.headers;
    let original_host = headers.remove(header::HOST);
    strip_hop_by_hop(&mut headers);
    if let Some(host) = original_host {
        headers.insert(X_FORWARDED_HOST, host);
    }

    let upstream = proxy
        .client
        .request(parts.method, target.as_str())
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|err| InfraError::upstream(format!("{target}: {err}")))?;

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    strip_hop_by_hop(&mut response_headers);
    let bytes = upstream
        .bytes()
        .await
        .map_err(|err| InfraError::upstream(format!("{target}: {err}")))?;

    debug!(
        target = "pdfsnap::http::proxy",
        status = status.as_u16(),
        bytes = bytes.len(),
        "proxied upstream response"
    );

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn proxy(upstream: &str) -> ProxyState {
        ProxyState::new(
            reqwest::Client::new(),
            Url::parse(upstream).expect("upstream url"),
        )
    }

    #[test]
    fn target_keeps_path_and_query() {
        let proxy = proxy("http://127.0.0.1:8080");
        let target = proxy.target("/reports/q3", Some("page=2"));
        assert_eq!(target.as_str(), "http://127.0.0.1:8080/reports/q3?page=2");
    }

    #[test]
    fn target_respects_upstream_prefix() {
        let proxy = proxy("http://app.internal/site/");
        let target = proxy.target("/about", None);
        assert_eq!(target.as_str(), "http://app.internal/site/about");
    }

    #[test]
    fn hop_by_hop_headers_are_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/html"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::ACCEPT));
    }
}
