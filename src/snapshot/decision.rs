//! Orchestrator outcomes and their HTTP rendering.

use std::time::Duration;

use axum::{
    body::Body,
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, RETRY_AFTER},
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;

use crate::error::ErrorReport;

const PDF_CONTENT_TYPE: &str = "application/pdf";
const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const REFRESH: &str = "refresh";

/// Terminal failures of a render job, shown to the end user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderFailure {
    InvalidArtifact,
    Timeout,
    LaunchFailed,
}

impl RenderFailure {
    pub fn message(self) -> &'static str {
        match self {
            Self::InvalidArtifact => "PDF file invalid",
            Self::Timeout => "Rendering timeout",
            Self::LaunchFailed => "PDF rendering could not be started",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderDecision {
    /// The rendered PDF body.
    File(Bytes),
    /// Ask the client to retry after the given delay.
    Reload(Duration),
    /// Tell an async-aware client the artifact can be fetched from this path.
    Ready(String),
    Error(RenderFailure),
}

impl IntoResponse for RenderDecision {
    fn into_response(self) -> Response {
        match self {
            RenderDecision::File(body) => file_response(body),
            RenderDecision::Reload(delay) => reload_response(delay),
            RenderDecision::Ready(path) => ready_response(&path),
            RenderDecision::Error(failure) => error_response(failure),
        }
    }
}

fn file_response(body: Bytes) -> Response {
    let length = body.len();
    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(PDF_CONTENT_TYPE));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    response
}

fn reload_response(delay: Duration) -> Response {
    let seconds = HeaderValue::from(delay.as_secs());
    let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
    let headers = response.headers_mut();
    headers.insert(RETRY_AFTER, seconds.clone());
    headers.insert(REFRESH, seconds);
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn ready_response(path: &str) -> Response {
    let href = escape_html(path);
    let body = format!("<a href=\"{href}\">PDF ready here</a>");
    (
        StatusCode::OK,
        [
            (CONTENT_TYPE, HeaderValue::from_static(HTML_CONTENT_TYPE)),
            (CACHE_CONTROL, HeaderValue::from_static("no-store")),
        ],
        body,
    )
        .into_response()
}

fn error_response(failure: RenderFailure) -> Response {
    let message = failure.message();
    let body = format!("<html><head></head><body>{message}</body></html>");
    let mut response = (
        StatusCode::SERVICE_UNAVAILABLE,
        [(CONTENT_TYPE, HeaderValue::from_static(HTML_CONTENT_TYPE))],
        body,
    )
        .into_response();
    ErrorReport::from_message(
        "snapshot::decision::error_response",
        StatusCode::SERVICE_UNAVAILABLE,
        message,
    )
    .attach(&mut response);
    response
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
