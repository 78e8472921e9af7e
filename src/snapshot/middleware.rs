//! PDF snapshot middleware.
//!
//! Intercepts `.pdf`-suffixed requests accepted by the render rules and answers
//! them from the orchestrator. Everything else passes through untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, header::HOST, header::SET_COOKIE},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::{debug, instrument, warn};
use url::Url;
use uuid::Uuid;

use super::orchestrator::RenderOrchestrator;
use super::rules::{ClientClassifier, RenderRules, is_render_candidate};
use super::types::{JobScope, RequestIdentity};

const FALLBACK_HOST: &str = "localhost";

/// Shared snapshot state for middleware.
#[derive(Clone)]
pub struct SnapshotState {
    pub orchestrator: Arc<RenderOrchestrator>,
    pub rules: Arc<dyn RenderRules>,
    pub classifier: Arc<dyn ClientClassifier>,
    /// Scheme and authority used to rebuild request URLs.
    pub public_base_url: Option<Url>,
}

/// Session cookie issued on this response, if any.
struct IssuedSession {
    name: String,
    value: String,
}

#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn pdf_snapshot_layer(
    State(state): State<SnapshotState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !is_render_candidate(request.uri().path(), state.rules.as_ref()) {
        return next.run(request).await;
    }

    let (identity, issued) = identify(&state, &request);
    debug!(
        is_async_client = identity.is_async_client,
        "handling pdf snapshot request"
    );

    let mut response = state.orchestrator.handle(&identity).await.into_response();

    if let Some(issued) = issued {
        let cookie = Cookie::build((issued.name, issued.value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .build();
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(err) => warn!(error = %err, "failed to encode session cookie"),
        }
    }

    response
}

fn identify(
    state: &SnapshotState,
    request: &Request<Body>,
) -> (RequestIdentity, Option<IssuedSession>) {
    let config = state.orchestrator.config();
    let jar = CookieJar::from_headers(request.headers());

    let mut cookies: BTreeMap<String, String> = jar
        .iter()
        .map(|cookie| (cookie.name().to_string(), cookie.value().to_string()))
        .collect();

    let mut issued = None;
    let session_id = match cookies.get(&config.session_cookie) {
        Some(value) => Some(value.clone()),
        None if config.job_scope == JobScope::Session => {
            let value = Uuid::new_v4().to_string();
            cookies.insert(config.session_cookie.clone(), value.clone());
            issued = Some(IssuedSession {
                name: config.session_cookie.clone(),
                value: value.clone(),
            });
            Some(value)
        }
        None => None,
    };

    let identity = RequestIdentity {
        url: request_url(state.public_base_url.as_ref(), request),
        path: request.uri().path().to_string(),
        is_async_client: state.classifier.is_async(request.headers()),
        session_id,
        cookies,
    };
    (identity, issued)
}

/// Absolute URL of the request as the client addressed it.
fn request_url(base: Option<&Url>, request: &Request<Body>) -> String {
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|value| value.as_str())
        .unwrap_or("/");

    match base {
        Some(base) => {
            let origin = base.origin().ascii_serialization();
            format!("{origin}{path_and_query}")
        }
        None => {
            let host = request
                .headers()
                .get(HOST)
                .and_then(|value| value.to_str().ok())
                .or_else(|| request.uri().authority().map(|authority| authority.as_str()))
                .unwrap_or(FALLBACK_HOST);
            format!("http://{host}{path_and_query}")
        }
    }
}
