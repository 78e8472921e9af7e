mod middleware;
mod proxy;

pub use middleware::{RequestContext, log_responses, set_request_context};
pub use proxy::{MAX_PROXY_BODY_BYTES, ProxyState, forward};

use axum::{Router, middleware as axum_middleware};

use crate::snapshot::{SnapshotState, pdf_snapshot_layer};

/// Front-end router: snapshot interception in front of the upstream proxy.
pub fn build_router(proxy: ProxyState, snapshot: SnapshotState) -> Router {
    Router::new()
        .fallback(forward)
        .with_state(proxy)
        .layer(axum_middleware::from_fn_with_state(
            snapshot,
            pdf_snapshot_layer,
        ))
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
