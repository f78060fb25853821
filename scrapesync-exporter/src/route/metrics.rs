use axum::{
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use prometheus::{Encoder, TextEncoder};
use tracing::warn;

use crate::AppState;

/// Text exposition of every registered metric.
pub async fn metrics(State(state): State<AppState>) -> Response {
    let encoder = TextEncoder::new();
    let mut buf = Vec::with_capacity(1024);

    if let Err(e) = encoder.encode(&state.registry.gather(), &mut buf) {
        warn!("failed to encode metrics: {e}");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static(prometheus::TEXT_FORMAT),
        )],
        buf,
    )
        .into_response()
}
