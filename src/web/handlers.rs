use axum::{
    extract::State,
    http::{Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::error;

use super::AppState;

/// Prometheus metrics endpoint handler
pub async fn scrape_metrics(State(state): State<AppState>) -> Response {
    match state.collector.scrape().await {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            output,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Prometheus: error collecting metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Unsupported method on the metrics path
pub async fn method_not_implemented() -> StatusCode {
    StatusCode::NOT_IMPLEMENTED
}

/// Any other path
pub async fn fallback(method: Method) -> StatusCode {
    if method == Method::GET {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::NOT_IMPLEMENTED
    }
}
