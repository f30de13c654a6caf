use crate::app_state::HttpServerState;
use crate::error::Error;
use crate::metrics;
use crate::relay_query::{QueryParams, QueryRequest};
use axum::extract::{rejection::QueryRejection, Query, State};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::{debug, error};

/// `GET|POST /?relay=<ws url>&filters=<json array>`
pub async fn handle_query(
    State(state): State<Arc<HttpServerState>>,
    params: Result<Query<QueryParams>, QueryRejection>,
) -> Response {
    let request = match params
        .map_err(|rejection| Error::invalid_query(rejection.body_text()))
        .and_then(|Query(params)| QueryRequest::from_params(&params))
    {
        Ok(request) => request,
        Err(e) => {
            metrics::relay_queries(e.outcome()).increment(1);
            return e.into_response();
        }
    };

    debug!(
        "Querying {} with {} filters",
        request.relay(),
        request.filters().len()
    );

    // Spawned so the relay connection still gets closed if this handler is
    // dropped on client disconnect.
    let token = state.cancellation_token.child_token();
    let _cancel_on_drop = token.clone().drop_guard();
    let bridge = state.bridge.clone();
    let query = tokio::spawn(async move { bridge.query(request, token).await });

    match query.await {
        Ok(Ok(result)) => result.into_response(),
        Ok(Err(e)) => e.into_response(),
        Err(e) => {
            error!("Relay query task failed: {}", e);
            Error::response_construction(e.to_string()).into_response()
        }
    }
}

pub async fn handle_health() -> &'static str {
    "OK"
}
