//! HTTP routes: every method and path reaches the query handler.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use replgate_core::Query;

use super::gateway::{Gateway, GatewayError};

const BAD_REQUEST: &str = "Bad request\n";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

/// Every path reaches the query handler.
pub fn build_router(state: AppState) -> Router {
    Router::new().fallback(query).with_state(state)
}

/// `POST <any path>` with a JSON [`Query`] body.
pub async fn query(State(state): State<AppState>, method: Method, body: Bytes) -> Response {
    if method != Method::POST {
        return (StatusCode::BAD_REQUEST, BAD_REQUEST).into_response();
    }

    let query: Query = match serde_json::from_slice(&body) {
        Ok(query) => query,
        Err(e) => {
            warn!(error = %e, "Bad payload");
            return (StatusCode::BAD_REQUEST, BAD_REQUEST).into_response();
        }
    };

    match state.gateway.handle(query).await {
        Ok(reply) => (StatusCode::OK, reply.body().to_string()).into_response(),
        Err(e @ GatewayError::Unavailable) => {
            (StatusCode::SERVICE_UNAVAILABLE, format!("{e}\n")).into_response()
        }
        Err(e) => {
            error!(error = %e, "Request failed");
            (StatusCode::SERVICE_UNAVAILABLE, format!("{e}\n")).into_response()
        }
    }
}
