use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

use crate::error::LaunchError;
use crate::interaction::{
    InteractionVerifier, SIGNATURE_HEADER, TIMESTAMP_HEADER, handle_interaction,
};
use crate::launch::Launcher;

/// Shared state for launcher handlers.
#[derive(Clone)]
pub struct LauncherState {
    pub launcher: Arc<Launcher>,
    /// `None` disables `/interactions`.
    pub verifier: Option<Arc<InteractionVerifier>>,
}

pub fn build_router(state: LauncherState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST]);

    Router::new()
        .route("/launch", post(launch_default))
        .route("/launch/{world}", post(launch_world))
        .route("/interactions", post(interactions))
        .layer(cors)
        .with_state(state)
}

fn error_response(err: &LaunchError) -> Response {
    let status = err.status();
    if status.is_server_error() {
        warn!(error = %err, "launch failed");
    } else {
        debug!(error = %err, status = status.as_u16(), "launch rejected");
    }
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

/// POST /launch
async fn launch_default(State(state): State<LauncherState>) -> Response {
    let world = match state.launcher.default_world() {
        Ok(world) => world.to_string(),
        Err(e) => return error_response(&e),
    };
    launch(&state, &world).await
}

/// POST /launch/{world}
async fn launch_world(State(state): State<LauncherState>, Path(world): Path<String>) -> Response {
    launch(&state, &world).await
}

async fn launch(state: &LauncherState, world: &str) -> Response {
    match state.launcher.launch(world).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /interactions
async fn interactions(
    State(state): State<LauncherState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(verifier) = &state.verifier else {
        return error_response(&LaunchError::InteractionsDisabled);
    };

    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let (Some(signature), Some(timestamp)) = (header(SIGNATURE_HEADER), header(TIMESTAMP_HEADER))
    else {
        return error_response(&LaunchError::BadSignature("missing signature headers".into()));
    };
    if let Err(e) = verifier.verify(timestamp, &body, signature) {
        return error_response(&e);
    }

    match handle_interaction(&state.launcher, &body).await {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => error_response(&e),
    }
}
