//! Bearer-token authentication.

use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use dormant_iam::Principal;

use crate::ApiState;
use crate::handlers::error_response;

/// The principal behind the request's `Authorization: Bearer` token.
#[derive(Debug, Clone)]
pub struct Caller(pub Principal);

impl FromRequestParts<ApiState> for Caller {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);

        let Some(token) = token else {
            return Err(error_response("missing bearer token", StatusCode::UNAUTHORIZED).into_response());
        };
        match state.principal_for_token(token) {
            Some(principal) => Ok(Caller(principal.clone())),
            None => {
                debug!(path = %parts.uri.path(), "unknown token");
                Err(error_response("unknown token", StatusCode::UNAUTHORIZED).into_response())
            }
        }
    }
}
