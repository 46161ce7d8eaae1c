use axum::http::StatusCode;
use thiserror::Error;

use dormant_provider::ProviderError;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("no default world configured")]
    NoDefaultWorld,

    #[error("invalid request signature: {0}")]
    BadSignature(String),

    #[error("malformed interaction: {0}")]
    Malformed(String),

    #[error("interactions are not enabled")]
    InteractionsDisabled,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl LaunchError {
    pub fn status(&self) -> StatusCode {
        match self {
            LaunchError::NoDefaultWorld => StatusCode::NOT_FOUND,
            LaunchError::BadSignature(_) => StatusCode::UNAUTHORIZED,
            LaunchError::Malformed(_) => StatusCode::BAD_REQUEST,
            LaunchError::InteractionsDisabled => StatusCode::NOT_FOUND,
            LaunchError::Provider(e) => match e {
                ProviderError::AccessDenied(_) => StatusCode::FORBIDDEN,
                ProviderError::NotFound(_) => StatusCode::NOT_FOUND,
                ProviderError::Invalid(_) => StatusCode::BAD_REQUEST,
                ProviderError::Conflict(_) => StatusCode::CONFLICT,
                ProviderError::Transient(_) | ProviderError::Http { .. } => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            },
        }
    }
}
