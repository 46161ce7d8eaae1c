//! Provider error taxonomy.

use thiserror::Error;

use dormant_iam::IamError;
use dormant_state::StateError;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Temporary failure; the same call may succeed later.
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("{0}")]
    AccessDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A conditional write lost to another actor.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("provider returned {status}: {message}")]
    Http { status: u16, message: String },
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Transient(_) => true,
            ProviderError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(self, ProviderError::AccessDenied(_))
    }
}

impl From<StateError> for ProviderError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound(what) => ProviderError::NotFound(what),
            StateError::RevisionConflict { .. } => ProviderError::Conflict(e.to_string()),
            StateError::InvalidDesiredCount(_) => ProviderError::Invalid(e.to_string()),
            // Storage-level failures (busy database, IO) may clear up.
            other => ProviderError::Transient(other.to_string()),
        }
    }
}

impl From<IamError> for ProviderError {
    fn from(e: IamError) -> Self {
        match e {
            IamError::AccessDenied { .. } | IamError::UnknownPrincipal => {
                ProviderError::AccessDenied(e.to_string())
            }
            IamError::WildcardScope(_) => ProviderError::Invalid(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ProviderError::Transient("busy".into()).is_transient());
        assert!(ProviderError::Http { status: 503, message: String::new() }.is_transient());
        assert!(ProviderError::Http { status: 429, message: String::new() }.is_transient());
        assert!(!ProviderError::Http { status: 403, message: String::new() }.is_transient());
        assert!(!ProviderError::AccessDenied("no".into()).is_transient());
        assert!(!ProviderError::Conflict("lost".into()).is_transient());
    }

    #[test]
    fn state_errors_map_by_kind() {
        let e: ProviderError = StateError::NotFound("w".into()).into();
        assert!(matches!(e, ProviderError::NotFound(_)));

        let e: ProviderError = StateError::RevisionConflict {
            world: "w".into(),
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(matches!(e, ProviderError::Conflict(_)));

        let e: ProviderError = StateError::Transaction("locked".into()).into();
        assert!(e.is_transient());
    }
}
