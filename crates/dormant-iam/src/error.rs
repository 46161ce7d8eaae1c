use thiserror::Error;

use crate::grant::{Action, ResourceScope};

pub type IamResult<T> = Result<T, IamError>;

#[derive(Debug, Error)]
pub enum IamError {
    #[error("access denied: {principal} may not {action} on {scope}")]
    AccessDenied {
        principal: String,
        action: Action,
        scope: ResourceScope,
    },

    #[error("wildcard scope rejected: {0}")]
    WildcardScope(String),

    #[error("unknown principal")]
    UnknownPrincipal,
}
