use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed {what}: {line}")]
    Parse { what: &'static str, line: String },

    /// A counter-based probe needs one more observation.
    #[error("no baseline yet for {0}")]
    NoBaseline(&'static str),

    #[error("address lookup failed: {0}")]
    Lookup(String),
}
