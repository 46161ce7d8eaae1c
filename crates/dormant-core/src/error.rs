//! Configuration and topology validation errors.

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating world configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid identifier {0:?}: use ascii letters, digits, '-' or '_'")]
    InvalidIdentifier(String),

    #[error("world {0} declared more than once")]
    DuplicateWorld(String),

    #[error("world {0} declares no game ports")]
    NoPorts(String),

    #[error("world {world}: port {port} declared more than once")]
    DuplicatePort { world: String, port: u16 },

    #[error("world {world}: port {port} may not be opened to the internet")]
    ReservedPort { world: String, port: u16 },

    #[error("world {0}: volume owned by root requires allow_root = true")]
    RootIdentity(String),

    #[error("worlds {first} and {second} share volume path {path}")]
    SharedMountPath {
        path: String,
        first: String,
        second: String,
    },

    #[error("world {world}: invalid volume permissions {value:?}")]
    InvalidPermissions { world: String, value: String },

    #[error("world {world}: {cpu} cpu units with {memory_mib} MiB is not a valid task size")]
    InvalidTaskSize {
        world: String,
        cpu: u32,
        memory_mib: u32,
    },

    #[error("world {0}: dns zone and record name are required")]
    MissingDns(String),

    #[error("world {world}: invalid duration for {field}: {value:?}")]
    InvalidDuration {
        world: String,
        field: &'static str,
        value: String,
    },

    #[error("world {world}: {reason}")]
    InvalidScaling { world: String, reason: String },

    #[error("world {0} has no capacity provider enabled")]
    NoCapacity(String),
}
