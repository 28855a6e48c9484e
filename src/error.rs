//! Error types for vmlet.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using vmlet's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Caller-visible classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input (bad mount, bad annotation value). Never retried.
    Validation,
    /// Unknown container, sandbox, image, volume or domain.
    NotFound,
    /// Operation not valid in the current lifecycle state.
    InvalidState,
    /// Hypervisor, storage or metadata backend failure.
    Backend,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not found",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::Backend => "backend",
        };
        f.write_str(s)
    }
}

/// Errors that can occur in vmlet operations.
#[derive(Error, Debug)]
pub enum Error {
    // Input errors
    /// Malformed input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Invalid VM annotation value.
    #[error("invalid annotation {key}: {message}")]
    InvalidAnnotation {
        /// Annotation key.
        key: String,
        /// What is wrong with the value.
        message: String,
    },

    /// Invalid or unresolvable mount.
    #[error("invalid mount {}: {message}", host_path.display())]
    InvalidMount {
        /// Host path of the mount.
        host_path: PathBuf,
        /// What is wrong with it.
        message: String,
    },

    /// Malformed flexvolume definition.
    #[error("volume definition: {0}")]
    FlexVolume(#[from] vmlet_flexvolume::FlexVolumeError),

    // Lookup errors
    /// Container not found.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Sandbox not found.
    #[error("sandbox not found: {0}")]
    SandboxNotFound(String),

    /// Image not available locally.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// Domain not defined in the hypervisor.
    #[error("domain not found: {0}")]
    DomainNotFound(String),

    /// Storage pool or volume not found.
    #[error("storage {kind} not found: {name}")]
    StorageNotFound {
        /// "pool" or "volume".
        kind: &'static str,
        /// Name that was looked up.
        name: String,
    },

    // Lifecycle errors
    /// Container is in an invalid state for the requested operation.
    #[error("invalid container state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state.
        expected: String,
        /// Actual state.
        actual: String,
    },

    // Backend errors
    /// Hypervisor rejected or failed an operation.
    #[error("hypervisor error: {0}")]
    Hypervisor(String),

    /// Storage backend failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Metadata store failure.
    #[error("metadata error: {0}")]
    Metadata(String),

    /// Boot configuration image could not be produced.
    #[error("boot config error: {0}")]
    BootConfig(String),

    /// External command failed.
    #[error("command failed: {command}: {message}")]
    CommandFailed {
        /// The command that failed.
        command: String,
        /// Error message.
        message: String,
    },

    // Configuration errors
    /// Failed to load configuration.
    #[error("failed to load config: {0}")]
    ConfigLoad(String),

    /// Failed to save configuration.
    #[error("failed to save config: {0}")]
    ConfigSave(String),

    // IO errors
    /// IO error wrapper.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_)
            | Error::InvalidAnnotation { .. }
            | Error::InvalidMount { .. }
            | Error::FlexVolume(_)
            | Error::ConfigLoad(_) => ErrorKind::Validation,
            Error::ContainerNotFound(_)
            | Error::SandboxNotFound(_)
            | Error::ImageNotFound(_)
            | Error::DomainNotFound(_)
            | Error::StorageNotFound { .. } => ErrorKind::NotFound,
            Error::InvalidState { .. } => ErrorKind::InvalidState,
            Error::Hypervisor(_)
            | Error::Storage(_)
            | Error::Metadata(_)
            | Error::BootConfig(_)
            | Error::CommandFailed { .. }
            | Error::ConfigSave(_)
            | Error::Io(_) => ErrorKind::Backend,
        }
    }

    /// Whether this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Create a validation error with a message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an annotation error.
    pub fn invalid_annotation(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidAnnotation {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a mount error.
    pub fn invalid_mount(host_path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidMount {
            host_path: host_path.into(),
            message: message.into(),
        }
    }

    /// Create a hypervisor error with a message.
    pub fn hypervisor(msg: impl Into<String>) -> Self {
        Self::Hypervisor(msg.into())
    }

    /// Create a storage error with a message.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a metadata error with a message.
    pub fn metadata(msg: impl Into<String>) -> Self {
        Self::Metadata(msg.into())
    }

    /// Create a storage pool not found error.
    pub fn pool_not_found(name: impl Into<String>) -> Self {
        Self::StorageNotFound {
            kind: "pool",
            name: name.into(),
        }
    }

    /// Create a storage volume not found error.
    pub fn volume_not_found(name: impl Into<String>) -> Self {
        Self::StorageNotFound {
            kind: "volume",
            name: name.into(),
        }
    }

    /// Create a command failed error.
    pub fn command_failed(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(expected: impl Into<String>, actual: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Metadata(format!("record encoding: {}", e))
    }
}
