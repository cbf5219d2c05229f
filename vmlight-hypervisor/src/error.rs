//! Error types for the vmlight core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::BackendType;

/// Errors that can occur while provisioning or managing instances.
#[derive(Error, Debug)]
pub enum HypervisorError {
    // =========================================================================
    // Precondition errors (reported before any side effect)
    // =========================================================================
    /// Image was not found in the image store.
    #[error("Image {0} does not exist")]
    ImageNotFound(String),

    /// More than one image file shares the name.
    #[error("Multiple images named {0} found: {1}")]
    AmbiguousImage(String, String),

    /// SSH key was not found in the key store.
    #[error("Key with name {0} not found in the store")]
    SshKeyNotFound(String),

    /// No instance directory carries this ID.
    #[error("VM with ID {0} not found")]
    InstanceNotFound(u32),

    /// The hypervisor does not list a domain for the instance.
    #[error("No running domain named {0}")]
    DomainNotFound(String),

    /// Disk container extension has no backend format token.
    #[error("Unsupported disk format: {0}")]
    UnsupportedDiskFormat(String),

    /// No adapter is available for this backend type.
    #[error("Unsupported VM type: {0}")]
    UnsupportedBackend(BackendType),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Deployment request failed validation.
    #[error("Invalid deployment request: {0}")]
    InvalidRequest(String),

    /// SSH key line is not `type material name`.
    #[error("Malformed SSH key line: {0}")]
    InvalidKeyLine(String),

    /// A named resource already exists.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Requested disk size is smaller than the image payload.
    #[error("Requested disk size {requested} bytes is smaller than the image size {minimum} bytes")]
    DiskTooSmall { requested: u64, minimum: u64 },

    /// An autostart entry with the same name is already registered.
    #[error("Autostart entry already exists: {}", .0.display())]
    AutostartConflict(PathBuf),

    /// Operation requires a stopped instance.
    #[error("VM with ID {0} is running")]
    InstanceRunning(u32),

    // =========================================================================
    // External tool failures
    // =========================================================================
    /// Failed to spawn a subordinate process.
    #[error("Failed to execute {command}: {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Subordinate process exited unsuccessfully.
    #[error("Command failed: {command}: return code {}{}", display_code(.code), display_stderr(.stderr))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Subordinate process did not finish in time and was killed.
    #[error("Command timed out after {secs}s: {command}")]
    CommandTimeout { command: String, secs: u64 },

    /// Unexpected tool output.
    #[error("Failed to parse output of {command}: {reason}")]
    ParseFailed { command: String, reason: String },

    // =========================================================================
    // Lifecycle and operator
    // =========================================================================
    /// A lifecycle operation failed; wraps the backend error.
    #[error("Failed to {operation} VM {id}: {source}")]
    Operation {
        operation: &'static str,
        id: u32,
        #[source]
        source: Box<HypervisorError>,
    },

    /// Operator did not type the confirmation phrase.
    #[error("Instance deletion aborted by user")]
    DeletionAborted,

    /// Deployment was interrupted before the given step.
    #[error("Deployment interrupted before step: {0}")]
    Interrupted(&'static str),

    /// Filesystem error with context.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

fn display_stderr(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" ({})", stderr)
    }
}

impl HypervisorError {
    /// Build an I/O error with a human readable context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Annotate a backend error with the lifecycle operation that hit it.
    pub fn during(self, operation: &'static str, id: u32) -> Self {
        Self::Operation {
            operation,
            id,
            source: Box::new(self),
        }
    }
}

/// Result type alias for vmlight operations.
pub type Result<T> = std::result::Result<T, HypervisorError>;
