#![forbid(unsafe_code)]
//! Error types for the random-block manager.
//!
//! Defines `RbmError` and a `Result<T>` alias used throughout the workspace.
//! Includes errno mappings so an embedding daemon can surface POSIX codes.

use thiserror::Error;

/// Unified error type for all block-manager operations.
#[derive(Debug, Error)]
pub enum RbmError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt metadata at offset {offset}: {detail}")]
    Corruption { offset: u64, detail: String },

    #[error("invalid on-disk format: {0}")]
    Format(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("address out of range: {addr} (limit {limit})")]
    OutOfRange { addr: u64, limit: u64 },

    #[error("no space left on device")]
    NoSpace,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("permission denied")]
    PermissionDenied,
}

impl RbmError {
    /// Convert this error into a POSIX errno.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::Corruption { .. } => libc::EIO,
            Self::Format(_) | Self::InvalidConfig(_) => libc::EINVAL,
            Self::NotFound(_) => libc::ENOENT,
            Self::OutOfRange { .. } => libc::ERANGE,
            Self::NoSpace => libc::ENOSPC,
            Self::Cancelled => libc::ECANCELED,
            Self::PermissionDenied => libc::EACCES,
        }
    }
}

/// Result alias using `RbmError`.
pub type Result<T> = std::result::Result<T, RbmError>;
