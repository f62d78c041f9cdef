//! Error taxonomy for the viewer API.
//!
//! Every fallible viewer call returns one of a small closed set of errors.
//! Each variant maps to a stable negative integer so provider status values
//! carried inside reply packets can be converted back into the same type.

use thiserror::Error;

/// Errors reported by the viewer, synchronously or through completions.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewerError {
    /// A handle or argument is invalid, or the handle is in the wrong state.
    #[error("invalid parameter")]
    InvalidParameter,

    /// An allocation or resource reservation failed.
    #[error("out of memory")]
    OutOfMemory,

    /// A descriptor or framebuffer file could not be loaded.
    #[error("I/O error")]
    IoError,

    /// The request could not be built or sent, or the provider went away.
    #[error("fault")]
    Fault,

    /// A request of the same kind is already outstanding.
    #[error("resource busy")]
    Busy,

    /// The requested state is already current.
    #[error("already exists")]
    AlreadyExist,

    /// The instance is owned by the provider, not by this client.
    #[error("permission denied")]
    PermissionDenied,

    /// An in-flight creation was superseded by a delete.
    #[error("canceled")]
    Canceled,

    /// The operation is intentionally unavailable in this build.
    #[error("not supported")]
    NotSupported,
}

impl ViewerError {
    /// Stable integer code for this error (always negative).
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::InvalidParameter => -22,
            Self::OutOfMemory => -12,
            Self::IoError => -5,
            Self::Fault => -14,
            Self::Busy => -16,
            Self::AlreadyExist => -17,
            Self::PermissionDenied => -1,
            Self::Canceled => -125,
            Self::NotSupported => -95,
        }
    }

    /// Convert an integer status into an error.
    ///
    /// Unknown negative codes collapse to [`ViewerError::Fault`].
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match code {
            -22 => Self::InvalidParameter,
            -12 => Self::OutOfMemory,
            -5 => Self::IoError,
            -16 => Self::Busy,
            -17 => Self::AlreadyExist,
            -1 | -13 => Self::PermissionDenied,
            -125 => Self::Canceled,
            -95 => Self::NotSupported,
            _ => Self::Fault,
        }
    }

    /// Interpret a provider status: non-negative values are success.
    pub fn check(status: i32) -> Result<i32> {
        if status < 0 {
            Err(Self::from_code(status))
        } else {
            Ok(status)
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ViewerError>;
