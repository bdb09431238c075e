//! Error taxonomy shared by the control protocol and the context core.
//!
//! Control-plane callers ultimately see errno values, so every variant
//! maps onto an `axerrno::LinuxError`. The mapping is lossy on purpose:
//! the protocol never had more resolution than errno either.

use alloc::string::String;
use axerrno::LinuxError;

/// Errors produced by the tracer control core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Command issued against a handle of the wrong kind.
    InvalidHandle,
    /// Duplicate name at an attach point (context field, event, tracker id).
    AlreadyExists(String),
    /// Named entity absent at this attach point.
    NotFound(String),
    /// Allocation failed on the control path.
    OutOfMemory,
    /// An optional kernel symbol could not be resolved.
    DependencyUnavailable(&'static str),
    /// Reserved or placeholder protocol value.
    NotImplemented(&'static str),
    /// A length-capped payload exceeded its cap.
    SizeExceeded { len: usize, max: usize },
    /// Caller and tracer disagree on the ABI major version.
    VersionMismatch { expected: u32, got: u32 },
    /// Malformed payload or argument.
    InvalidArgument(&'static str),
    /// Command number outside the published namespace.
    UnknownCommand(u32),
}

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    /// Map to the errno a control-plane caller would observe.
    pub fn to_errno(&self) -> LinuxError {
        match self {
            Self::InvalidHandle => LinuxError::EBADF,
            Self::AlreadyExists(_) => LinuxError::EEXIST,
            Self::NotFound(_) => LinuxError::ENOENT,
            Self::OutOfMemory => LinuxError::ENOMEM,
            Self::DependencyUnavailable(_) => LinuxError::ENOENT,
            Self::NotImplemented(_) => LinuxError::ENOSYS,
            Self::SizeExceeded { .. } => LinuxError::EINVAL,
            Self::VersionMismatch { .. } => LinuxError::EINVAL,
            Self::InvalidArgument(_) => LinuxError::EINVAL,
            Self::UnknownCommand(_) => LinuxError::ENOSYS,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidHandle => write!(f, "Command issued on wrong handle kind"),
            Self::AlreadyExists(name) => write!(f, "Name already exists: {}", name),
            Self::NotFound(name) => write!(f, "Not found: {}", name),
            Self::OutOfMemory => write!(f, "Out of memory"),
            Self::DependencyUnavailable(sym) => {
                write!(f, "Required symbol unavailable: {}", sym)
            }
            Self::NotImplemented(what) => write!(f, "Not implemented: {}", what),
            Self::SizeExceeded { len, max } => {
                write!(f, "Size exceeded: {} > {}", len, max)
            }
            Self::VersionMismatch { expected, got } => {
                write!(f, "ABI major version mismatch: expected {}, got {}", expected, got)
            }
            Self::InvalidArgument(what) => write!(f, "Invalid argument: {}", what),
            Self::UnknownCommand(cmd) => write!(f, "Unknown command: {:#x}", cmd),
        }
    }
}

impl core::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(Error::InvalidHandle.to_errno(), LinuxError::EBADF);
        assert_eq!(
            Error::AlreadyExists(String::from("hostname")).to_errno(),
            LinuxError::EEXIST
        );
        assert_eq!(Error::NotImplemented("calibrate").to_errno(), LinuxError::ENOSYS);
        assert_eq!(
            Error::SizeExceeded { len: 65537, max: 65536 }.to_errno(),
            LinuxError::EINVAL
        );
    }
}
