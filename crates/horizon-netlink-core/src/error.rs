//! Error types for the Horizon Netlink event loop.

use std::io;

/// The main error type for event loop operations.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    /// A readiness registration, poll or waker syscall failed.
    #[error("Event loop I/O error: {0}")]
    Io(#[from] io::Error),
    /// `run()` or `run_once()` was called from inside a loop callback.
    #[error("The event loop is already running")]
    AlreadyRunning,
    /// The handle has already been removed from the loop.
    #[error("Invalid or removed loop handle")]
    InvalidHandle,
}

impl LoopError {
    /// The OS error number behind this error, if there is one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Io(err) => err.raw_os_error(),
            Self::AlreadyRunning => Some(libc::EBUSY),
            Self::InvalidHandle => Some(libc::EBADF),
        }
    }
}

/// A specialized Result type for event loop operations.
pub type Result<T> = std::result::Result<T, LoopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_keeps_errno() {
        let err = LoopError::from(io::Error::from_raw_os_error(libc::EEXIST));
        assert_eq!(err.raw_os_error(), Some(libc::EEXIST));
        assert!(err.to_string().starts_with("Event loop I/O error"));
    }

    #[test]
    fn test_synthetic_errnos() {
        assert_eq!(LoopError::AlreadyRunning.raw_os_error(), Some(libc::EBUSY));
        assert_eq!(LoopError::InvalidHandle.raw_os_error(), Some(libc::EBADF));
    }
}
