//! Error types for netlink sockets.

use std::io;

use horizon_netlink_core::LoopError;
use nix::errno::Errno;

/// A failed syscall, described the way the socket reports it to callers and
/// handlers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct OsError {
    /// The raw error number.
    pub errno: i32,
    /// Symbolic errno name, e.g. `EADDRINUSE`.
    pub code: String,
    /// The syscall that failed.
    pub syscall: &'static str,
    /// Operation description followed by the errno text.
    pub message: String,
}

impl OsError {
    /// Describe `errno` as the failure of `syscall` while doing `description`.
    pub fn new(errno: i32, syscall: &'static str, description: &str) -> Self {
        let resolved = Errno::from_raw(errno);
        Self {
            errno,
            code: format!("{resolved:?}"),
            syscall,
            message: format!("{description}: {}", resolved.desc()),
        }
    }

    /// Build from an I/O error, falling back to `EIO` when it carries no errno.
    pub fn from_io(err: &io::Error, syscall: &'static str, description: &str) -> Self {
        Self::new(err.raw_os_error().unwrap_or(libc::EIO), syscall, description)
    }

    /// Build from an event loop registration failure.
    pub(crate) fn from_loop(err: &LoopError, description: &str) -> Self {
        Self::new(err.raw_os_error().unwrap_or(libc::EIO), "epoll_ctl", description)
    }

    /// Whether this is `EADDRINUSE`.
    pub fn is_addr_in_use(&self) -> bool {
        self.errno == libc::EADDRINUSE
    }
}

/// Errors produced by [`NetlinkSocket`](crate::NetlinkSocket) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SocketError {
    /// The socket has been closed.
    #[error("Netlink socket is closed")]
    Closed,
    /// The outbound data was not a buffer or a non-empty list of buffers.
    #[error("Invalid data -- {0}")]
    InvalidData(&'static str),
    /// A syscall failed.
    #[error(transparent)]
    Os(#[from] OsError),
    /// No generated local port could be bound.
    #[error("Couldn't find a free address after {attempts} attempts")]
    AddressExhausted {
        /// How many ports were tried.
        attempts: usize,
    },
}

impl SocketError {
    /// The OS error number, if this error came from a syscall.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Os(err) => Some(err.errno),
            _ => None,
        }
    }

    /// The failing syscall, if this error came from one.
    pub fn syscall(&self) -> Option<&'static str> {
        match self {
            Self::Os(err) => Some(err.syscall),
            _ => None,
        }
    }
}

/// A specialized Result type for netlink socket operations.
pub type Result<T> = std::result::Result<T, SocketError>;
