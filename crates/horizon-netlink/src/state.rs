//! State enumeration for netlink sockets.

/// State of a netlink socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SocketState {
    /// Socket is open but not bound.
    #[default]
    Created,
    /// Socket has been bound at least once.
    Bound,
    /// Socket is closed.
    Closed,
}

impl std::fmt::Display for SocketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SocketState::Created => write!(f, "Created"),
            SocketState::Bound => write!(f, "Bound"),
            SocketState::Closed => write!(f, "Closed"),
        }
    }
}
