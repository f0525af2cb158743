//! Configuration types for netlink sockets.

use std::num::NonZeroUsize;

use crate::addr::NetlinkAddr;
use crate::protocol::Protocol;

/// Kernel buffer size requested when a size of zero or less is asked for.
pub const FALLBACK_BUFFER_SIZE: i32 = 32768;

/// Default cap on datagrams received per readable event.
pub const DEFAULT_MAX_RECV_PER_EVENT: usize = 32;

/// How receive buffers are sized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RecvPolicy {
    /// Peek each datagram for its size and allocate exactly that much.
    /// Datagrams are never truncated.
    #[default]
    AutoSize,
    /// Allocate a fixed number of bytes. Longer datagrams are truncated and
    /// reported with their wire size.
    Fixed(NonZeroUsize),
}

impl RecvPolicy {
    /// Fixed buffer size used when peeking is disabled without a size.
    pub const DEFAULT_FIXED: NonZeroUsize = NonZeroUsize::new(4096).unwrap();

    /// A fixed policy of `size` bytes; zero selects auto-size.
    pub fn fixed(size: usize) -> Self {
        Self::from(size)
    }

    /// The fixed buffer size, or 0 for auto-size.
    pub fn buffer_size(self) -> usize {
        match self {
            Self::AutoSize => 0,
            Self::Fixed(size) => size.get(),
        }
    }
}

impl From<usize> for RecvPolicy {
    fn from(size: usize) -> Self {
        NonZeroUsize::new(size).map_or(Self::AutoSize, Self::Fixed)
    }
}

/// Local address to bind to right after creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LocalAddress {
    /// Leave the socket unbound. It does not keep the loop alive until bound.
    #[default]
    Unbound,
    /// Bind to this exact address.
    Fixed(NetlinkAddr),
    /// Bind to a generated port, retrying while the port is taken.
    Auto {
        /// Multicast groups to bind with.
        groups: u32,
    },
}

/// Configuration for a netlink socket.
#[derive(Clone, Debug)]
pub struct SocketConfig {
    /// The netlink protocol.
    pub protocol: Protocol,
    /// Receive buffer sizing.
    pub recv_policy: RecvPolicy,
    /// Maximum datagrams received per readable event.
    pub max_recv_per_event: usize,
    /// `SO_RCVBUF` to apply after creation.
    pub recv_buffer_size: Option<i32>,
    /// `SO_SNDBUF` to apply after creation.
    pub send_buffer_size: Option<i32>,
    /// Local address to bind after creation.
    pub local: LocalAddress,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self::new(Protocol::ROUTE)
    }
}

impl SocketConfig {
    /// Create a configuration for `protocol` with default settings.
    pub fn new(protocol: impl Into<Protocol>) -> Self {
        Self {
            protocol: protocol.into(),
            recv_policy: RecvPolicy::AutoSize,
            max_recv_per_event: DEFAULT_MAX_RECV_PER_EVENT,
            recv_buffer_size: None,
            send_buffer_size: None,
            local: LocalAddress::Unbound,
        }
    }

    /// Set the receive buffer policy.
    pub fn recv_policy(mut self, policy: impl Into<RecvPolicy>) -> Self {
        self.recv_policy = policy.into();
        self
    }

    /// Set the receive cap per readable event. Zero is treated as one.
    pub fn max_recv_per_event(mut self, count: usize) -> Self {
        self.max_recv_per_event = count.max(1);
        self
    }

    /// Set `SO_RCVBUF`.
    pub fn recv_buffer_size(mut self, size: i32) -> Self {
        self.recv_buffer_size = Some(size);
        self
    }

    /// Set `SO_SNDBUF`.
    pub fn send_buffer_size(mut self, size: i32) -> Self {
        self.send_buffer_size = Some(size);
        self
    }

    /// Bind to `addr` after creation.
    pub fn bind_to(mut self, addr: NetlinkAddr) -> Self {
        self.local = LocalAddress::Fixed(addr);
        self
    }

    /// Bind to a generated port after creation.
    pub fn bind_auto(mut self, groups: u32) -> Self {
        self.local = LocalAddress::Auto { groups };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = SocketConfig::new(Protocol::GENERIC)
            .recv_policy(2usize)
            .max_recv_per_event(0)
            .recv_buffer_size(65536)
            .bind_to(NetlinkAddr::new(100, 1));

        assert_eq!(config.protocol, Protocol::GENERIC);
        assert_eq!(config.recv_policy.buffer_size(), 2);
        assert_eq!(config.max_recv_per_event, 1);
        assert_eq!(config.recv_buffer_size, Some(65536));
        assert_eq!(config.send_buffer_size, None);
        assert_eq!(config.local, LocalAddress::Fixed(NetlinkAddr::new(100, 1)));
    }

    #[test]
    fn test_defaults() {
        let config = SocketConfig::default();
        assert_eq!(config.protocol, Protocol::ROUTE);
        assert_eq!(config.recv_policy, RecvPolicy::AutoSize);
        assert_eq!(config.max_recv_per_event, 32);
        assert_eq!(config.local, LocalAddress::Unbound);
    }

    #[test]
    fn test_recv_policy_from_size() {
        assert_eq!(RecvPolicy::from(0), RecvPolicy::AutoSize);
        assert_eq!(RecvPolicy::fixed(4096), RecvPolicy::Fixed(RecvPolicy::DEFAULT_FIXED));
        assert_eq!(RecvPolicy::AutoSize.buffer_size(), 0);
    }
}
