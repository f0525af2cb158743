//! Netlink socket addresses.

use std::fmt;

/// A netlink endpoint: a port id and a multicast group bitmask.
///
/// Port 0 addresses the kernel when sending. When binding, port 0 lets the
/// kernel assign a port.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct NetlinkAddr {
    /// The port id (`nl_pid`).
    pub port: u32,
    /// The multicast group bitmask (`nl_groups`).
    pub groups: u32,
}

impl NetlinkAddr {
    /// The kernel's address.
    pub const KERNEL: Self = Self { port: 0, groups: 0 };

    /// Create an address from a port and a groups bitmask.
    pub const fn new(port: u32, groups: u32) -> Self {
        Self { port, groups }
    }

    /// An address with no multicast groups.
    pub const fn port(port: u32) -> Self {
        Self { port, groups: 0 }
    }

    pub(crate) fn to_raw(self) -> libc::sockaddr_nl {
        // SAFETY: sockaddr_nl is plain old data; all-zero is a valid value.
        let mut raw: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        raw.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        raw.nl_pid = self.port;
        raw.nl_groups = self.groups;
        raw
    }

    pub(crate) fn from_raw(raw: &libc::sockaddr_nl) -> Self {
        Self {
            port: raw.nl_pid,
            groups: raw.nl_groups,
        }
    }
}

impl fmt::Display for NetlinkAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:#x}", self.port, self.groups)
    }
}
