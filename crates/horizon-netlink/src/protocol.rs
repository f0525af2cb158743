//! Netlink protocol numbers.

use std::fmt;

/// The netlink protocol a socket talks, selecting the kernel subsystem.
///
/// Any 32-bit value is accepted; the constants cover the families the kernel
/// defines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Protocol(u32);

impl Protocol {
    /// Routing and link updates.
    pub const ROUTE: Self = Self(0);
    /// Reserved for user mode socket protocols.
    pub const USERSOCK: Self = Self(2);
    /// Unused, formerly ip_queue.
    pub const FIREWALL: Self = Self(3);
    /// Socket monitoring.
    pub const SOCK_DIAG: Self = Self(4);
    /// Netfilter/iptables ULOG.
    pub const NFLOG: Self = Self(5);
    /// IPsec.
    pub const XFRM: Self = Self(6);
    /// SELinux event notifications.
    pub const SELINUX: Self = Self(7);
    /// Open-iSCSI.
    pub const ISCSI: Self = Self(8);
    /// Auditing.
    pub const AUDIT: Self = Self(9);
    pub const FIB_LOOKUP: Self = Self(10);
    pub const CONNECTOR: Self = Self(11);
    /// Netfilter subsystem.
    pub const NETFILTER: Self = Self(12);
    pub const IP6_FW: Self = Self(13);
    /// DECnet routing messages.
    pub const DNRTMSG: Self = Self(14);
    /// Kernel messages to userspace.
    pub const KOBJECT_UEVENT: Self = Self(15);
    /// Generic netlink.
    pub const GENERIC: Self = Self(16);
    /// SCSI transports.
    pub const SCSITRANSPORT: Self = Self(18);
    pub const ECRYPTFS: Self = Self(19);
    pub const RDMA: Self = Self(20);
    /// Crypto layer.
    pub const CRYPTO: Self = Self(21);
    /// SMC monitoring.
    pub const SMC: Self = Self(22);

    /// Wrap a raw protocol number.
    pub const fn new(protocol: u32) -> Self {
        Self(protocol)
    }

    /// The raw protocol number.
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// The kernel name of a known protocol.
    pub fn name(self) -> Option<&'static str> {
        let name = match self.0 {
            0 => "ROUTE",
            2 => "USERSOCK",
            3 => "FIREWALL",
            4 => "SOCK_DIAG",
            5 => "NFLOG",
            6 => "XFRM",
            7 => "SELINUX",
            8 => "ISCSI",
            9 => "AUDIT",
            10 => "FIB_LOOKUP",
            11 => "CONNECTOR",
            12 => "NETFILTER",
            13 => "IP6_FW",
            14 => "DNRTMSG",
            15 => "KOBJECT_UEVENT",
            16 => "GENERIC",
            18 => "SCSITRANSPORT",
            19 => "ECRYPTFS",
            20 => "RDMA",
            21 => "CRYPTO",
            22 => "SMC",
            _ => return None,
        };
        Some(name)
    }
}

impl From<u32> for Protocol {
    fn from(protocol: u32) -> Self {
        Self(protocol)
    }
}

impl From<Protocol> for u32 {
    fn from(protocol: Protocol) -> Self {
        protocol.0
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "NETLINK_{name}"),
            None => write!(f, "netlink protocol {}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_match_kernel() {
        assert_eq!(Protocol::ROUTE.as_u32(), libc::NETLINK_ROUTE as u32);
        assert_eq!(Protocol::USERSOCK.as_u32(), libc::NETLINK_USERSOCK as u32);
        assert_eq!(Protocol::GENERIC.as_u32(), libc::NETLINK_GENERIC as u32);
        assert_eq!(Protocol::AUDIT.as_u32(), libc::NETLINK_AUDIT as u32);
    }

    #[test]
    fn test_display() {
        assert_eq!(Protocol::GENERIC.to_string(), "NETLINK_GENERIC");
        assert_eq!(Protocol::new(31).to_string(), "netlink protocol 31");
        assert_eq!(Protocol::from(2), Protocol::USERSOCK);
    }
}
