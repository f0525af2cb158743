//! Readiness event types for the Horizon Netlink event loop.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// A set of readiness conditions a watcher subscribes to or reports.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PollEvents(u8);

impl PollEvents {
    /// No readiness.
    pub const NONE: Self = Self(0);
    /// The descriptor has data to read.
    pub const READABLE: Self = Self(0b01);
    /// The descriptor can accept a write.
    pub const WRITABLE: Self = Self(0b10);
    /// Both readable and writable.
    pub const BOTH: Self = Self(0b11);

    /// Whether the readable bit is set.
    pub fn is_readable(self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    /// Whether the writable bit is set.
    pub fn is_writable(self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    /// Whether no bit is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether every bit in `other` is also set in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Bits set in both `self` and `other`.
    pub fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub(crate) fn to_interest(self) -> Option<mio::Interest> {
        match (self.is_readable(), self.is_writable()) {
            (true, true) => Some(mio::Interest::READABLE | mio::Interest::WRITABLE),
            (true, false) => Some(mio::Interest::READABLE),
            (false, true) => Some(mio::Interest::WRITABLE),
            (false, false) => None,
        }
    }

    pub(crate) fn from_event(event: &mio::event::Event) -> Self {
        let mut events = Self::NONE;
        // Hang-ups surface as readable so the owner observes EOF or the error on read.
        if event.is_readable() || event.is_read_closed() {
            events |= Self::READABLE;
        }
        if event.is_writable() || event.is_write_closed() {
            events |= Self::WRITABLE;
        }
        events
    }
}

impl BitOr for PollEvents {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PollEvents {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for PollEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_readable(), self.is_writable()) {
            (true, true) => write!(f, "READABLE | WRITABLE"),
            (true, false) => write!(f, "READABLE"),
            (false, true) => write!(f, "WRITABLE"),
            (false, false) => write!(f, "NONE"),
        }
    }
}
