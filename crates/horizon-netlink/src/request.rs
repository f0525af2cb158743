//! Outbound datagrams and the requests that carry them through the send queue.

use std::fmt;

use bytes::Bytes;

use crate::addr::NetlinkAddr;
use crate::error::{OsError, Result, SocketError};

/// Callback invoked once with the outcome of a send.
pub type SendCallback = Box<dyn FnOnce(Result<()>)>;

/// Data for one outbound datagram.
///
/// A single buffer, or an ordered list of buffers gathered into one datagram.
/// The `Bytes` handles keep the data alive until the send's completion
/// callback has returned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// One contiguous buffer.
    Single(Bytes),
    /// Buffers sent back to back as one datagram.
    Gather(Vec<Bytes>),
}

impl Payload {
    /// Total number of bytes in the datagram.
    pub fn len(&self) -> usize {
        match self {
            Self::Single(buf) => buf.len(),
            Self::Gather(bufs) => bufs.iter().map(Bytes::len).sum(),
        }
    }

    /// Whether the datagram carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn into_buffers(self) -> Result<Vec<Bytes>> {
        match self {
            Self::Single(buf) => Ok(vec![buf]),
            Self::Gather(bufs) if bufs.is_empty() => Err(SocketError::InvalidData(
                "must be a buffer or a non-empty list of buffers",
            )),
            Self::Gather(bufs) => Ok(bufs),
        }
    }
}

impl From<Bytes> for Payload {
    fn from(buf: Bytes) -> Self {
        Self::Single(buf)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(buf: Vec<u8>) -> Self {
        Self::Single(Bytes::from(buf))
    }
}

impl From<&'static [u8]> for Payload {
    fn from(buf: &'static [u8]) -> Self {
        Self::Single(Bytes::from_static(buf))
    }
}

impl<const N: usize> From<&'static [u8; N]> for Payload {
    fn from(buf: &'static [u8; N]) -> Self {
        Self::Single(Bytes::from_static(buf))
    }
}

impl From<Vec<Bytes>> for Payload {
    fn from(bufs: Vec<Bytes>) -> Self {
        Self::Gather(bufs)
    }
}

/// How a request left the outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendStatus {
    /// The kernel accepted this many bytes.
    Sent(usize),
    /// `sendmsg` failed with this errno.
    Failed(i32),
}

/// One queued datagram.
///
/// Moves from the outbound queue to the completed queue intact, and is
/// dropped (releasing its buffers) only after its callback returns.
pub(crate) struct OutboundRequest {
    pub dest: NetlinkAddr,
    pub buffers: Vec<Bytes>,
    callback: Option<SendCallback>,
    pub status: Option<SendStatus>,
}

impl OutboundRequest {
    pub fn new(dest: NetlinkAddr, buffers: Vec<Bytes>, callback: SendCallback) -> Self {
        Self {
            dest,
            buffers,
            callback: Some(callback),
            status: None,
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.iter().map(Bytes::len).sum()
    }

    /// Run the completion callback. The buffers are released when `self`
    /// drops, after the callback returns.
    pub fn complete(mut self) {
        let outcome = match self.status {
            Some(SendStatus::Sent(_)) => Ok(()),
            Some(SendStatus::Failed(errno)) => Err(SocketError::Os(OsError::new(
                errno,
                "sendmsg",
                "Error when sending Netlink message",
            ))),
            None => return,
        };
        if let Some(callback) = self.callback.take() {
            callback(outcome);
        }
    }
}

impl fmt::Debug for OutboundRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundRequest")
            .field("dest", &self.dest)
            .field("buffers", &self.buffers.len())
            .field("len", &self.len())
            .field("status", &self.status)
            .finish()
    }
}
