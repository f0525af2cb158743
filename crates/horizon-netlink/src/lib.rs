//! Non-blocking netlink datagram sockets for Horizon Netlink.
//!
//! This crate exposes a raw netlink socket driven by the
//! [`horizon_netlink_core`] event loop:
//!
//! - **Sending**: Datagrams are queued in order and sent as soon as the
//!   kernel accepts them. Each send's callback runs once, on a later loop
//!   iteration, in submission order.
//! - **Receiving**: Readable events deliver each datagram with its source
//!   address. Buffers are sized by peeking (the default) or fixed, in which
//!   case oversized datagrams are reported as truncated.
//! - **Membership and options**: Multicast groups, `SO_RCVBUF`/`SO_SNDBUF`,
//!   and the bound address.
//!
//! Message framing (headers, attributes, acknowledgements) is left to the
//! caller; payloads are opaque bytes.
//!
//! # Example
//!
//! ```no_run
//! use horizon_netlink::{EventLoop, NetlinkAddr, NetlinkSocket, Protocol, SocketConfig};
//!
//! let event_loop = EventLoop::new().unwrap();
//! let handle = event_loop.handle();
//!
//! let server = NetlinkSocket::new(
//!     &handle,
//!     SocketConfig::new(Protocol::USERSOCK).bind_to(NetlinkAddr::port(5000)),
//! )
//! .unwrap();
//! let peer = server.downgrade();
//! server.on_message(move |payload, info| {
//!     // Echo every datagram back to its sender.
//!     if let Some(server) = peer.upgrade() {
//!         server.post(info.source, payload).unwrap();
//!     }
//! });
//!
//! event_loop.run().unwrap();
//! ```
//!
//! # Threading
//!
//! Sockets are `!Send`: every callback runs on the loop thread. Use
//! [`RemoteHandle`] to hand work to the loop from other threads.

mod addr;
mod config;
mod error;
pub mod logging;
mod port;
mod protocol;
mod recv;
mod request;
mod send;
mod socket;
mod state;
mod sys;

pub use addr::NetlinkAddr;
pub use config::{
    DEFAULT_MAX_RECV_PER_EVENT, FALLBACK_BUFFER_SIZE, LocalAddress, RecvPolicy, SocketConfig,
};
pub use error::{OsError, Result, SocketError};
pub use port::{MAX_BIND_ATTEMPTS, generate_local_port};
pub use protocol::Protocol;
pub use request::{Payload, SendCallback};
pub use socket::{MessageInfo, NetlinkSocket, WeakSocket};
pub use state::SocketState;

// Re-export the event loop so users need only this crate.
pub use horizon_netlink_core::{EventLoop, LoopConfig, LoopError, LoopHandle, RemoteHandle, Timer};
