//! Receive engine.
//!
//! Each readable event receives up to `max_recv_per_event` datagrams so a
//! flooding peer cannot starve the rest of the loop.
//!
//! With [`RecvPolicy::AutoSize`] every datagram is peeked first to learn its
//! size. The peek and the real receive are two syscalls, so this assumes the
//! socket has a single reader, which is the netlink convention.

use std::io;
use std::os::fd::{AsFd, BorrowedFd};

use bytes::{Bytes, BytesMut};

use crate::config::RecvPolicy;
use crate::error::OsError;
use crate::logging::targets;
use crate::socket::{MessageInfo, Shared, deliver_message, report_error};
use crate::sys;

/// Receive one datagram sized according to `policy`.
///
/// Fixed-size receives land in `scratch` and are copied out at their real
/// length, so a short datagram never pins a full-capacity buffer.
fn receive_one(
    fd: BorrowedFd<'_>,
    policy: RecvPolicy,
    scratch: &mut BytesMut,
) -> io::Result<(Bytes, MessageInfo)> {
    let (payload, received) = match policy {
        RecvPolicy::Fixed(capacity) => {
            let capacity = capacity.get();
            if scratch.len() < capacity {
                scratch.resize(capacity, 0);
            }
            let received = sys::recvmsg(fd, &mut scratch[..capacity], libc::MSG_TRUNC)?;
            let len = received.size.min(capacity);
            (Bytes::copy_from_slice(&scratch[..len]), received)
        }
        RecvPolicy::AutoSize => {
            let mut probe = [0u8; 1];
            let size = sys::recvmsg(fd, &mut probe, libc::MSG_PEEK | libc::MSG_TRUNC)?.size;
            let mut buf = BytesMut::zeroed(size);
            let received = sys::recvmsg(fd, &mut buf, libc::MSG_TRUNC)?;
            buf.truncate(received.size.min(size));
            (buf.freeze(), received)
        }
    };

    let info = MessageInfo {
        source: received.source,
        truncated: received.truncated.then_some(received.size),
    };
    Ok((payload, info))
}

/// Drain readable datagrams into the message handler.
pub(crate) fn receive_ready(shared: &Shared) {
    let (policy, budget) = {
        let inner = shared.borrow();
        (inner.recv_policy, inner.max_recv_per_event.max(1))
    };

    for _ in 0..budget {
        let received = {
            let mut guard = shared.borrow_mut();
            let inner = &mut *guard;
            let Some(fd) = inner.fd.as_ref() else {
                break;
            };
            receive_one(fd.as_fd(), policy, &mut inner.recv_scratch)
        };

        match received {
            Ok((payload, info)) => {
                tracing::trace!(
                    target: targets::RECV,
                    len = payload.len(),
                    source = %info.source,
                    truncated = ?info.truncated,
                    "datagram received"
                );
                deliver_message(shared, payload, info);
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
            Err(err) => {
                let err = OsError::from_io(&err, "recvmsg", "Error when receiving Netlink message");
                report_error(shared, err.into());
                break;
            }
        }

        // The handler may have closed the socket.
        if !shared.borrow().is_open() {
            break;
        }
    }
}
