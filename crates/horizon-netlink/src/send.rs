//! Send engine.
//!
//! Requests wait in the outbound queue in submission order. [`drain`] sends
//! from the head until the queue is empty or the kernel pushes back; each
//! request that leaves the queue (sent, or failed for good) moves to the
//! completed queue and arms the socket's zero-delay timer. Completion
//! callbacks then run from [`run_completed`], on a later loop iteration,
//! never on the stack of the `send` call.

use std::io;
use std::os::fd::AsFd;
use std::time::Duration;

use horizon_netlink_core::{PollEvents, Timer};

use crate::addr::NetlinkAddr;
use crate::error::Result;
use crate::logging::targets;
use crate::request::{OutboundRequest, Payload, SendCallback, SendStatus};
use crate::socket::{Shared, SocketInner, report_error};
use crate::sys;

/// Failures that leave the head request queued until the next writable edge.
fn is_transient(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::ENOBUFS)
}

/// Arm the completion timer unless it is already pending.
fn feed(timer: Option<&Timer>) {
    if let Some(timer) = timer
        && !timer.is_active()
    {
        timer.start(Duration::ZERO);
    }
}

/// Queue a datagram, sending it right away when nothing is ahead of it.
///
/// If the watcher cannot be subscribed for writable, the request is taken
/// back off the queue and the error returned; its callback never runs.
pub(crate) fn submit(
    shared: &Shared,
    dest: NetlinkAddr,
    payload: Payload,
    callback: SendCallback,
) -> Result<()> {
    let mut inner = shared.borrow_mut();
    inner.fd()?;
    let buffers = payload.into_buffers()?;

    let was_idle = inner.outbound.is_empty() && inner.completed.is_empty();
    let request = OutboundRequest::new(dest, buffers, callback);
    tracing::trace!(target: targets::SEND, %dest, len = request.len(), "datagram queued");
    inner.outbound.push_back(request);

    if was_idle && !inner.processing {
        drain(&mut inner);
        if inner.outbound.is_empty() {
            return Ok(());
        }
    }

    if let Err(err) = inner.watch(PollEvents::BOTH) {
        // Draining only pops from the front, so the new request is still at
        // the back.
        let request = inner.outbound.pop_back();
        drop(inner);
        drop(request);
        return Err(err);
    }
    Ok(())
}

/// Send queued requests until the queue is empty or the kernel pushes back.
pub(crate) fn drain(inner: &mut SocketInner) {
    let Some(fd) = inner.fd.as_ref() else {
        return;
    };
    let fd = fd.as_fd();

    while let Some(request) = inner.outbound.front() {
        let status = match sys::sendmsg(fd, request.dest, &request.buffers) {
            Ok(sent) => SendStatus::Sent(sent),
            Err(err) if is_transient(&err) => {
                if err.raw_os_error() == Some(libc::ENOBUFS) {
                    tracing::debug!(
                        target: targets::SEND,
                        dest = %request.dest,
                        "send buffer full (ENOBUFS), waiting"
                    );
                } else {
                    tracing::trace!(
                        target: targets::SEND,
                        dest = %request.dest,
                        "send would block, waiting"
                    );
                }
                break;
            }
            Err(err) => SendStatus::Failed(err.raw_os_error().unwrap_or(libc::EIO)),
        };

        let Some(mut request) = inner.outbound.pop_front() else {
            break;
        };
        tracing::trace!(
            target: targets::SEND,
            dest = %request.dest,
            ?status,
            "datagram left the queue"
        );
        request.status = Some(status);
        inner.completed.push_back(request);
        feed(inner.timer.as_ref());
    }
}

/// Run the callbacks of completed requests in order.
///
/// Must not be re-entered. A callback may send, close, or do anything else
/// with the socket.
pub(crate) fn run_completed(shared: &Shared) {
    {
        let mut inner = shared.borrow_mut();
        debug_assert!(!inner.processing, "completion pass re-entered");
        inner.processing = true;
    }

    loop {
        let request = shared.borrow_mut().completed.pop_front();
        let Some(request) = request else {
            break;
        };
        request.complete();
    }

    let restart = {
        let inner = shared.borrow();
        if inner.is_open() && inner.outbound.is_empty() {
            // Nothing left to send; stop asking for writable.
            inner.watch(PollEvents::READABLE).err()
        } else {
            None
        }
    };
    if let Some(err) = restart {
        report_error(shared, err);
    }

    shared.borrow_mut().processing = false;
}
