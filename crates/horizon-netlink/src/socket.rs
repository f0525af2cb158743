//! The netlink datagram socket.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::rc::{Rc, Weak};

use bytes::{Bytes, BytesMut};
use horizon_netlink_core::{LoopHandle, PollEvents, PollWatcher, Timer};

use crate::addr::NetlinkAddr;
use crate::config::{FALLBACK_BUFFER_SIZE, LocalAddress, RecvPolicy, SocketConfig};
use crate::error::{OsError, Result, SocketError};
use crate::logging::targets;
use crate::port::{MAX_BIND_ATTEMPTS, generate_local_port};
use crate::protocol::Protocol;
use crate::request::{OutboundRequest, Payload};
use crate::state::SocketState;
use crate::{recv, send, sys};

pub(crate) type MessageHandler = Box<dyn FnMut(Bytes, MessageInfo)>;
pub(crate) type ErrorHandler = Box<dyn FnMut(SocketError)>;
pub(crate) type Shared = Rc<RefCell<SocketInner>>;

/// Metadata delivered with every received datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageInfo {
    /// The sender's address.
    pub source: NetlinkAddr,
    /// The datagram's size on the wire, set only when it did not fit the
    /// receive buffer.
    pub truncated: Option<usize>,
}

impl MessageInfo {
    /// Whether the payload was cut short.
    pub fn is_truncated(&self) -> bool {
        self.truncated.is_some()
    }
}

/// Socket state shared by every handle and by the loop callbacks.
pub(crate) struct SocketInner {
    /// `None` once closed.
    pub fd: Option<OwnedFd>,
    pub state: SocketState,
    pub protocol: Protocol,
    pub recv_policy: RecvPolicy,
    pub max_recv_per_event: usize,
    /// Landing buffer for fixed-size receives, grown on first use.
    pub recv_scratch: BytesMut,
    pub watcher: Option<PollWatcher>,
    /// Zero-delay trampoline that runs completions from a clean stack.
    pub timer: Option<Timer>,
    pub on_message: Option<MessageHandler>,
    pub on_error: Option<ErrorHandler>,
    pub outbound: VecDeque<OutboundRequest>,
    pub completed: VecDeque<OutboundRequest>,
    /// Set while completion callbacks run.
    pub processing: bool,
}

/// Everything a close releases. Fields drop in declaration order, so the
/// timer and watcher go before the descriptor.
struct Released {
    _timer: Option<Timer>,
    _watcher: Option<PollWatcher>,
    _fd: OwnedFd,
    outbound: VecDeque<OutboundRequest>,
    completed: VecDeque<OutboundRequest>,
    _on_message: Option<MessageHandler>,
    _on_error: Option<ErrorHandler>,
}

impl SocketInner {
    pub fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    pub fn fd(&self) -> Result<BorrowedFd<'_>> {
        self.fd.as_ref().map(AsFd::as_fd).ok_or(SocketError::Closed)
    }

    /// Change the watcher subscription.
    pub fn watch(&self, events: PollEvents) -> Result<()> {
        if let Some(watcher) = &self.watcher {
            watcher
                .start(events)
                .map_err(|err| OsError::from_loop(&err, "Couldn't start readiness watcher"))?;
        }
        Ok(())
    }

    fn release(&mut self) -> Option<Released> {
        let fd = self.fd.take()?;
        self.state = SocketState::Closed;
        self.processing = false;
        self.recv_scratch = BytesMut::new();
        Some(Released {
            _timer: self.timer.take(),
            _watcher: self.watcher.take(),
            _fd: fd,
            outbound: std::mem::take(&mut self.outbound),
            completed: std::mem::take(&mut self.completed),
            _on_message: self.on_message.take(),
            _on_error: self.on_error.take(),
        })
    }
}

impl Drop for SocketInner {
    fn drop(&mut self) {
        if let Some(released) = self.release() {
            tracing::debug!(target: targets::SOCKET, "netlink socket dropped while open");
            drop(released);
        }
    }
}

/// Close the socket behind `shared`. Returns `false` if it was already closed.
pub(crate) fn close_shared(shared: &Shared) -> bool {
    // The borrow ends before anything is dropped, so destructors of queued
    // callbacks may use the socket.
    let released = shared.borrow_mut().release();
    let Some(released) = released else {
        return false;
    };
    tracing::debug!(
        target: targets::SOCKET,
        discarded = released.outbound.len() + released.completed.len(),
        "netlink socket closed"
    );
    drop(released);
    true
}

/// Hand a datagram to the message handler.
pub(crate) fn deliver_message(shared: &Shared, payload: Bytes, info: MessageInfo) {
    let handler = shared.borrow_mut().on_message.take();
    let Some(mut handler) = handler else {
        tracing::trace!(
            target: targets::RECV,
            len = payload.len(),
            "no message handler, datagram dropped"
        );
        return;
    };
    handler(payload, info);

    let mut inner = shared.borrow_mut();
    // Closing drops the handler; a replacement installed by the callback wins.
    if inner.is_open() && inner.on_message.is_none() {
        inner.on_message = Some(handler);
    }
}

/// Hand an asynchronous error to the error handler.
pub(crate) fn report_error(shared: &Shared, err: SocketError) {
    tracing::warn!(target: targets::SOCKET, %err, "netlink socket error");
    let handler = shared.borrow_mut().on_error.take();
    let Some(mut handler) = handler else {
        return;
    };
    handler(err);

    let mut inner = shared.borrow_mut();
    if inner.is_open() && inner.on_error.is_none() {
        inner.on_error = Some(handler);
    }
}

fn on_ready(shared: &Shared, status: io::Result<PollEvents>) {
    let events = match status {
        Ok(events) => events,
        Err(err) => {
            let err = OsError::from_io(&err, "epoll_wait", "Error when polling socket");
            let handler = shared.borrow_mut().on_error.take();
            close_shared(shared);
            tracing::warn!(target: targets::SOCKET, %err, "poll error, socket closed");
            if let Some(mut handler) = handler {
                handler(err.into());
            }
            return;
        }
    };

    // Readable is processed fully before writable.
    if events.is_readable() {
        recv::receive_ready(shared);
    }
    if events.is_writable() && shared.borrow().is_open() {
        send::drain(&mut shared.borrow_mut());
        send::run_completed(shared);
    }
}

fn on_timer(shared: &Shared) {
    send::drain(&mut shared.borrow_mut());
    send::run_completed(shared);
}

/// A non-blocking netlink datagram socket driven by an [`EventLoop`].
///
/// The handle is cheap to clone; all clones refer to the same socket.
/// Dropping the last handle closes the socket. Callbacks that need to refer
/// back to their socket should hold a [`WeakSocket`].
///
/// A socket does not keep its loop alive until it has been bound (see
/// [`ref_loop`](Self::ref_loop)).
///
/// # Example
///
/// ```no_run
/// use horizon_netlink::{EventLoop, NetlinkAddr, NetlinkSocket, Protocol, SocketConfig};
///
/// let event_loop = EventLoop::new().unwrap();
/// let config = SocketConfig::new(Protocol::USERSOCK).bind_auto(0);
/// let socket = NetlinkSocket::new(&event_loop.handle(), config).unwrap();
///
/// socket.on_message(|payload, info| {
///     println!("{} bytes from port {}", payload.len(), info.source.port);
/// });
/// socket
///     .send(NetlinkAddr::port(4242), b"hello", |result| {
///         if let Err(err) = result {
///             eprintln!("send failed: {err}");
///         }
///     })
///     .unwrap();
///
/// event_loop.run().unwrap();
/// ```
///
/// [`EventLoop`]: horizon_netlink_core::EventLoop
#[derive(Clone)]
pub struct NetlinkSocket {
    inner: Shared,
}

/// A non-owning reference to a [`NetlinkSocket`].
#[derive(Clone, Default)]
pub struct WeakSocket {
    inner: Weak<RefCell<SocketInner>>,
}

impl WeakSocket {
    /// Get the socket back if any strong handle still exists.
    pub fn upgrade(&self) -> Option<NetlinkSocket> {
        self.inner.upgrade().map(|inner| NetlinkSocket { inner })
    }
}

impl fmt::Debug for WeakSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakSocket")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl NetlinkSocket {
    /// Create a socket on `handle`'s loop and apply `config`.
    ///
    /// If a buffer size or the bind from `config` fails, the socket is
    /// closed and the error returned.
    #[tracing::instrument(skip(handle), target = "horizon_netlink::socket", level = "debug")]
    pub fn new(handle: &LoopHandle, config: SocketConfig) -> Result<Self> {
        let fd = sys::socket(config.protocol.as_u32())
            .map_err(|err| OsError::from_io(&err, "socket", "Couldn't create netlink socket"))?;
        let raw = fd.as_raw_fd();

        let inner = Rc::new(RefCell::new(SocketInner {
            fd: Some(fd),
            state: SocketState::Created,
            protocol: config.protocol,
            recv_policy: config.recv_policy,
            max_recv_per_event: config.max_recv_per_event.max(1),
            recv_scratch: BytesMut::new(),
            watcher: None,
            timer: None,
            on_message: None,
            on_error: None,
            outbound: VecDeque::new(),
            completed: VecDeque::new(),
            processing: false,
        }));

        let weak = Rc::downgrade(&inner);
        let watcher = PollWatcher::new(handle, raw, move |status| {
            if let Some(shared) = weak.upgrade() {
                on_ready(&shared, status);
            }
        });
        watcher
            .start(PollEvents::READABLE)
            .map_err(|err| OsError::from_loop(&err, "Couldn't start readiness watcher"))?;
        // Not referenced until bound.
        watcher.set_ref(false);

        let weak = Rc::downgrade(&inner);
        let timer = Timer::new(handle, move || {
            if let Some(shared) = weak.upgrade() {
                on_timer(&shared);
            }
        });

        {
            let mut state = inner.borrow_mut();
            state.watcher = Some(watcher);
            state.timer = Some(timer);
        }

        let socket = Self { inner };
        if let Err(err) = socket.apply_config(&config) {
            socket.close();
            return Err(err);
        }

        tracing::debug!(
            target: targets::SOCKET,
            fd = raw,
            protocol = %config.protocol,
            "netlink socket created"
        );
        Ok(socket)
    }

    /// Create a socket with its message and error handlers installed.
    pub fn with_handlers<M, E>(
        handle: &LoopHandle,
        config: SocketConfig,
        on_message: M,
        on_error: E,
    ) -> Result<Self>
    where
        M: FnMut(Bytes, MessageInfo) + 'static,
        E: FnMut(SocketError) + 'static,
    {
        let socket = Self::new(handle, config)?;
        socket.on_message(on_message);
        socket.on_error(on_error);
        Ok(socket)
    }

    fn apply_config(&self, config: &SocketConfig) -> Result<()> {
        if let Some(size) = config.recv_buffer_size {
            self.set_recv_buffer_size(size)?;
        }
        if let Some(size) = config.send_buffer_size {
            self.set_send_buffer_size(size)?;
        }
        match config.local {
            LocalAddress::Unbound => {}
            LocalAddress::Fixed(addr) => self.bind(addr)?,
            LocalAddress::Auto { groups } => {
                self.bind_auto(groups)?;
            }
        }
        Ok(())
    }

    /// Set the handler for received datagrams. Ignored once closed.
    pub fn on_message<F>(&self, handler: F)
    where
        F: FnMut(Bytes, MessageInfo) + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        if inner.is_open() {
            inner.on_message = Some(Box::new(handler));
        }
    }

    /// Set the handler for asynchronous errors. Ignored once closed.
    pub fn on_error<F>(&self, handler: F)
    where
        F: FnMut(SocketError) + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        if inner.is_open() {
            inner.on_error = Some(Box::new(handler));
        }
    }

    /// Get a non-owning reference to this socket.
    pub fn downgrade(&self) -> WeakSocket {
        WeakSocket {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Get the current socket state.
    pub fn state(&self) -> SocketState {
        self.inner.borrow().state
    }

    /// Check if the socket is closed.
    pub fn is_closed(&self) -> bool {
        !self.inner.borrow().is_open()
    }

    /// The netlink protocol this socket was created with.
    pub fn protocol(&self) -> Protocol {
        self.inner.borrow().protocol
    }

    /// How receive buffers are sized.
    pub fn recv_policy(&self) -> RecvPolicy {
        self.inner.borrow().recv_policy
    }

    /// The underlying descriptor, or `None` once closed.
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.inner.borrow().fd.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Number of sends whose completion callback has not run yet.
    pub fn pending_sends(&self) -> usize {
        let inner = self.inner.borrow();
        inner.outbound.len() + inner.completed.len()
    }

    /// Bind to `addr`. A bound socket keeps its loop alive.
    pub fn bind(&self, addr: NetlinkAddr) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        sys::bind(inner.fd()?, addr)
            .map_err(|err| OsError::from_io(&err, "bind", "Couldn't bind netlink socket"))?;
        inner.state = SocketState::Bound;
        if let Some(watcher) = &inner.watcher {
            watcher.set_ref(true);
        }
        tracing::debug!(target: targets::SOCKET, %addr, "netlink socket bound");
        Ok(())
    }

    /// Bind to a generated local port, retrying while ports are taken.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::AddressExhausted`] if none of
    /// [`MAX_BIND_ATTEMPTS`] ports could be bound, or the first bind error
    /// other than `EADDRINUSE`.
    pub fn bind_auto(&self, groups: u32) -> Result<NetlinkAddr> {
        for _ in 0..MAX_BIND_ATTEMPTS {
            let addr = NetlinkAddr::new(generate_local_port(), groups);
            match self.bind(addr) {
                Ok(()) => return Ok(addr),
                Err(SocketError::Os(err)) if err.is_addr_in_use() => {
                    tracing::trace!(target: targets::SOCKET, %addr, "port in use, retrying");
                }
                Err(err) => return Err(err),
            }
        }
        Err(SocketError::AddressExhausted {
            attempts: MAX_BIND_ATTEMPTS,
        })
    }

    /// Queue a datagram to `dest`.
    ///
    /// `callback` runs exactly once, on a later loop iteration, with the
    /// outcome of the send, unless the socket is closed first. Completions
    /// run in submission order.
    ///
    /// # Errors
    ///
    /// Fails synchronously if the socket is closed, the data is an empty
    /// buffer list, or the watcher cannot be re-subscribed.
    pub fn send<F>(&self, dest: NetlinkAddr, data: impl Into<Payload>, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + 'static,
    {
        send::submit(&self.inner, dest, data.into(), Box::new(callback))
    }

    /// Queue a datagram without a completion callback. A failed send is
    /// reported to the error handler.
    pub fn post(&self, dest: NetlinkAddr, data: impl Into<Payload>) -> Result<()> {
        let weak = Rc::downgrade(&self.inner);
        self.send(dest, data, move |result| {
            if let Err(err) = result
                && let Some(shared) = weak.upgrade()
            {
                report_error(&shared, err);
            }
        })
    }

    /// Close the socket. Queued sends are discarded without their callbacks
    /// running. Closing a closed socket does nothing.
    pub fn close(&self) {
        close_shared(&self.inner);
    }

    /// Keep the loop alive while this socket is open.
    pub fn ref_loop(&self) -> Result<()> {
        self.set_loop_ref(true)
    }

    /// Let the loop exit even though this socket is open.
    pub fn unref_loop(&self) -> Result<()> {
        self.set_loop_ref(false)
    }

    fn set_loop_ref(&self, referenced: bool) -> Result<()> {
        let inner = self.inner.borrow();
        inner.fd()?;
        if let Some(watcher) = &inner.watcher {
            watcher.set_ref(referenced);
        }
        Ok(())
    }

    /// Whether this socket keeps the loop alive.
    pub fn has_ref(&self) -> bool {
        self.inner
            .borrow()
            .watcher
            .as_ref()
            .is_some_and(PollWatcher::has_ref)
    }

    /// The address the socket is bound to.
    pub fn address(&self) -> Result<NetlinkAddr> {
        let inner = self.inner.borrow();
        let addr = sys::getsockname(inner.fd()?)
            .map_err(|err| OsError::from_io(&err, "getsockname", "Couldn't get socket address"))?;
        Ok(addr)
    }

    /// Join a multicast group.
    pub fn add_membership(&self, group: u32) -> Result<()> {
        self.set_option(
            libc::SOL_NETLINK,
            libc::NETLINK_ADD_MEMBERSHIP,
            group as libc::c_int,
            "Couldn't add membership",
        )?;
        tracing::debug!(target: targets::SOCKET, group, "joined multicast group");
        Ok(())
    }

    /// Leave a multicast group.
    pub fn drop_membership(&self, group: u32) -> Result<()> {
        self.set_option(
            libc::SOL_NETLINK,
            libc::NETLINK_DROP_MEMBERSHIP,
            group as libc::c_int,
            "Couldn't drop membership",
        )?;
        tracing::debug!(target: targets::SOCKET, group, "left multicast group");
        Ok(())
    }

    /// Get `SO_RCVBUF`.
    pub fn recv_buffer_size(&self) -> Result<i32> {
        self.get_option(libc::SOL_SOCKET, libc::SO_RCVBUF, "Couldn't get receive buffer size")
    }

    /// Set `SO_RCVBUF`. Sizes of zero or less request [`FALLBACK_BUFFER_SIZE`].
    pub fn set_recv_buffer_size(&self, size: i32) -> Result<()> {
        let size = if size <= 0 { FALLBACK_BUFFER_SIZE } else { size };
        self.set_option(libc::SOL_SOCKET, libc::SO_RCVBUF, size, "Couldn't set receive buffer size")
    }

    /// Get `SO_SNDBUF`.
    pub fn send_buffer_size(&self) -> Result<i32> {
        self.get_option(libc::SOL_SOCKET, libc::SO_SNDBUF, "Couldn't get send buffer size")
    }

    /// Set `SO_SNDBUF`. Sizes of zero or less request [`FALLBACK_BUFFER_SIZE`].
    pub fn set_send_buffer_size(&self, size: i32) -> Result<()> {
        let size = if size <= 0 { FALLBACK_BUFFER_SIZE } else { size };
        self.set_option(libc::SOL_SOCKET, libc::SO_SNDBUF, size, "Couldn't set send buffer size")
    }

    fn set_option(
        &self,
        level: libc::c_int,
        name: libc::c_int,
        value: libc::c_int,
        description: &str,
    ) -> Result<()> {
        let inner = self.inner.borrow();
        sys::setsockopt_int(inner.fd()?, level, name, value)
            .map_err(|err| OsError::from_io(&err, "setsockopt", description))?;
        Ok(())
    }

    fn get_option(&self, level: libc::c_int, name: libc::c_int, description: &str) -> Result<i32> {
        let inner = self.inner.borrow();
        let value = sys::getsockopt_int(inner.fd()?, level, name)
            .map_err(|err| OsError::from_io(&err, "getsockopt", description))?;
        Ok(value)
    }
}

impl fmt::Debug for NetlinkSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("NetlinkSocket")
            .field("fd", &inner.fd.as_ref().map(AsRawFd::as_raw_fd))
            .field("state", &inner.state)
            .field("protocol", &inner.protocol)
            .field("recv_policy", &inner.recv_policy)
            .field("outbound", &inner.outbound.len())
            .field("completed", &inner.completed.len())
            .finish()
    }
}

static_assertions::assert_not_impl_any!(NetlinkSocket: Send, Sync);
static_assertions::assert_not_impl_any!(WeakSocket: Send, Sync);

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use horizon_netlink_core::EventLoop;

    use super::*;

    fn usersock(event_loop: &EventLoop) -> NetlinkSocket {
        NetlinkSocket::new(&event_loop.handle(), SocketConfig::new(Protocol::USERSOCK)).unwrap()
    }

    fn subscribed(socket: &NetlinkSocket) -> PollEvents {
        socket
            .inner
            .borrow()
            .watcher
            .as_ref()
            .map_or(PollEvents::NONE, PollWatcher::events)
    }

    /// A bound USERSOCK socket outside any loop that nobody reads from.
    fn stalled_receiver() -> (OwnedFd, NetlinkAddr) {
        let fd = sys::socket(Protocol::USERSOCK.as_u32()).unwrap();
        sys::setsockopt_int(fd.as_fd(), libc::SOL_SOCKET, libc::SO_RCVBUF, 1).unwrap();
        // Port 0 lets the kernel pick one.
        sys::bind(fd.as_fd(), NetlinkAddr::new(0, 0)).unwrap();
        let addr = sys::getsockname(fd.as_fd()).unwrap();
        (fd, addr)
    }

    fn drain_receiver(fd: &OwnedFd) {
        let mut buf = [0u8; 512];
        while sys::recvmsg(fd.as_fd(), &mut buf, libc::MSG_TRUNC).is_ok() {}
    }

    #[test]
    fn test_new_socket_is_open_and_unreferenced() {
        let event_loop = EventLoop::new().unwrap();
        let socket = usersock(&event_loop);

        assert_eq!(socket.state(), SocketState::Created);
        assert!(!socket.is_closed());
        assert!(socket.raw_fd().is_some());
        assert!(!socket.has_ref());
        assert!(!event_loop.is_alive());
        assert_eq!(socket.pending_sends(), 0);
    }

    #[test]
    fn test_release_order_and_state() {
        let event_loop = EventLoop::new().unwrap();
        let socket = usersock(&event_loop);
        {
            let inner = socket.inner.borrow();
            assert!(inner.watcher.as_ref().unwrap().is_active());
            assert!(inner.timer.is_some());
        }

        assert!(close_shared(&socket.inner));
        assert!(!close_shared(&socket.inner));

        let inner = socket.inner.borrow();
        assert!(inner.fd.is_none());
        assert!(inner.watcher.is_none());
        assert!(inner.timer.is_none());
        assert_eq!(inner.state, SocketState::Closed);
    }

    #[test]
    fn test_handlers_dropped_on_close() {
        let event_loop = EventLoop::new().unwrap();
        let socket = usersock(&event_loop);
        let token = Rc::new(());
        let held = token.clone();
        socket.on_message(move |_, _| {
            let _ = &held;
        });
        assert_eq!(Rc::strong_count(&token), 2);

        socket.close();
        assert_eq!(Rc::strong_count(&token), 1);

        // Handlers set after close are not kept.
        let held = token.clone();
        socket.on_error(move |_| {
            let _ = &held;
        });
        assert_eq!(Rc::strong_count(&token), 1);
    }

    #[test]
    fn test_dropping_last_handle_closes() {
        let event_loop = EventLoop::new().unwrap();
        let socket = usersock(&event_loop);
        socket.ref_loop().unwrap();
        let weak = socket.downgrade();
        assert!(event_loop.is_alive());

        drop(socket);
        assert!(weak.upgrade().is_none());
        assert!(!event_loop.is_alive());
    }

    #[test]
    fn test_message_info() {
        let info = MessageInfo {
            source: NetlinkAddr::port(9),
            truncated: Some(8),
        };
        assert!(info.is_truncated());
    }

    #[test]
    fn test_poll_error_closes_and_reports_once() {
        let event_loop = EventLoop::new().unwrap();
        let socket = usersock(&event_loop);
        let errors = Rc::new(RefCell::new(Vec::new()));
        let sink = errors.clone();
        socket.on_error(move |err| sink.borrow_mut().push(err));

        on_ready(&socket.inner, Err(io::Error::from_raw_os_error(libc::ENOBUFS)));

        assert!(socket.is_closed());
        assert_eq!(socket.state(), SocketState::Closed);
        {
            let errors = errors.borrow();
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].syscall(), Some("epoll_wait"));
            assert_eq!(errors[0].errno(), Some(libc::ENOBUFS));
        }

        // A second error on a closed socket reaches nobody.
        on_ready(&socket.inner, Err(io::Error::from_raw_os_error(libc::EBADF)));
        assert_eq!(errors.borrow().len(), 1);

        socket.close();
        assert_eq!(
            socket.send(NetlinkAddr::KERNEL, b"late", |_| {}),
            Err(SocketError::Closed)
        );
        assert_eq!(socket.address(), Err(SocketError::Closed));
    }

    #[test]
    fn test_eager_drain_keeps_readable_subscription() {
        let event_loop = EventLoop::new().unwrap();
        let socket = usersock(&event_loop);
        let me = socket.bind_auto(0).unwrap();

        socket.send(me, b"ping", |result| result.unwrap()).unwrap();

        assert_eq!(subscribed(&socket), PollEvents::READABLE);
        let inner = socket.inner.borrow();
        assert!(inner.outbound.is_empty());
        assert_eq!(inner.completed.len(), 1);
    }

    #[test]
    fn test_pushback_subscribes_writable_until_drained() {
        let event_loop = EventLoop::new().unwrap();
        let sender = usersock(&event_loop);
        sender.bind_auto(0).unwrap();
        let (receiver, dest) = stalled_receiver();

        // Send one datagram at a time, letting each complete, until the
        // receiver's queue is full and a send stays queued.
        let mut sent = 0;
        while sender.inner.borrow().outbound.is_empty() {
            assert!(sent < 1000, "receiver never pushed back");
            sender
                .send(dest, vec![0u8; 256], |result| result.unwrap())
                .unwrap();
            sent += 1;
            if sender.inner.borrow().outbound.is_empty() {
                assert_eq!(subscribed(&sender), PollEvents::READABLE);
                event_loop.run_once(Some(Duration::ZERO)).unwrap();
            }
        }
        assert_eq!(subscribed(&sender), PollEvents::BOTH);

        let deadline = Instant::now() + Duration::from_secs(5);
        while sender.pending_sends() > 0 && Instant::now() < deadline {
            drain_receiver(&receiver);
            event_loop.run_once(Some(Duration::from_millis(10))).unwrap();
        }
        assert_eq!(sender.pending_sends(), 0);
        assert_eq!(subscribed(&sender), PollEvents::READABLE);
    }

    #[test]
    fn test_failed_subscription_discards_request() {
        let event_loop = EventLoop::new().unwrap();
        let socket = usersock(&event_loop);
        let me = socket.bind_auto(0).unwrap();
        // Still awaiting completion, so the next send is queued without draining.
        socket.send(me, b"first", |_| {}).unwrap();

        // Replace the socket with a descriptor epoll does not know.
        let null = std::fs::File::open("/dev/null").unwrap();
        let raw = socket.raw_fd().unwrap();
        // SAFETY: both descriptors are open; `raw` stays owned by the socket.
        assert_eq!(unsafe { libc::dup2(null.as_raw_fd(), raw) }, raw);

        let token = Rc::new(());
        let held = token.clone();
        let err = socket
            .send(me, b"second", move |_| {
                let _ = &held;
            })
            .unwrap_err();

        assert_eq!(err.syscall(), Some("epoll_ctl"));
        assert_eq!(Rc::strong_count(&token), 1);
        assert_eq!(socket.pending_sends(), 1);
    }
}
