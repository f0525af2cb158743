//! Readiness watchers for raw descriptors.
//!
//! A [`PollWatcher`] subscribes one descriptor to readable and/or writable
//! notifications. Notifications are level-triggered: as long as the
//! condition holds and the watcher stays subscribed, every loop iteration
//! reports it again. `mio` registers descriptors edge-triggered, so the loop
//! re-arms the registration after each dispatch, which makes epoll
//! re-evaluate the descriptor's current state.

use std::fmt;
use std::io;
use std::os::fd::RawFd;

use mio::unix::SourceFd;
use mio::{Registry, Token};
use slotmap::{Key, KeyData, SlotMap, new_key_type};

use crate::error::{LoopError, Result};
use crate::event::PollEvents;
use crate::event_loop::LoopHandle;
use crate::logging::targets;

new_key_type! {
    /// A unique identifier for a readiness watcher.
    pub struct WatcherId;
}

/// Callback receiving either the ready events or the descriptor's error.
pub(crate) type PollCallback = Box<dyn FnMut(io::Result<PollEvents>)>;

/// Internal watcher data.
struct WatcherData {
    fd: RawFd,
    /// Subscribed events; `NONE` while stopped.
    events: PollEvents,
    /// Whether the descriptor is currently registered with epoll.
    registered: bool,
    referenced: bool,
    /// Taken out while the callback runs.
    callback: Option<PollCallback>,
}

pub(crate) fn token_for(id: WatcherId) -> Token {
    Token(id.data().as_ffi() as usize)
}

pub(crate) fn watcher_for(token: Token) -> WatcherId {
    WatcherId::from(KeyData::from_ffi(token.0 as u64))
}

/// All readiness watchers of one event loop.
pub(crate) struct WatcherRegistry {
    watchers: SlotMap<WatcherId, WatcherData>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self {
            watchers: SlotMap::with_key(),
        }
    }

    pub fn insert(&mut self, fd: RawFd, callback: PollCallback) -> WatcherId {
        self.watchers.insert(WatcherData {
            fd,
            events: PollEvents::NONE,
            registered: false,
            referenced: true,
            callback: Some(callback),
        })
    }

    /// Subscribe to `events`, registering or re-registering the descriptor.
    pub fn start(&mut self, registry: &Registry, id: WatcherId, events: PollEvents) -> Result<()> {
        let Some(interest) = events.to_interest() else {
            return self.stop(registry, id);
        };
        let watcher = self.watchers.get_mut(id).ok_or(LoopError::InvalidHandle)?;
        let token = token_for(id);
        let mut source = SourceFd(&watcher.fd);

        if watcher.registered {
            registry.reregister(&mut source, token, interest)?;
        } else {
            registry.register(&mut source, token, interest)?;
            watcher.registered = true;
        }
        watcher.events = events;
        Ok(())
    }

    /// Unsubscribe from all events and deregister the descriptor.
    pub fn stop(&mut self, registry: &Registry, id: WatcherId) -> Result<()> {
        let watcher = self.watchers.get_mut(id).ok_or(LoopError::InvalidHandle)?;
        watcher.events = PollEvents::NONE;
        if watcher.registered {
            watcher.registered = false;
            registry.deregister(&mut SourceFd(&watcher.fd))?;
        }
        Ok(())
    }

    /// Re-evaluate readiness of an active watcher after a dispatch.
    pub fn rearm(&self, registry: &Registry, id: WatcherId) {
        let Some(watcher) = self.watchers.get(id) else {
            return;
        };
        if !watcher.registered {
            return;
        }
        let Some(interest) = watcher.events.to_interest() else {
            return;
        };
        if let Err(err) = registry.reregister(&mut SourceFd(&watcher.fd), token_for(id), interest) {
            tracing::warn!(
                target: targets::POLL,
                fd = watcher.fd,
                %err,
                "failed to re-arm watcher"
            );
        }
    }

    /// Stop and forget a watcher.
    pub fn remove(&mut self, registry: &Registry, id: WatcherId) {
        if let Some(watcher) = self.watchers.remove(id)
            && watcher.registered
            && let Err(err) = registry.deregister(&mut SourceFd(&watcher.fd))
        {
            tracing::warn!(
                target: targets::POLL,
                fd = watcher.fd,
                %err,
                "failed to deregister watcher"
            );
        }
    }

    pub fn fd(&self, id: WatcherId) -> Option<RawFd> {
        self.watchers.get(id).map(|w| w.fd)
    }

    pub fn events(&self, id: WatcherId) -> PollEvents {
        self.watchers
            .get(id)
            .map_or(PollEvents::NONE, |w| w.events)
    }

    pub fn is_active(&self, id: WatcherId) -> bool {
        self.watchers.get(id).is_some_and(|w| !w.events.is_empty())
    }

    pub fn set_ref(&mut self, id: WatcherId, referenced: bool) {
        if let Some(watcher) = self.watchers.get_mut(id) {
            watcher.referenced = referenced;
        }
    }

    pub fn has_ref(&self, id: WatcherId) -> bool {
        self.watchers.get(id).is_some_and(|w| w.referenced)
    }

    /// Whether any subscribed watcher keeps the loop alive.
    pub fn has_referenced_active(&self) -> bool {
        self.watchers
            .values()
            .any(|w| w.referenced && !w.events.is_empty())
    }

    pub fn take_callback(&mut self, id: WatcherId) -> Option<PollCallback> {
        self.watchers.get_mut(id)?.callback.take()
    }

    /// Put a callback back after it ran, unless the watcher was removed.
    pub fn restore_callback(&mut self, id: WatcherId, callback: PollCallback) {
        if let Some(watcher) = self.watchers.get_mut(id)
            && watcher.callback.is_none()
        {
            watcher.callback = Some(callback);
        }
    }
}

/// Read and clear the pending error of a descriptor that reported `EPOLLERR`.
pub(crate) fn take_socket_error(fd: RawFd) -> io::Error {
    let mut errno: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: `errno` and `len` are valid for writes of the sizes passed.
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            (&mut errno as *mut libc::c_int).cast(),
            &mut len,
        )
    };
    if rc == 0 && errno != 0 {
        io::Error::from_raw_os_error(errno)
    } else {
        io::Error::from_raw_os_error(libc::EBADF)
    }
}

/// A readiness watcher handle owned by its user.
///
/// Created stopped. [`start`](Self::start) subscribes (or changes the
/// subscription), [`stop`](Self::stop) unsubscribes. Dropping the handle
/// deregisters the descriptor; it must be dropped before the descriptor is
/// closed.
///
/// A watcher that reports an error is stopped before its callback runs.
pub struct PollWatcher {
    handle: LoopHandle,
    id: WatcherId,
}

impl PollWatcher {
    /// Create a watcher for `fd`. The callback runs on the loop thread only.
    pub fn new<F>(handle: &LoopHandle, fd: RawFd, callback: F) -> Self
    where
        F: FnMut(io::Result<PollEvents>) + 'static,
    {
        let id = handle
            .inner()
            .watchers
            .borrow_mut()
            .insert(fd, Box::new(callback));
        tracing::trace!(target: targets::POLL, fd, ?id, "watcher created");
        Self {
            handle: handle.clone(),
            id,
        }
    }

    /// Get this watcher's identifier.
    pub fn id(&self) -> WatcherId {
        self.id
    }

    /// Get the watched descriptor.
    pub fn fd(&self) -> Option<RawFd> {
        self.handle.inner().watchers.borrow().fd(self.id)
    }

    /// Subscribe to `events`, replacing any previous subscription.
    ///
    /// Starting with [`PollEvents::NONE`] is the same as [`stop`](Self::stop).
    pub fn start(&self, events: PollEvents) -> Result<()> {
        let inner = self.handle.inner();
        inner
            .watchers
            .borrow_mut()
            .start(&inner.registry, self.id, events)
    }

    /// Unsubscribe from all events.
    pub fn stop(&self) -> Result<()> {
        let inner = self.handle.inner();
        inner.watchers.borrow_mut().stop(&inner.registry, self.id)
    }

    /// Currently subscribed events.
    pub fn events(&self) -> PollEvents {
        self.handle.inner().watchers.borrow().events(self.id)
    }

    /// Whether the watcher is subscribed to anything.
    pub fn is_active(&self) -> bool {
        self.handle.inner().watchers.borrow().is_active(self.id)
    }

    /// Control whether an active watcher keeps the loop alive.
    pub fn set_ref(&self, referenced: bool) {
        self.handle
            .inner()
            .watchers
            .borrow_mut()
            .set_ref(self.id, referenced);
    }

    /// Whether an active watcher keeps the loop alive.
    pub fn has_ref(&self) -> bool {
        self.handle.inner().watchers.borrow().has_ref(self.id)
    }
}

impl Drop for PollWatcher {
    fn drop(&mut self) {
        let inner = self.handle.inner();
        inner.watchers.borrow_mut().remove(&inner.registry, self.id);
        tracing::trace!(target: targets::POLL, id = ?self.id, "watcher removed");
    }
}

impl fmt::Debug for PollWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollWatcher")
            .field("id", &self.id)
            .field("fd", &self.fd())
            .field("events", &self.events())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        let mut registry = WatcherRegistry::new();
        let id = registry.insert(0, Box::new(|_| {}));
        assert_eq!(watcher_for(token_for(id)), id);
    }

    #[test]
    fn test_new_watcher_is_inactive_and_referenced() {
        let mut registry = WatcherRegistry::new();
        let id = registry.insert(0, Box::new(|_| {}));
        assert!(!registry.is_active(id));
        assert!(registry.has_ref(id));
        assert!(!registry.has_referenced_active());
        assert_eq!(registry.events(id), PollEvents::NONE);
    }

    #[test]
    fn test_take_and_restore_callback() {
        let mut registry = WatcherRegistry::new();
        let id = registry.insert(0, Box::new(|_| {}));
        let callback = registry.take_callback(id).unwrap();
        assert!(registry.take_callback(id).is_none());
        registry.restore_callback(id, callback);
        assert!(registry.take_callback(id).is_some());
    }

    #[test]
    fn test_socket_error_fallback_on_bad_fd() {
        let err = take_socket_error(-1);
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }
}
