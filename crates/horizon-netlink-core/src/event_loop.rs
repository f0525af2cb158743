//! The single-threaded event loop.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::io;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use mio::{Events, Poll, Registry, Token, Waker};
use parking_lot::Mutex;

use crate::error::{LoopError, Result};
use crate::event::PollEvents;
use crate::logging::targets;
use crate::poll::{WatcherId, WatcherRegistry, take_socket_error, watcher_for};
use crate::task::{RemoteHandle, RemoteShared, TaskQueue};
use crate::timer::TimerManager;

/// Token reserved for the cross-thread waker.
const WAKER_TOKEN: Token = Token(usize::MAX);

/// Configuration for an [`EventLoop`].
#[derive(Clone, Debug)]
pub struct LoopConfig {
    /// Capacity of the readiness event buffer per iteration.
    pub events_capacity: usize,
    /// Maximum number of remote tasks run per iteration.
    pub task_batch_size: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            events_capacity: 256,
            task_batch_size: 10,
        }
    }
}

impl LoopConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the readiness event buffer capacity.
    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = capacity.max(1);
        self
    }

    /// Set the number of remote tasks run per iteration.
    pub fn task_batch_size(mut self, size: usize) -> Self {
        self.task_batch_size = size.max(1);
        self
    }
}

/// Loop state shared by every handle.
pub(crate) struct LoopInner {
    poll: RefCell<Poll>,
    pub(crate) registry: Registry,
    events: RefCell<Events>,
    pub(crate) watchers: RefCell<WatcherRegistry>,
    pub(crate) timers: RefCell<TimerManager>,
    remote: Arc<RemoteShared>,
    running: Cell<bool>,
    stop_requested: Cell<bool>,
}

/// Clears the `running` flag on every exit path of an iteration.
struct RunGuard<'a>(&'a Cell<bool>);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl LoopInner {
    fn is_alive(&self) -> bool {
        self.watchers.borrow().has_referenced_active()
            || self.timers.borrow().has_referenced_active()
            || self.remote.has_pending()
    }

    fn take_stop_request(&self) -> bool {
        let remote = self.remote.stop_requested.swap(false, Ordering::SeqCst);
        let local = self.stop_requested.replace(false);
        remote || local
    }

    fn iterate(&self, max_wait: Option<Duration>) -> Result<bool> {
        if self.running.replace(true) {
            return Err(LoopError::AlreadyRunning);
        }
        let _guard = RunGuard(&self.running);

        if self.take_stop_request() {
            return Ok(false);
        }

        self.run_timers();

        if !self.is_alive() {
            return Ok(false);
        }

        let timeout = if self.remote.has_pending() {
            Some(Duration::ZERO)
        } else {
            let next_timer = self.timers.borrow_mut().time_until_next(Instant::now());
            match (next_timer, max_wait) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            }
        };

        let ready = self.poll_ready(timeout)?;
        self.dispatch_ready(ready);
        self.run_remote_tasks();

        if self.take_stop_request() {
            return Ok(false);
        }
        Ok(self.is_alive())
    }

    fn run_timers(&self) {
        let expired = self.timers.borrow_mut().take_expired(Instant::now());
        for timer in expired {
            let callback = self.timers.borrow_mut().fire(timer);
            if let Some(mut callback) = callback {
                callback();
                self.timers.borrow_mut().restore_callback(timer.id, callback);
            }
        }
    }

    fn poll_ready(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Vec<(WatcherId, io::Result<PollEvents>)>> {
        let mut events = self.events.borrow_mut();
        match self.poll.borrow_mut().poll(&mut events, timeout) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        }

        let watchers = self.watchers.borrow();
        let mut ready = Vec::new();
        for event in events.iter() {
            if event.token() == WAKER_TOKEN {
                continue;
            }
            let id = watcher_for(event.token());
            let Some(fd) = watchers.fd(id) else {
                continue;
            };
            if event.is_error() {
                ready.push((id, Err(take_socket_error(fd))));
            } else {
                ready.push((id, Ok(PollEvents::from_event(event))));
            }
        }
        Ok(ready)
    }

    fn dispatch_ready(&self, ready: Vec<(WatcherId, io::Result<PollEvents>)>) {
        for (id, status) in ready {
            let callback = {
                let mut watchers = self.watchers.borrow_mut();
                // An earlier callback in this batch may have stopped or removed it.
                if !watchers.is_active(id) {
                    continue;
                }
                let subscribed = watchers.events(id);
                let status = match status {
                    Ok(events) => {
                        let events = events.intersection(subscribed);
                        if events.is_empty() {
                            continue;
                        }
                        Ok(events)
                    }
                    Err(err) => {
                        tracing::debug!(
                            target: targets::POLL,
                            ?id,
                            %err,
                            "watcher reported an error"
                        );
                        if let Err(stop_err) = watchers.stop(&self.registry, id) {
                            tracing::warn!(
                                target: targets::POLL,
                                ?id,
                                %stop_err,
                                "failed to stop errored watcher"
                            );
                        }
                        Err(err)
                    }
                };
                watchers.take_callback(id).map(|callback| (callback, status))
            };

            let Some((mut callback, status)) = callback else {
                continue;
            };
            callback(status);

            let mut watchers = self.watchers.borrow_mut();
            watchers.restore_callback(id, callback);
            watchers.rearm(&self.registry, id);
        }
    }

    fn run_remote_tasks(&self) {
        let batch = self.remote.tasks.lock().take_batch();
        if !batch.is_empty() {
            tracing::trace!(target: targets::TASK, count = batch.len(), "running remote tasks");
        }
        for task in batch {
            task();
        }
    }
}

/// A cloneable handle to an event loop, used to create watchers and timers.
///
/// Handles are bound to the loop thread; use [`RemoteHandle`] from other
/// threads.
#[derive(Clone)]
pub struct LoopHandle {
    inner: Rc<LoopInner>,
}

impl LoopHandle {
    pub(crate) fn inner(&self) -> &LoopInner {
        &self.inner
    }

    /// Get a thread-safe handle for posting tasks to this loop.
    pub fn remote(&self) -> RemoteHandle {
        RemoteHandle::new(self.inner.remote.clone())
    }

    /// Ask the loop to return from `run()` at its next iteration.
    pub fn stop(&self) {
        self.inner.stop_requested.set(true);
    }

    /// Whether an active, referenced watcher or timer, or a pending remote
    /// task, keeps the loop running.
    pub fn is_alive(&self) -> bool {
        self.inner.is_alive()
    }

    /// Whether the loop is currently inside an iteration.
    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    /// Number of armed timers.
    pub fn active_timers(&self) -> usize {
        self.inner.timers.borrow().active_count()
    }
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle")
            .field("alive", &self.is_alive())
            .field("running", &self.is_running())
            .finish()
    }
}

/// A single-threaded event loop with libuv-style handle semantics.
///
/// Each iteration runs due timers, waits for descriptor readiness (no longer
/// than the next timer deadline), dispatches readiness callbacks, and then
/// runs tasks posted from other threads. All callbacks run on the thread that
/// calls [`run`](Self::run).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use horizon_netlink_core::{EventLoop, Timer};
///
/// let event_loop = EventLoop::new().unwrap();
/// let handle = event_loop.handle();
///
/// let timer = Timer::new(&handle, || println!("tick"));
/// timer.start(Duration::from_millis(1));
///
/// // Returns once nothing referenced is left to wait for.
/// event_loop.run().unwrap();
/// ```
pub struct EventLoop {
    handle: LoopHandle,
}

impl EventLoop {
    /// Create an event loop with default settings.
    pub fn new() -> Result<Self> {
        Self::with_config(LoopConfig::default())
    }

    /// Create an event loop with the given configuration.
    pub fn with_config(config: LoopConfig) -> Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;

        let remote = Arc::new(RemoteShared {
            tasks: Mutex::new(TaskQueue::with_batch_size(config.task_batch_size)),
            waker,
            stop_requested: AtomicBool::new(false),
        });

        let inner = LoopInner {
            poll: RefCell::new(poll),
            registry,
            events: RefCell::new(Events::with_capacity(config.events_capacity.max(1))),
            watchers: RefCell::new(WatcherRegistry::new()),
            timers: RefCell::new(TimerManager::new()),
            remote,
            running: Cell::new(false),
            stop_requested: Cell::new(false),
        };

        tracing::debug!(target: targets::EVENT_LOOP, ?config, "event loop created");
        Ok(Self {
            handle: LoopHandle {
                inner: Rc::new(inner),
            },
        })
    }

    /// Get a handle for creating watchers and timers on this loop.
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Get a thread-safe handle for posting tasks to this loop.
    pub fn remote(&self) -> RemoteHandle {
        self.handle.remote()
    }

    /// Run until no referenced handle is active or a stop is requested.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::AlreadyRunning`] when called from a loop
    /// callback, or [`LoopError::Io`] if waiting for readiness fails.
    #[tracing::instrument(skip(self), target = "horizon_netlink_core::event_loop", level = "debug")]
    pub fn run(&self) -> Result<()> {
        tracing::debug!(target: targets::EVENT_LOOP, "starting event loop");
        while self.handle.inner.iterate(None)? {}
        tracing::debug!(target: targets::EVENT_LOOP, "event loop finished");
        Ok(())
    }

    /// Run a single iteration, waiting at most `timeout` for readiness.
    ///
    /// Returns whether the loop is still alive afterwards.
    pub fn run_once(&self, timeout: Option<Duration>) -> Result<bool> {
        self.handle.inner.iterate(timeout)
    }

    /// Ask the loop to return from `run()` at its next iteration.
    pub fn stop(&self) {
        self.handle.stop();
    }

    /// Whether anything referenced keeps the loop running.
    pub fn is_alive(&self) -> bool {
        self.handle.is_alive()
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("handle", &self.handle)
            .finish()
    }
}

static_assertions::assert_not_impl_any!(LoopHandle: Send, Sync);
static_assertions::assert_not_impl_any!(EventLoop: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_loop_returns_immediately() {
        let event_loop = EventLoop::new().unwrap();
        assert!(!event_loop.is_alive());
        event_loop.run().unwrap();
        assert!(!event_loop.run_once(Some(Duration::from_millis(1))).unwrap());
    }

    #[test]
    fn test_config_builder() {
        let config = LoopConfig::new().events_capacity(0).task_batch_size(4);
        assert_eq!(config.events_capacity, 1);
        assert_eq!(config.task_batch_size, 4);
    }

    #[test]
    fn test_stop_request_is_consumed() {
        let event_loop = EventLoop::new().unwrap();
        event_loop.stop();
        assert!(!event_loop.run_once(None).unwrap());
        assert!(!event_loop.handle().inner().stop_requested.get());
    }
}
