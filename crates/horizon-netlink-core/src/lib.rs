//! Core systems for Horizon Netlink.
//!
//! This crate provides the host event loop the netlink socket runs on:
//!
//! - **Event Loop**: A single-threaded, `mio`-backed loop with libuv-style
//!   handle semantics. It keeps running while an active, *referenced* handle
//!   exists.
//! - **Readiness Watchers**: Level-triggered readable/writable notification
//!   for one raw descriptor.
//! - **Timers**: One-shot and repeating timers. A zero-delay timer is the
//!   "run soon, on a clean stack" primitive.
//! - **Remote Tasks**: A thread-safe handle for posting work to the loop
//!   thread.
//!
//! # Event Loop Example
//!
//! ```
//! use std::time::Duration;
//! use horizon_netlink_core::{EventLoop, Timer};
//!
//! let event_loop = EventLoop::new().unwrap();
//! let handle = event_loop.handle();
//!
//! // A repeating timer that stops itself after three ticks.
//! let ticks = std::rc::Rc::new(std::cell::Cell::new(0));
//! let counter = ticks.clone();
//! let stopper = handle.clone();
//! let timer = Timer::new(&handle, move || {
//!     counter.set(counter.get() + 1);
//!     if counter.get() == 3 {
//!         stopper.stop();
//!     }
//! });
//! timer.start_repeating(Duration::from_millis(1));
//!
//! event_loop.run().unwrap();
//! assert_eq!(ticks.get(), 3);
//! ```
//!
//! # Threading
//!
//! [`EventLoop`], [`LoopHandle`], [`PollWatcher`] and [`Timer`] are `!Send`:
//! every callback runs on the loop thread, so no internal locking is needed.
//! Use [`RemoteHandle`] to reach the loop from other threads.

mod error;
mod event;
mod event_loop;
pub mod logging;
mod poll;
mod task;
mod timer;

pub use error::{LoopError, Result};
pub use event::PollEvents;
pub use event_loop::{EventLoop, LoopConfig, LoopHandle};
pub use poll::{PollWatcher, WatcherId};
pub use task::{RemoteHandle, TaskId};
pub use timer::{Timer, TimerId};
