//! Timer system for Horizon Netlink.
//!
//! Provides one-shot and repeating timers that integrate with the event loop.
//! A zero-delay one-shot timer is the loop's "run this soon, but not on the
//! current stack" primitive: it fires on the next loop iteration, from a clean
//! stack, in the order it was armed relative to other timers due at the same
//! instant.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::time::{Duration, Instant};

use slotmap::{SlotMap, new_key_type};

use crate::error::{LoopError, Result};
use crate::event_loop::LoopHandle;
use crate::logging::targets;

new_key_type! {
    /// A unique identifier for a timer.
    pub struct TimerId;
}

/// A boxed timer callback. Runs on the loop thread only.
pub(crate) type TimerCallback = Box<dyn FnMut()>;

/// The type of timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    /// Fires once after the specified duration.
    OneShot,
    /// Fires repeatedly at the specified interval.
    Repeating,
}

/// Internal timer data.
struct TimerData {
    /// When this timer should next fire.
    next_fire: Instant,
    /// The interval for repeating timers.
    interval: Duration,
    /// The kind of timer.
    kind: TimerKind,
    /// Whether this timer is armed.
    active: bool,
    /// Whether an armed timer keeps the loop alive.
    referenced: bool,
    /// Bumped on every start/stop so stale queue entries can be skipped.
    generation: u64,
    /// Taken out while the callback runs.
    callback: Option<TimerCallback>,
}

/// An entry in the timer queue (min-heap by fire time, then arming order).
#[derive(Debug, Clone, Copy)]
struct TimerQueueEntry {
    id: TimerId,
    fire_time: Instant,
    sequence: u64,
    generation: u64,
}

impl PartialEq for TimerQueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_time == other.fire_time && self.sequence == other.sequence
    }
}

impl Eq for TimerQueueEntry {}

impl PartialOrd for TimerQueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerQueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap (BinaryHeap is max-heap by default).
        match other.fire_time.cmp(&self.fire_time) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            ord => ord,
        }
    }
}

/// A timer that has expired and is waiting to be dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExpiredTimer {
    pub id: TimerId,
    generation: u64,
}

/// Manages all timers of one event loop.
pub(crate) struct TimerManager {
    /// All registered timers, armed or not.
    timers: SlotMap<TimerId, TimerData>,
    /// Priority queue of pending timer fires.
    queue: BinaryHeap<TimerQueueEntry>,
    /// Arming counter for stable ordering of equal deadlines.
    sequence: u64,
}

impl TimerManager {
    /// Create a new timer manager.
    pub fn new() -> Self {
        Self {
            timers: SlotMap::with_key(),
            queue: BinaryHeap::new(),
            sequence: 0,
        }
    }

    /// Register a timer without arming it.
    pub fn insert(&mut self, callback: TimerCallback) -> TimerId {
        self.timers.insert(TimerData {
            next_fire: Instant::now(),
            interval: Duration::ZERO,
            kind: TimerKind::OneShot,
            active: false,
            referenced: true,
            generation: 0,
            callback: Some(callback),
        })
    }

    /// Remove a timer entirely. Its queue entries become stale.
    pub fn remove(&mut self, id: TimerId) -> bool {
        self.timers.remove(id).is_some()
    }

    /// Arm a timer. Re-arming an active timer replaces its deadline.
    pub fn start(&mut self, id: TimerId, delay: Duration, kind: TimerKind) -> Result<()> {
        let Some(timer) = self.timers.get_mut(id) else {
            return Err(LoopError::InvalidHandle);
        };

        let next_fire = Instant::now() + delay;
        timer.next_fire = next_fire;
        timer.interval = delay;
        timer.kind = kind;
        timer.active = true;
        timer.generation += 1;

        self.sequence += 1;
        self.queue.push(TimerQueueEntry {
            id,
            fire_time: next_fire,
            sequence: self.sequence,
            generation: timer.generation,
        });
        Ok(())
    }

    /// Disarm a timer.
    pub fn stop(&mut self, id: TimerId) -> Result<()> {
        let Some(timer) = self.timers.get_mut(id) else {
            return Err(LoopError::InvalidHandle);
        };
        timer.active = false;
        timer.generation += 1;
        Ok(())
    }

    /// Check if a timer is currently armed.
    pub fn is_active(&self, id: TimerId) -> bool {
        self.timers.get(id).is_some_and(|t| t.active)
    }

    pub fn set_ref(&mut self, id: TimerId, referenced: bool) {
        if let Some(timer) = self.timers.get_mut(id) {
            timer.referenced = referenced;
        }
    }

    pub fn has_ref(&self, id: TimerId) -> bool {
        self.timers.get(id).is_some_and(|t| t.referenced)
    }

    /// Whether any armed timer keeps the loop alive.
    pub fn has_referenced_active(&self) -> bool {
        self.timers.values().any(|t| t.active && t.referenced)
    }

    /// Get the number of armed timers.
    pub fn active_count(&self) -> usize {
        self.timers.values().filter(|t| t.active).count()
    }

    fn is_current(&self, entry: &TimerQueueEntry) -> bool {
        self.timers
            .get(entry.id)
            .is_some_and(|t| t.active && t.generation == entry.generation)
    }

    /// Get the duration until the next timer fires, if any.
    ///
    /// Returns `None` if there are no armed timers.
    pub fn time_until_next(&mut self, now: Instant) -> Option<Duration> {
        // Clean up any stale entries from the front of the queue.
        while let Some(entry) = self.queue.peek() {
            if self.is_current(entry) {
                break;
            }
            self.queue.pop();
        }

        self.queue
            .peek()
            .map(|entry| entry.fire_time.saturating_duration_since(now))
    }

    /// Collect all timers due at `now`, in firing order.
    ///
    /// Timers armed after this call are not part of the snapshot, so a
    /// zero-delay timer armed from inside a callback waits for the next pass.
    #[tracing::instrument(skip(self), target = "horizon_netlink_core::timer", level = "trace")]
    pub fn take_expired(&mut self, now: Instant) -> Vec<ExpiredTimer> {
        let mut expired = Vec::new();

        while let Some(entry) = self.queue.peek() {
            if entry.fire_time > now {
                break;
            }
            let Some(entry) = self.queue.pop() else {
                break;
            };
            if self.is_current(&entry) {
                expired.push(ExpiredTimer {
                    id: entry.id,
                    generation: entry.generation,
                });
            }
        }

        expired
    }

    /// Mark an expired timer as fired and hand out its callback.
    ///
    /// Returns `None` if the timer was stopped, re-armed or removed since it
    /// was collected. One-shot timers become inactive; repeating timers are
    /// rescheduled before their callback runs.
    pub fn fire(&mut self, expired: ExpiredTimer) -> Option<TimerCallback> {
        let timer = self.timers.get_mut(expired.id)?;
        if !timer.active || timer.generation != expired.generation {
            return None;
        }

        tracing::trace!(target: targets::TIMER, id = ?expired.id, "timer fired");

        match timer.kind {
            TimerKind::OneShot => {
                timer.active = false;
            }
            TimerKind::Repeating => {
                timer.next_fire = Instant::now() + timer.interval;
                self.sequence += 1;
                self.queue.push(TimerQueueEntry {
                    id: expired.id,
                    fire_time: timer.next_fire,
                    sequence: self.sequence,
                    generation: timer.generation,
                });
            }
        }

        timer.callback.take()
    }

    /// Put a callback back after it ran, unless the timer was removed.
    pub fn restore_callback(&mut self, id: TimerId, callback: TimerCallback) {
        if let Some(timer) = self.timers.get_mut(id)
            && timer.callback.is_none()
        {
            timer.callback = Some(callback);
        }
    }
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new()
    }
}

/// A timer handle owned by its user.
///
/// The timer is registered with the loop on creation but not armed. Dropping
/// the handle removes the timer, so a pending fire never outlives its owner.
///
/// # Example
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use std::time::Duration;
/// use horizon_netlink_core::{EventLoop, Timer};
///
/// let event_loop = EventLoop::new().unwrap();
/// let fired = Rc::new(Cell::new(false));
/// let flag = fired.clone();
/// let timer = Timer::new(&event_loop.handle(), move || flag.set(true));
/// timer.start(Duration::ZERO);
/// event_loop.run().unwrap();
/// assert!(fired.get());
/// ```
pub struct Timer {
    handle: LoopHandle,
    id: TimerId,
}

impl Timer {
    /// Register a new, unarmed timer.
    pub fn new<F>(handle: &LoopHandle, callback: F) -> Self
    where
        F: FnMut() + 'static,
    {
        let id = handle.inner().timers.borrow_mut().insert(Box::new(callback));
        Self {
            handle: handle.clone(),
            id,
        }
    }

    /// Get this timer's identifier.
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Arm as a one-shot timer firing after `delay`.
    pub fn start(&self, delay: Duration) {
        self.arm(delay, TimerKind::OneShot);
    }

    /// Arm as a repeating timer. The first fire occurs after `interval`.
    pub fn start_repeating(&self, interval: Duration) {
        self.arm(interval, TimerKind::Repeating);
    }

    fn arm(&self, delay: Duration, kind: TimerKind) {
        // The handle owns its id, so the entry exists for as long as `self` does.
        let result = self
            .handle
            .inner()
            .timers
            .borrow_mut()
            .start(self.id, delay, kind);
        if let Err(err) = result {
            tracing::error!(target: targets::TIMER, id = ?self.id, %err, "failed to arm timer");
        }
    }

    /// Disarm the timer. A no-op if it is not armed.
    pub fn stop(&self) {
        let _ = self.handle.inner().timers.borrow_mut().stop(self.id);
    }

    /// Check if the timer is armed.
    pub fn is_active(&self) -> bool {
        self.handle.inner().timers.borrow().is_active(self.id)
    }

    /// Control whether an armed timer keeps the loop alive.
    pub fn set_ref(&self, referenced: bool) {
        self.handle
            .inner()
            .timers
            .borrow_mut()
            .set_ref(self.id, referenced);
    }

    /// Whether an armed timer keeps the loop alive.
    pub fn has_ref(&self) -> bool {
        self.handle.inner().timers.borrow().has_ref(self.id)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.handle.inner().timers.borrow_mut().remove(self.id);
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
