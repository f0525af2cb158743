//! Cross-thread task queue.
//!
//! Tasks posted through a [`RemoteHandle`] from any thread run on the loop
//! thread after readiness dispatch, a bounded batch per iteration.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::logging::targets;

/// A unique identifier for a posted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// Get the raw u64 value of this task ID.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Global counter for generating unique task IDs.
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

fn next_task_id() -> TaskId {
    TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
}

/// A boxed task closure.
pub(crate) type BoxedTask = Box<dyn FnOnce() + Send + 'static>;

/// Internal task data.
struct TaskData {
    id: TaskId,
    task: BoxedTask,
}

/// FIFO of tasks waiting for the loop thread.
pub(crate) struct TaskQueue {
    tasks: VecDeque<TaskData>,
    /// Maximum number of tasks handed out per loop iteration.
    batch_size: usize,
}

impl TaskQueue {
    pub fn with_batch_size(batch_size: usize) -> Self {
        Self {
            tasks: VecDeque::new(),
            batch_size: batch_size.max(1),
        }
    }

    pub fn post(&mut self, task: BoxedTask) -> TaskId {
        let id = next_task_id();
        self.tasks.push_back(TaskData { id, task });
        id
    }

    /// Cancel a pending task.
    ///
    /// Returns `true` if the task was found and cancelled.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        if let Some(pos) = self.tasks.iter().position(|t| t.id == id) {
            self.tasks.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.tasks.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.len()
    }

    /// Remove up to `batch_size` tasks. They run after the lock is released.
    pub fn take_batch(&mut self) -> Vec<BoxedTask> {
        let count = self.tasks.len().min(self.batch_size);
        self.tasks.drain(..count).map(|t| t.task).collect()
    }
}

/// State shared between the loop and its remote handles.
pub(crate) struct RemoteShared {
    pub tasks: Mutex<TaskQueue>,
    pub waker: mio::Waker,
    pub stop_requested: AtomicBool,
}

impl RemoteShared {
    fn wake(&self) {
        if let Err(err) = self.waker.wake() {
            tracing::warn!(target: targets::TASK, %err, "failed to wake event loop");
        }
    }

    pub fn has_pending(&self) -> bool {
        self.tasks.lock().has_pending()
    }
}

/// A thread-safe handle for talking to an event loop from other threads.
///
/// # Example
///
/// ```
/// use horizon_netlink_core::EventLoop;
///
/// let event_loop = EventLoop::new().unwrap();
/// let remote = event_loop.remote();
///
/// std::thread::spawn(move || {
///     remote.post(|| println!("running on the loop thread"));
/// })
/// .join()
/// .unwrap();
///
/// event_loop.run().unwrap();
/// ```
#[derive(Clone)]
pub struct RemoteHandle {
    shared: Arc<RemoteShared>,
}

impl RemoteHandle {
    pub(crate) fn new(shared: Arc<RemoteShared>) -> Self {
        Self { shared }
    }

    /// Queue a task to run on the loop thread and wake the loop.
    ///
    /// A pending task keeps the loop alive until it has run.
    pub fn post<F>(&self, task: F) -> TaskId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.shared.tasks.lock().post(Box::new(task));
        tracing::trace!(target: targets::TASK, task = id.as_u64(), "task posted");
        self.shared.wake();
        id
    }

    /// Cancel a task that has not started yet.
    pub fn cancel(&self, id: TaskId) -> bool {
        self.shared.tasks.lock().cancel(id)
    }

    /// Number of tasks waiting for the loop.
    pub fn pending_count(&self) -> usize {
        self.shared.tasks.lock().pending_count()
    }

    /// Ask the loop to return from `run()` at its next iteration.
    pub fn stop(&self) {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        self.shared.wake();
    }
}

impl fmt::Debug for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHandle")
            .field("pending", &self.pending_count())
            .finish()
    }
}

static_assertions::assert_impl_all!(RemoteHandle: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_batches_are_bounded_and_fifo() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut queue = TaskQueue::with_batch_size(2);
        for i in 0..3 {
            let order = order.clone();
            queue.post(Box::new(move || order.lock().push(i)));
        }

        let batch = queue.take_batch();
        assert_eq!(batch.len(), 2);
        for task in batch {
            task();
        }
        assert_eq!(queue.pending_count(), 1);
        assert_eq!(*order.lock(), vec![0, 1]);
    }

    #[test]
    fn test_cancel() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut queue = TaskQueue::with_batch_size(10);
        let counter = ran.clone();
        let id = queue.post(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));
        assert!(!queue.has_pending());
        assert!(queue.take_batch().is_empty());
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let mut queue = TaskQueue::with_batch_size(0);
        queue.post(Box::new(|| {}));
        assert_eq!(queue.take_batch().len(), 1);
    }

    #[test]
    fn test_task_ids_are_unique() {
        let mut queue = TaskQueue::with_batch_size(10);
        let a = queue.post(Box::new(|| {}));
        let b = queue.post(Box::new(|| {}));
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }
}
