//! The "run this later" seam every settlement goes through.
//!
//! A [`Schedule`] implementation must run tasks in the order they were
//! submitted. The crate ships [`TaskQueue`], a plain FIFO queue driven by
//! whoever owns it, and keeps one per thread as the default scheduler.
use crate::Error;
use std::{
    cell::RefCell,
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex},
};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Schedule: Send + Sync + 'static {
    /// Queue `task` to run on a later turn, after every task queued before it.
    fn schedule(&self, task: Task);
}

/// Shared handle to a [`Schedule`] implementation.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<dyn Schedule>,
}

thread_local! {
    static CURRENT: RefCell<Option<Scheduler>> = const { RefCell::new(None) };
    static LOCAL_QUEUE: Arc<TaskQueue> = Arc::new(TaskQueue::new());
}

impl Scheduler {
    pub fn new<S: Schedule>(schedule: S) -> Self {
        Self {
            inner: Arc::new(schedule),
        }
    }

    /// The scheduler entered on this thread, or the thread's local queue.
    pub fn current() -> Self {
        CURRENT
            .with(|cell| cell.borrow().clone())
            .unwrap_or_else(|| Self::from(local_queue()))
    }

    /// Run `f` with `self` as the current scheduler of this thread. The
    /// previous scheduler comes back even if `f` panics.
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        let prev = CURRENT.with(|cell| cell.replace(Some(self.clone())));
        let _restore = Restore(prev);
        f()
    }

    pub fn schedule(&self, task: impl FnOnce() + Send + 'static) {
        self.inner.schedule(Box::new(task));
    }
}

struct Restore(Option<Scheduler>);

impl Drop for Restore {
    fn drop(&mut self) {
        let prev = self.0.take();
        // Fails only while the thread-locals are being torn down.
        let _ = CURRENT.try_with(|cell| cell.replace(prev));
    }
}

impl<S: Schedule> From<Arc<S>> for Scheduler {
    fn from(schedule: Arc<S>) -> Self {
        Self { inner: schedule }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("inner", &Arc::as_ptr(&self.inner))
            .finish()
    }
}

/// FIFO task queue. Nothing runs until the owner calls [`TaskQueue::run_once`]
/// or [`TaskQueue::run_until_idle`].
pub struct TaskQueue {
    queue: Mutex<VecDeque<Task>>,
    turn_limit: Option<usize>,
}

pub struct TaskQueueBuilder {
    turn_limit: Option<usize>,
}

impl Default for TaskQueueBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueueBuilder {
    pub fn new() -> Self {
        Self { turn_limit: None }
    }

    /// Make `run_until_idle` give up after `limit` turns.
    pub fn turn_limit(mut self, limit: usize) -> Self {
        self.turn_limit = Some(limit);
        self
    }

    pub fn build(self) -> TaskQueue {
        TaskQueue {
            queue: Mutex::new(VecDeque::new()),
            turn_limit: self.turn_limit,
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        TaskQueueBuilder::new().build()
    }

    pub fn builder() -> TaskQueueBuilder {
        TaskQueueBuilder::new()
    }

    pub fn push(&self, task: Task) {
        self.lock().push_back(task);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Run the oldest queued task. Returns `false` if the queue was empty.
    pub fn run_once(&self) -> bool {
        // The guard must be gone before the task runs, it may queue more work.
        let task = self.lock().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run turns until the queue is empty, returning how many ran.
    pub fn run_until_idle(&self) -> Result<usize, Error> {
        let mut turns = 0;
        while self.run_once() {
            turns += 1;
            if let Some(limit) = self.turn_limit {
                if turns >= limit && !self.is_empty() {
                    tracing::debug!(limit, pending = self.len(), "task queue turn limit reached");
                    return Err(Error::TurnLimitExceeded { limit });
                }
            }
        }
        tracing::trace!(turns, "task queue idle");
        Ok(turns)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Task>> {
        // A task never runs while the guard is held, so poisoning cannot leave
        // the queue half-updated.
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Schedule for TaskQueue {
    fn schedule(&self, task: Task) {
        self.push(task);
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("pending", &self.len())
            .field("turn_limit", &self.turn_limit)
            .finish()
    }
}

/// This thread's default queue.
pub fn local_queue() -> Arc<TaskQueue> {
    LOCAL_QUEUE.with(Arc::clone)
}

/// Drive this thread's default queue until nothing is left to run.
pub fn run_until_idle() -> Result<usize, Error> {
    local_queue().run_until_idle()
}
