//! The state machine behind a single deferred value.
use crate::{scheduler::Scheduler, value::take_thenable};
use std::{
    fmt,
    future::Future,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    task::{Context, Poll, Waker},
};

pub type Callback<A> = Box<dyn FnOnce(A) + Send + 'static>;

/// Where a [`Deferred`] is in its life. Leaves `Pending` at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Pending,
    Fulfilled,
    Rejected,
}

/// Anything that lets observers subscribe to its eventual outcome.
///
/// Exactly one of the two callbacks is expected to run, at most once.
pub trait Thenable<T, E>: Send + Sync {
    fn subscribe(&self, on_fulfilled: Callback<T>, on_rejected: Callback<E>);
}

/// What a deferred value is being settled toward.
pub enum Resolution<T, E> {
    /// A plain value, fulfilled as is.
    Value(T),
    /// Another thenable whose outcome is adopted.
    Thenable(Box<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    pub fn is_thenable(&self) -> bool {
        matches!(self, Resolution::Thenable(_))
    }
}

impl<T, E> From<Deferred<T, E>> for Resolution<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn from(deferred: Deferred<T, E>) -> Self {
        Resolution::Thenable(Box::new(deferred))
    }
}

impl<T, E> fmt::Debug for Resolution<T, E>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Thenable(_) => f.write_str("Thenable(..)"),
        }
    }
}

/// Conversion of whatever a setup routine or callback hands back into a
/// resolution. `Err` stands for a thrown error and rejects.
pub trait IntoResolution<T, E> {
    fn into_resolution(self) -> Result<Resolution<T, E>, E>;
}

impl<T, E> IntoResolution<T, E> for Resolution<T, E> {
    fn into_resolution(self) -> Result<Resolution<T, E>, E> {
        Ok(self)
    }
}

impl<T, E> IntoResolution<T, E> for Result<T, E> {
    fn into_resolution(self) -> Result<Resolution<T, E>, E> {
        self.map(Resolution::Value)
    }
}

impl<T, E> IntoResolution<T, E> for Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn into_resolution(self) -> Result<Resolution<T, E>, E> {
        Ok(Resolution::Thenable(Box::new(self)))
    }
}

macro_rules! identity_resolution {
    ($($ty:ty),* $(,)?) => {
        $(
            impl<E> IntoResolution<$ty, E> for $ty {
                fn into_resolution(self) -> Result<Resolution<$ty, E>, E> {
                    Ok(Resolution::Value(self))
                }
            }
        )*
    };
}

identity_resolution!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    String,
    &'static str,
);

impl<T, E> IntoResolution<Vec<T>, E> for Vec<T> {
    fn into_resolution(self) -> Result<Resolution<Vec<T>, E>, E> {
        Ok(Resolution::Value(self))
    }
}

impl<T, E> IntoResolution<Option<T>, E> for Option<T> {
    fn into_resolution(self) -> Result<Resolution<Option<T>, E>, E> {
        Ok(Resolution::Value(self))
    }
}

struct Handler<T, E> {
    on_fulfilled: Callback<T>,
    on_rejected: Callback<E>,
}

enum Slot<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

struct Inner<T, E> {
    slot: Slot<T, E>,
    handlers: Vec<Handler<T, E>>,
    wakers: Vec<Waker>,
}

struct Core<T, E> {
    inner: Mutex<Inner<T, E>>,
    scheduler: Scheduler,
}

/// A value that will be fulfilled or rejected later.
///
/// Cloning gives another handle onto the same value.
///
/// # Examples
///
/// ```
/// use thenable::{scheduler, Deferred, State};
///
/// let greeting = Deferred::<String, String>::new(|resolver| {
///     resolver.fulfill("hi".into());
///     Ok(())
/// });
/// // Settlement waits for a later turn.
/// assert_eq!(greeting.state(), State::Pending);
/// scheduler::run_until_idle().unwrap();
/// assert_eq!(greeting.outcome(), Some(Ok("hi".to_string())));
/// ```
pub struct Deferred<T, E> {
    core: Arc<Core<T, E>>,
}

/// The two settle capabilities handed to a setup routine.
///
/// All clones share one latch: whichever capability is called first wins.
pub struct Resolver<T, E> {
    core: Arc<Core<T, E>>,
    resolved: Arc<AtomicBool>,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            resolved: self.resolved.clone(),
        }
    }
}

impl<T, E> Core<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn new(scheduler: Scheduler) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                slot: Slot::Pending,
                handlers: vec![],
                wakers: vec![],
            }),
            scheduler,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T, E>> {
        // User code never runs under this lock.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Settle on a later turn.
    fn settle(self: &Arc<Self>, outcome: Result<Resolution<T, E>, E>) {
        let core = self.clone();
        self.scheduler.schedule(move || core.apply(outcome));
    }

    fn apply(self: &Arc<Self>, outcome: Result<Resolution<T, E>, E>) {
        let mut inner = self.lock();
        if !matches!(inner.slot, Slot::Pending) {
            tracing::trace!("ignoring settlement of an already settled deferred");
            return;
        }
        match outcome {
            Ok(Resolution::Thenable(thenable)) => {
                drop(inner);
                self.adopt(thenable);
            }
            Ok(Resolution::Value(value)) => {
                let mut value = Some(value);
                if let Some(thenable) = take_thenable::<T, E>(&mut value) {
                    drop(inner);
                    self.adopt(thenable);
                } else if let Some(value) = value {
                    inner.slot = Slot::Fulfilled(value);
                    self.fire(inner);
                }
            }
            Err(reason) => {
                inner.slot = Slot::Rejected(reason);
                self.fire(inner);
            }
        }
    }

    fn adopt(self: &Arc<Self>, thenable: Box<dyn Thenable<T, E>>) {
        tracing::trace!("adopting the outcome of a thenable");
        let fulfilled = self.clone();
        let rejected = self.clone();
        thenable.subscribe(
            Box::new(move |value| fulfilled.settle(Ok(Resolution::Value(value)))),
            Box::new(move |reason| rejected.settle(Err(reason))),
        );
    }

    /// Run every queued handler against the settled slot, in registration
    /// order. Handlers registered meanwhile see a settled state and go
    /// through the scheduler instead.
    ///
    /// A panicking handler does not stop the rest of the snapshot. The first
    /// panic is resumed once every handler has run and every waker is woken.
    fn fire(&self, mut inner: MutexGuard<'_, Inner<T, E>>) {
        let handlers = std::mem::take(&mut inner.handlers);
        let wakers = std::mem::take(&mut inner.wakers);
        let outcome = match &inner.slot {
            Slot::Fulfilled(value) => Ok(value.clone()),
            Slot::Rejected(reason) => Err(reason.clone()),
            Slot::Pending => return,
        };
        drop(inner);

        if outcome.is_err() && handlers.is_empty() && wakers.is_empty() {
            tracing::debug!("deferred rejected with no handlers attached");
        }
        tracing::trace!(handlers = handlers.len(), "deferred settled");

        let mut panicked = None;
        for handler in handlers {
            let outcome = outcome.clone();
            let run = AssertUnwindSafe(|| dispatch(handler, outcome));
            if let Err(payload) = panic::catch_unwind(run) {
                tracing::debug!("handler panicked, running the remaining handlers first");
                panicked.get_or_insert(payload);
            }
        }
        for waker in wakers {
            waker.wake();
        }
        if let Some(payload) = panicked {
            panic::resume_unwind(payload);
        }
    }

    fn attach(self: &Arc<Self>, handler: Handler<T, E>) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let outcome = match &inner.slot {
            Slot::Pending => {
                inner.handlers.push(handler);
                return;
            }
            Slot::Fulfilled(value) => Ok(value.clone()),
            Slot::Rejected(reason) => Err(reason.clone()),
        };
        drop(guard);
        self.scheduler.schedule(move || dispatch(handler, outcome));
    }

    fn outcome(&self) -> Option<Result<T, E>> {
        match &self.lock().slot {
            Slot::Pending => None,
            Slot::Fulfilled(value) => Some(Ok(value.clone())),
            Slot::Rejected(reason) => Some(Err(reason.clone())),
        }
    }
}

fn dispatch<T, E>(handler: Handler<T, E>, outcome: Result<T, E>) {
    match outcome {
        Ok(value) => (handler.on_fulfilled)(value),
        Err(reason) => (handler.on_rejected)(reason),
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Fulfill with `value`. Typed values are stored as is; a dynamic
    /// [`Value`](crate::Value) that is a thenable is adopted instead.
    pub fn fulfill(&self, value: T) {
        self.settle(Ok(Resolution::Value(value)));
    }

    /// Resolve with anything convertible to a resolution, adopting the
    /// outcome of thenables.
    pub fn resolve<R: IntoResolution<T, E>>(&self, value: R) {
        self.settle(value.into_resolution());
    }

    /// Reject with `reason`, passed through verbatim.
    pub fn reject(&self, reason: E) {
        self.settle(Err(reason));
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    fn settle(&self, outcome: Result<Resolution<T, E>, E>) {
        if self.resolved.swap(true, Ordering::AcqRel) {
            tracing::trace!("ignoring repeated settlement through a resolver");
            return;
        }
        self.core.settle(outcome);
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Create a deferred value on the current scheduler. `setup` runs right
    /// away; returning `Err` before settling rejects with that error.
    pub fn new<F>(setup: F) -> Self
    where
        F: FnOnce(Resolver<T, E>) -> Result<(), E>,
    {
        Self::new_in(&Scheduler::current(), setup)
    }

    pub fn new_in<F>(scheduler: &Scheduler, setup: F) -> Self
    where
        F: FnOnce(Resolver<T, E>) -> Result<(), E>,
    {
        let (deferred, resolver) = Self::pending_in(scheduler);
        if let Err(reason) = setup(resolver.clone()) {
            resolver.reject(reason);
        }
        deferred
    }

    /// An unsettled value together with its resolver.
    pub fn pending() -> (Self, Resolver<T, E>) {
        Self::pending_in(&Scheduler::current())
    }

    pub fn pending_in(scheduler: &Scheduler) -> (Self, Resolver<T, E>) {
        let core = Core::new(scheduler.clone());
        let resolver = Resolver {
            core: core.clone(),
            resolved: Arc::new(AtomicBool::new(false)),
        };
        (Self { core }, resolver)
    }

    pub fn state(&self) -> State {
        match self.core.lock().slot {
            Slot::Pending => State::Pending,
            Slot::Fulfilled(_) => State::Fulfilled,
            Slot::Rejected(_) => State::Rejected,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == State::Pending
    }

    /// The settled outcome, if there is one yet.
    pub fn outcome(&self) -> Option<Result<T, E>> {
        self.core.outcome()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.core.scheduler
    }

    /// Whether both handles point at the same deferred value.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    /// Chain both outcomes into a new deferred value.
    ///
    /// Whatever the invoked callback returns resolves the new value, so
    /// returning a [`Deferred`] adopts its outcome and returning `Err`
    /// rejects. The source is unaffected either way.
    pub fn then<U, F, G, R1, R2>(&self, on_fulfilled: F, on_rejected: G) -> Deferred<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> R1 + Send + 'static,
        G: FnOnce(E) -> R2 + Send + 'static,
        R1: IntoResolution<U, E>,
        R2: IntoResolution<U, E>,
    {
        let (next, resolver) = Deferred::pending_in(self.scheduler());
        let fulfilled = resolver.clone();
        self.core.attach(Handler {
            on_fulfilled: Box::new(move |value| fulfilled.resolve(on_fulfilled(value))),
            on_rejected: Box::new(move |reason| resolver.resolve(on_rejected(reason))),
        });
        next
    }

    /// Transform the fulfillment value; rejections pass through unchanged.
    pub fn and_then<U, F, R>(&self, on_fulfilled: F) -> Deferred<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> R + Send + 'static,
        R: IntoResolution<U, E>,
    {
        self.then(on_fulfilled, Err::<U, E>)
    }

    /// Recover from a rejection; fulfillment passes through unchanged.
    pub fn catch<G, R>(&self, on_rejected: G) -> Deferred<T, E>
    where
        G: FnOnce(E) -> R + Send + 'static,
        R: IntoResolution<T, E>,
    {
        self.then(Ok::<T, E>, on_rejected)
    }

    /// Run `on_finally` once the value settles either way, wait for whatever
    /// it returns, then forward the original outcome. A failure from
    /// `on_finally` replaces the original outcome.
    pub fn finally<U, F, R>(&self, on_finally: F) -> Deferred<T, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce() -> R + Send + 'static,
        R: IntoResolution<U, E>,
    {
        let scheduler = self.scheduler().clone();
        let (next, resolver) = Deferred::pending_in(&scheduler);
        let on_finally = Arc::new(Mutex::new(Some(on_finally)));

        let after = move |outcome: Result<T, E>| {
            let callback = on_finally
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();
            if let Some(callback) = callback {
                let (done, done_resolver) = Deferred::<U, E>::pending_in(&scheduler);
                done_resolver.resolve(callback());
                resolver.resolve(done.then(move |_| outcome, Err::<T, E>));
            }
        };
        let after_rejected = after.clone();

        self.core.attach(Handler {
            on_fulfilled: Box::new(move |value| after(Ok(value))),
            on_rejected: Box::new(move |reason| after_rejected(Err(reason))),
        });
        next
    }
}

impl<T, E> Thenable<T, E> for Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn subscribe(&self, on_fulfilled: Callback<T>, on_rejected: Callback<E>) {
        self.core.attach(Handler {
            on_fulfilled,
            on_rejected,
        });
    }
}

impl<T, E> Future for Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut guard = self.core.lock();
        let inner = &mut *guard;
        match &inner.slot {
            Slot::Fulfilled(value) => Poll::Ready(Ok(value.clone())),
            Slot::Rejected(reason) => Poll::Ready(Err(reason.clone())),
            Slot::Pending => {
                if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    inner.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<T, E> fmt::Debug for Deferred<T, E>
where
    T: fmt::Debug + Clone + Send + 'static,
    E: fmt::Debug + Clone + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The payload may hold this very deferred, so format it unlocked.
        let handlers = self.core.lock().handlers.len();
        let mut out = f.debug_struct("Deferred");
        match self.core.outcome() {
            None => out.field("state", &State::Pending),
            Some(Ok(value)) => out.field("state", &State::Fulfilled).field("value", &value),
            Some(Err(reason)) => out.field("state", &State::Rejected).field("reason", &reason),
        };
        out.field("handlers", &handlers).finish()
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("resolved", &self.resolved.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{self, TaskQueue};
    use crate::value::Value;
    use futures::executor::block_on;
    use std::sync::atomic::AtomicUsize;

    fn drain() {
        scheduler::run_until_idle().unwrap();
    }

    #[test]
    fn test_settlement_is_deferred() {
        let (deferred, resolver) = Deferred::<i32, String>::pending();
        resolver.fulfill(5);
        assert_eq!(deferred.state(), State::Pending);
        assert_eq!(deferred.outcome(), None);
        drain();
        assert_eq!(deferred.outcome(), Some(Ok(5)));
    }

    #[test]
    fn test_first_settlement_wins() {
        let (deferred, resolver) = Deferred::<i32, String>::pending();
        resolver.fulfill(1);
        resolver.fulfill(2);
        resolver.reject("late".into());
        assert!(resolver.is_resolved());
        drain();
        assert_eq!(deferred.outcome(), Some(Ok(1)));
    }

    #[test]
    fn test_setup_error_rejects() {
        let deferred = Deferred::<i32, String>::new(|_| Err("boom".into()));
        drain();
        assert_eq!(deferred.outcome(), Some(Err("boom".to_string())));
    }

    #[test]
    fn test_setup_error_after_settling_is_ignored() {
        let deferred = Deferred::<i32, String>::new(|resolver| {
            resolver.fulfill(7);
            Err("too late".into())
        });
        drain();
        assert_eq!(deferred.outcome(), Some(Ok(7)));
    }

    #[test]
    fn test_handlers_fire_in_registration_order() {
        let (deferred, resolver) = Deferred::<i32, String>::pending();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            deferred.and_then(move |v| seen.lock().unwrap().push((tag, v)));
        }
        resolver.fulfill(3);
        drain();
        assert_eq!(*seen.lock().unwrap(), vec![("a", 3), ("b", 3), ("c", 3)]);
    }

    #[test]
    fn test_registration_during_drain_fires_once() {
        let (deferred, resolver) = Deferred::<i32, String>::pending();
        let count = Arc::new(AtomicUsize::new(0));
        let inner = deferred.clone();
        let outer_count = count.clone();
        deferred.and_then(move |_| {
            let count = outer_count.clone();
            inner.and_then(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
            outer_count.fetch_add(1, Ordering::SeqCst);
        });
        resolver.fulfill(1);
        drain();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_callback_runs_on_a_later_turn() {
        let queue = Arc::new(TaskQueue::new());
        let scheduler = Scheduler::from(queue.clone());
        let deferred = Deferred::<i32, String>::new_in(&scheduler, |resolver| {
            resolver.fulfill(1);
            Ok(())
        });
        queue.run_until_idle().unwrap();

        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        deferred.and_then(move |_| flag.store(true, Ordering::SeqCst));
        assert!(!called.load(Ordering::SeqCst));
        assert!(queue.run_once());
        assert!(called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_flattens_nested_deferred() {
        let (inner, inner_resolver) = Deferred::<i32, String>::pending();
        let (outer, outer_resolver) = Deferred::<i32, String>::pending();
        outer_resolver.resolve(inner.clone());
        drain();
        assert_eq!(outer.state(), State::Pending);

        inner_resolver.reject("inner failed".into());
        drain();
        assert_eq!(outer.outcome(), Some(Err("inner failed".to_string())));
    }

    #[test]
    fn test_resolver_latched_while_adopting() {
        let (inner, inner_resolver) = Deferred::<i32, String>::pending();
        let (outer, outer_resolver) = Deferred::<i32, String>::pending();
        outer_resolver.resolve(inner);
        outer_resolver.fulfill(99);
        drain();
        inner_resolver.fulfill(1);
        drain();
        assert_eq!(outer.outcome(), Some(Ok(1)));
    }

    #[test]
    fn test_then_error_rejects_derived_only() {
        let (source, resolver) = Deferred::<i32, String>::pending();
        let derived: Deferred<i32, String> = source.and_then(|_| Err("thrown".to_string()));
        resolver.fulfill(1);
        drain();
        assert_eq!(source.outcome(), Some(Ok(1)));
        assert_eq!(derived.outcome(), Some(Err("thrown".to_string())));
    }

    #[test]
    fn test_then_picks_branch() {
        let (source, resolver) = Deferred::<i32, String>::pending();
        let derived = source.then(|v| format!("ok {v}"), |e| format!("err {e}"));
        resolver.reject("x".into());
        drain();
        assert_eq!(derived.outcome(), Some(Ok("err x".to_string())));
    }

    #[test]
    fn test_finally_waits_for_returned_deferred() {
        let (source, resolver) = Deferred::<i32, String>::pending();
        let (gate, gate_resolver) = Deferred::<(), String>::pending();
        let finished = source.finally(move || gate);
        resolver.fulfill(4);
        drain();
        assert_eq!(finished.state(), State::Pending);
        gate_resolver.fulfill(());
        drain();
        assert_eq!(finished.outcome(), Some(Ok(4)));
    }

    #[test]
    fn test_finally_error_supersedes() {
        let source = Deferred::<i32, String>::new(|resolver| {
            resolver.reject("original".into());
            Ok(())
        });
        let finished = source.finally(|| Err::<(), String>("cleanup".into()));
        drain();
        assert_eq!(finished.outcome(), Some(Err("cleanup".to_string())));
    }

    #[test]
    fn test_finally_waits_on_typed_gate() {
        let (source, resolver) = Deferred::<i32, String>::pending();
        let (gate, gate_resolver) = Deferred::<i32, String>::pending();
        let finished = source.finally(move || gate);
        resolver.fulfill(4);
        drain();
        assert!(finished.is_pending());
        gate_resolver.fulfill(9);
        drain();
        assert_eq!(finished.outcome(), Some(Ok(4)));
    }

    #[test]
    fn test_fulfill_adopts_dynamic_deferred() {
        let (b, b_resolver) = Deferred::<Value, Value>::pending();
        let a = Deferred::<Value, Value>::new(|resolver| {
            resolver.fulfill(Value::Deferred(b));
            Ok(())
        });
        drain();
        assert!(a.is_pending());
        b_resolver.fulfill(Value::from(3));
        drain();
        assert_eq!(a.outcome(), Some(Ok(Value::from(3))));
    }

    #[test]
    fn test_fulfill_keeps_typed_payload() {
        let (inner, _inner_resolver) = Deferred::<i32, String>::pending();
        let (outer, resolver) = Deferred::<Deferred<i32, String>, String>::pending();
        resolver.fulfill(inner.clone());
        drain();
        assert!(outer.outcome().is_some_and(|held| held.is_ok_and(|d| d.ptr_eq(&inner))));
    }

    #[test]
    fn test_panicking_handler_spares_the_rest() {
        let queue = Arc::new(TaskQueue::new());
        let scheduler = Scheduler::from(queue.clone());
        let (deferred, resolver) = Deferred::<i32, String>::pending_in(&scheduler);
        let reached = Arc::new(AtomicUsize::new(0));
        deferred.and_then(|_| -> () { panic!("handler failed") });
        let count = reached.clone();
        deferred.and_then(move |v| {
            count.fetch_add(v as usize, Ordering::SeqCst);
        });
        resolver.fulfill(2);

        let run = std::panic::catch_unwind(AssertUnwindSafe(|| queue.run_until_idle()));
        assert!(run.is_err());
        assert_eq!(reached.load(Ordering::SeqCst), 2);
        assert_eq!(deferred.outcome(), Some(Ok(2)));
    }

    #[test]
    fn test_debug_does_not_hold_the_lock() {
        let (a, resolver) = Deferred::<Value, Value>::pending();
        resolver.fulfill(Value::Deferred(a.clone()));
        drain();
        assert!(format!("{:?}", a).contains("Pending"));

        let settled: Deferred<i32, String> = crate::resolve(5);
        drain();
        let printed = format!("{:?}", settled);
        assert!(printed.contains("Fulfilled"));
        assert!(printed.contains("value: 5"));
    }

    #[test]
    fn test_resolution_kinds() {
        let (deferred, _resolver) = Deferred::<i32, String>::pending();
        assert!(Resolution::from(deferred).is_thenable());
        assert!(!Resolution::<i32, String>::Value(1).is_thenable());
        assert!(!Value::from(1).into_resolution().is_ok_and(|r| r.is_thenable()));
    }

    #[test]
    fn test_await_after_driving() {
        let (deferred, resolver) = Deferred::<String, ()>::pending();
        resolver.fulfill("🍓".into());
        drain();
        assert_eq!(block_on(deferred), Ok("🍓".to_string()));
    }
}
