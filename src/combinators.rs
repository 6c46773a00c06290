//! Factories composing deferred values.
use crate::{
    deferred::{Deferred, IntoResolution, Thenable},
    scheduler::Scheduler,
    value::Value,
    Error,
};
use std::sync::{Arc, Mutex};

/// Input accepted by [`all`], [`race`] and [`all_settled`]: something that
/// may or may not turn out to be an ordered sequence.
pub trait IntoSequence<T, E> {
    type Item: IntoResolution<T, E>;

    /// The items in order, or the reason to reject with.
    fn into_sequence(self) -> Result<Vec<Self::Item>, E>;
}

impl<T, E, R> IntoSequence<T, E> for Vec<R>
where
    R: IntoResolution<T, E>,
{
    type Item = R;

    fn into_sequence(self) -> Result<Vec<R>, E> {
        Ok(self)
    }
}

impl<T, E, R, const N: usize> IntoSequence<T, E> for [R; N]
where
    R: IntoResolution<T, E>,
{
    type Item = R;

    fn into_sequence(self) -> Result<Vec<R>, E> {
        Ok(self.into())
    }
}

impl IntoSequence<Value, Value> for Value {
    type Item = Value;

    fn into_sequence(self) -> Result<Vec<Value>, Value> {
        match self {
            Value::Array(items) => Ok(items),
            other => Err(Error::NotASequence {
                found: other.kind(),
            }
            .into()),
        }
    }
}

/// A deferred value heading for `value`, adopting it if it is a thenable.
pub fn resolve<T, E, R>(value: R) -> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    R: IntoResolution<T, E>,
{
    resolve_in(&Scheduler::current(), value)
}

pub fn resolve_in<T, E, R>(scheduler: &Scheduler, value: R) -> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    R: IntoResolution<T, E>,
{
    Deferred::new_in(scheduler, |resolver| {
        resolver.resolve(value);
        Ok(())
    })
}

/// A deferred value rejected with `reason`. The reason is never unwrapped,
/// even when it is itself a thenable.
pub fn reject<T, E>(reason: E) -> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    Deferred::new(|resolver| {
        resolver.reject(reason);
        Ok(())
    })
}

struct Countdown<T> {
    remaining: usize,
    results: Vec<Option<T>>,
}

impl<T> Countdown<T> {
    fn new(len: usize) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            remaining: len,
            results: (0..len).map(|_| None).collect(),
        }))
    }

    /// Record slot `index`, returning every result once the last one is in.
    fn record(countdown: &Mutex<Self>, index: usize, value: T) -> Option<Vec<T>> {
        let mut countdown = countdown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if countdown.results[index].replace(value).is_none() {
            countdown.remaining -= 1;
        }
        if countdown.remaining > 0 {
            return None;
        }
        Some(countdown.results.drain(..).flatten().collect())
    }
}

/// Fulfill with every item's value in input order, or reject with the first
/// rejection. Later settlements are ignored.
///
/// # Examples
///
/// ```
/// use thenable::{all, resolve, scheduler, Deferred, Resolution};
///
/// let two: Deferred<i32, String> = resolve(2);
/// let three: Deferred<i32, String> = resolve(3);
/// let every = all(vec![Resolution::Value(1), two.into(), three.into()]);
/// scheduler::run_until_idle().unwrap();
/// assert_eq!(every.outcome(), Some(Ok(vec![1, 2, 3])));
/// ```
pub fn all<T, E, S>(items: S) -> Deferred<Vec<T>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    S: IntoSequence<T, E>,
{
    let scheduler = Scheduler::current();
    Deferred::new_in(&scheduler.clone(), move |resolver| {
        let items = items.into_sequence()?;
        if items.is_empty() {
            resolver.fulfill(Vec::new());
            return Ok(());
        }
        tracing::trace!(len = items.len(), "all: waiting on items");

        let countdown = Countdown::new(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let fulfilled = resolver.clone();
            let rejected = resolver.clone();
            let countdown = countdown.clone();
            let entry: Deferred<T, E> = resolve_in(&scheduler, item);
            entry.subscribe(
                Box::new(move |value| {
                    if let Some(values) = Countdown::record(&countdown, index, value) {
                        fulfilled.fulfill(values);
                    }
                }),
                Box::new(move |reason| {
                    if rejected.is_resolved() {
                        tracing::trace!(index, "all: late rejection ignored");
                    }
                    rejected.reject(reason);
                }),
            );
        }
        Ok(())
    })
}

/// Settle like whichever item settles first.
pub fn race<T, E, S>(items: S) -> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    S: IntoSequence<T, E>,
{
    let scheduler = Scheduler::current();
    Deferred::new_in(&scheduler.clone(), move |resolver| {
        for item in items.into_sequence()? {
            let fulfilled = resolver.clone();
            let rejected = resolver.clone();
            let entry: Deferred<T, E> = resolve_in(&scheduler, item);
            entry.subscribe(
                Box::new(move |value| fulfilled.fulfill(value)),
                Box::new(move |reason| rejected.reject(reason)),
            );
        }
        Ok(())
    })
}

/// Wait for every item and report each outcome in input order. Only rejects
/// when `items` is not a sequence.
pub fn all_settled<T, E, S>(items: S) -> Deferred<Vec<Result<T, E>>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    S: IntoSequence<T, E>,
{
    let scheduler = Scheduler::current();
    Deferred::new_in(&scheduler.clone(), move |resolver| {
        let items = items.into_sequence()?;
        if items.is_empty() {
            resolver.fulfill(Vec::new());
            return Ok(());
        }

        let countdown = Countdown::new(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let fulfilled = resolver.clone();
            let rejected = resolver.clone();
            let on_value = countdown.clone();
            let on_reason = countdown.clone();
            let entry: Deferred<T, E> = resolve_in(&scheduler, item);
            entry.subscribe(
                Box::new(move |value| {
                    if let Some(outcomes) = Countdown::record(&on_value, index, Ok(value)) {
                        fulfilled.fulfill(outcomes);
                    }
                }),
                Box::new(move |reason| {
                    if let Some(outcomes) = Countdown::record(&on_reason, index, Err(reason)) {
                        rejected.fulfill(outcomes);
                    }
                }),
            );
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{deferred::Resolution, scheduler, State};

    fn drain() {
        scheduler::run_until_idle().unwrap();
    }

    #[test]
    fn test_all_keeps_input_order() {
        let (slow, slow_resolver) = Deferred::<&'static str, String>::pending();
        let (fast, fast_resolver) = Deferred::<&'static str, String>::pending();
        let every = all([slow, fast]);
        fast_resolver.fulfill("fast");
        drain();
        assert_eq!(every.state(), State::Pending);
        slow_resolver.fulfill("slow");
        drain();
        assert_eq!(every.outcome(), Some(Ok(vec!["slow", "fast"])));
    }

    #[test]
    fn test_all_empty_fulfills() {
        let every = all::<i32, String, _>(Vec::<Resolution<i32, String>>::new());
        drain();
        assert_eq!(every.outcome(), Some(Ok(vec![])));
    }

    #[test]
    fn test_all_first_rejection_wins() {
        let (first, first_resolver) = Deferred::<i32, String>::pending();
        let (second, second_resolver) = Deferred::<i32, String>::pending();
        let every = all(vec![first, second]);
        second_resolver.reject("second".into());
        drain();
        first_resolver.reject("first".into());
        drain();
        assert_eq!(every.outcome(), Some(Err("second".to_string())));
    }

    #[test]
    fn test_all_rejects_non_sequence() {
        let every = all(Value::Object(Default::default()));
        assert_eq!(every.state(), State::Pending);
        drain();
        let reason = every.outcome().and_then(Result::err);
        assert_eq!(
            reason.as_ref().and_then(Value::as_error),
            Some(&Error::NotASequence { found: "object" })
        );
    }

    #[test]
    fn test_race_first_settlement_wins() {
        let (slow, slow_resolver) = Deferred::<i32, String>::pending();
        let (fast, fast_resolver) = Deferred::<i32, String>::pending();
        let winner = race(vec![slow, fast]);
        fast_resolver.reject("fast".into());
        drain();
        slow_resolver.fulfill(1);
        drain();
        assert_eq!(winner.outcome(), Some(Err("fast".to_string())));
    }

    #[test]
    fn test_race_empty_stays_pending() {
        let winner = race::<i32, String, _>(Vec::<Resolution<i32, String>>::new());
        drain();
        assert_eq!(winner.state(), State::Pending);
    }

    #[test]
    fn test_all_settled_reports_everything() {
        let failed: Deferred<i32, String> = reject("no".into());
        let every = all_settled(vec![Resolution::Value(1), failed.into()]);
        drain();
        assert_eq!(
            every.outcome(),
            Some(Ok(vec![Ok(1), Err("no".to_string())]))
        );
    }

    #[test]
    fn test_reject_does_not_unwrap_thenables() {
        let inner: Deferred<Value, Value> = resolve(Value::from(1));
        let rejected: Deferred<Value, Value> = reject(inner.clone().into());
        drain();
        assert_eq!(rejected.outcome(), Some(Err(Value::Deferred(inner))));
    }
}
