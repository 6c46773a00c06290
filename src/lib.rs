//! Deferred values with then-chaining.
//!
//! A [`Deferred`] holds a value that becomes available later. It is settled
//! once, either fulfilled with a value or rejected with a reason, and any
//! number of chains may observe that outcome through [`Deferred::then`] and
//! friends. Settlement always happens on a later turn of a [`Scheduler`],
//! never inside the call that caused it.
//!
//! # Examples
//!
//! ```
//! use thenable::{resolve, scheduler, Deferred};
//! use futures::executor::block_on;
//!
//! let answer: Deferred<i32, String> = resolve(21);
//! let doubled = answer.and_then(|v| v * 2);
//! scheduler::run_until_idle().unwrap();
//! assert_eq!(block_on(doubled), Ok(42));
//! ```
pub mod combinators;
pub mod deferred;
pub mod predicate;
pub mod scheduler;
pub mod value;

pub use combinators::{all, all_settled, race, reject, resolve, resolve_in, IntoSequence};
pub use deferred::{Callback, Deferred, IntoResolution, Resolution, Resolver, State, Thenable};
pub use scheduler::{Schedule, Scheduler, Task, TaskQueue};
pub use value::{Function, Object, Value};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("an ordered sequence must be provided, got {found}")]
    NotASequence { found: &'static str },
    #[error("{found} is not callable")]
    NotCallable { found: &'static str },
    #[error("task queue exceeded its limit of {limit} turns")]
    TurnLimitExceeded { limit: usize },
}
