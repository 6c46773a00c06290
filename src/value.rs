//! Loosely typed values, for callers that need duck-typed thenables.
//!
//! An [`Object`] whose `then` member is a [`Function`] is treated as a
//! foreign thenable: resolving with it calls `then` with a resolve and a
//! reject function and adopts whichever gets called first.
use crate::{
    deferred::{Callback, Deferred, IntoResolution, Resolution, Thenable},
    predicate::{is_callable, is_thenable},
    Error,
};
use indexmap::IndexMap;
use std::{
    any::{Any, TypeId},
    fmt,
    sync::{Arc, Mutex},
};

pub type Object = IndexMap<String, Value>;

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(Object),
    Function(Function),
    Deferred(Deferred<Value, Value>),
    Error(Error),
}

type NativeFn = dyn Fn(Vec<Value>) -> Result<Value, Value> + Send + Sync;

/// A callable value. Returning `Err` is how a function throws.
#[derive(Clone)]
pub struct Function(Arc<NativeFn>);

impl Function {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, Value> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, args: Vec<Value>) -> Result<Value, Value> {
        (self.0)(args)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Function(..)")
    }
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Deferred(_) => "deferred",
            Value::Error(_) => "error",
        }
    }

    /// Look up an object member.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(object) => object.get(key),
            _ => None,
        }
    }

    /// Call a function value; anything else throws [`Error::NotCallable`].
    pub fn call(&self, args: Vec<Value>) -> Result<Value, Value> {
        match self {
            Value::Function(function) => function.call(args),
            other => Err(Value::Error(Error::NotCallable {
                found: other.kind(),
            })),
        }
    }

    pub fn as_error(&self) -> Option<&Error> {
        match self {
            Value::Error(error) => Some(error),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Deferred(a), Value::Deferred(b)) => a.ptr_eq(b),
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Object> for Value {
    fn from(object: Object) -> Self {
        Value::Object(object)
    }
}

impl From<Function> for Value {
    fn from(function: Function) -> Self {
        Value::Function(function)
    }
}

impl From<Deferred<Value, Value>> for Value {
    fn from(deferred: Deferred<Value, Value>) -> Self {
        Value::Deferred(deferred)
    }
}

impl From<Error> for Value {
    fn from(error: Error) -> Self {
        Value::Error(error)
    }
}

impl IntoResolution<Value, Value> for Value {
    fn into_resolution(self) -> Result<Resolution<Value, Value>, Value> {
        if !is_thenable(&self) {
            return Ok(Resolution::Value(self));
        }
        match self {
            Value::Deferred(deferred) => Ok(Resolution::Thenable(Box::new(deferred))),
            Value::Object(object) => {
                let then = match object.get("then") {
                    Some(Value::Function(then)) => Some(then.clone()),
                    _ => None,
                };
                match then {
                    Some(then) => Ok(Resolution::Thenable(Box::new(Foreign { then }))),
                    None => Ok(Resolution::Value(Value::Object(object))),
                }
            }
            other => Ok(Resolution::Value(other)),
        }
    }
}

/// Pull a thenable out of `slot` when the payload is a dynamic [`Value`]
/// settling a `Deferred<Value, Value>`. Typed payloads are left alone.
pub(crate) fn take_thenable<T, E>(slot: &mut Option<T>) -> Option<Box<dyn Thenable<T, E>>>
where
    T: 'static,
    E: 'static,
{
    if TypeId::of::<E>() != TypeId::of::<Value>() {
        return None;
    }
    let dynamic = (slot as &mut dyn Any).downcast_mut::<Option<Value>>()?;
    if !dynamic.as_ref().is_some_and(is_thenable) {
        return None;
    }
    let thenable = match dynamic.take()?.into_resolution() {
        Ok(Resolution::Thenable(thenable)) => thenable,
        Ok(Resolution::Value(value)) | Err(value) => {
            *dynamic = Some(value);
            return None;
        }
    };
    let boxed: Box<dyn Any> = Box::new(thenable);
    boxed
        .downcast::<Box<dyn Thenable<T, E>>>()
        .ok()
        .map(|thenable| *thenable)
}

type Pending = Arc<Mutex<Option<(Callback<Value>, Callback<Value>)>>>;

fn take(pending: &Pending) -> Option<(Callback<Value>, Callback<Value>)> {
    pending
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take()
}

/// An object with a callable `then` member.
struct Foreign {
    then: Function,
}

impl Thenable<Value, Value> for Foreign {
    fn subscribe(&self, on_fulfilled: Callback<Value>, on_rejected: Callback<Value>) {
        let pending: Pending = Arc::new(Mutex::new(Some((on_fulfilled, on_rejected))));

        let resolve = {
            let pending = pending.clone();
            Function::new(move |args| {
                let value = args.into_iter().next().unwrap_or_default();
                if let Some((on_fulfilled, on_rejected)) = take(&pending) {
                    match value.into_resolution() {
                        Ok(Resolution::Thenable(next)) => next.subscribe(on_fulfilled, on_rejected),
                        Ok(Resolution::Value(value)) => on_fulfilled(value),
                        Err(reason) => on_rejected(reason),
                    }
                }
                Ok(Value::Undefined)
            })
        };
        let reject = {
            let pending = pending.clone();
            Function::new(move |args| {
                if let Some((_, on_rejected)) = take(&pending) {
                    on_rejected(args.into_iter().next().unwrap_or_default());
                }
                Ok(Value::Undefined)
            })
        };

        if let Err(reason) = self.then.call(vec![resolve.into(), reject.into()]) {
            match take(&pending) {
                Some((_, on_rejected)) => on_rejected(reason),
                None => tracing::trace!("foreign then threw after settling"),
            }
        }
    }
}

impl Deferred<Value, Value> {
    /// Dynamic `then`: a non-callable argument passes the outcome through.
    /// Values returned by the callbacks are resolved, so thenables flatten.
    pub fn then_value(&self, on_fulfilled: Value, on_rejected: Value) -> Self {
        let (next, resolver) = Deferred::pending_in(self.scheduler());
        let rejected = resolver.clone();
        self.subscribe(
            Box::new(move |value| {
                let outcome = if is_callable(&on_fulfilled) {
                    on_fulfilled.call(vec![value])
                } else {
                    Ok(value)
                };
                match outcome {
                    Ok(value) => resolver.resolve(value),
                    Err(reason) => resolver.reject(reason),
                }
            }),
            Box::new(move |reason| {
                let outcome = if is_callable(&on_rejected) {
                    on_rejected.call(vec![reason])
                } else {
                    Err(reason)
                };
                match outcome {
                    Ok(value) => rejected.resolve(value),
                    Err(reason) => rejected.reject(reason),
                }
            }),
        );
        next
    }
}
