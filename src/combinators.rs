//! Functions that compose values and futures into new promises.
//!
//! Every input may be a plain value or a `Value::Future`; plain values count
//! as already fulfilled.
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use crate::deferred::Cancel;
use crate::promise::{OnFulfilled, OnProgress, OnRejected};
use crate::runtime::{self, TimerHandle};
use crate::{rejected, resolved, Deferred, Error, Object, Promise, Thenable, Value};

/// One step of a [`seq`].
pub type Step = Box<dyn FnOnce(Value) -> Result<Value, Error>>;

/// The completion callback handed to a node-style function: an optional
/// error followed by the results.
pub type NodeCallback = Box<dyn FnOnce(Option<Error>, Vec<Value>)>;

type NodeBody = dyn Fn(Vec<Value>, NodeCallback) -> Result<(), Error>;

/// A function that reports completion through a trailing callback instead
/// of returning a promise.
#[derive(Clone)]
pub struct NodeFunction {
    arity: usize,
    body: Rc<NodeBody>,
}

impl NodeFunction {
    /// `arity` is the declared parameter count, callback included.
    pub fn new<F>(arity: usize, body: F) -> Self
    where
        F: Fn(Vec<Value>, NodeCallback) -> Result<(), Error> + 'static,
    {
        Self {
            arity,
            body: Rc::new(body),
        }
    }

    pub fn arity(&self) -> usize {
        self.arity
    }
}

/// Attaches callbacks to `value`, treating anything that is not a future as
/// already fulfilled.
pub fn when(
    value: impl Into<Value>,
    on_fulfilled: Option<OnFulfilled>,
    on_rejected: Option<OnRejected>,
    on_progress: Option<OnProgress>,
) -> Promise {
    match value.into() {
        Value::Future(thenable) => thenable.then(on_fulfilled, on_rejected, on_progress),
        value => resolved(value).then(on_fulfilled, on_rejected, on_progress),
    }
}

/// Calls `init` now and feeds its outcome through [`when`]. An `Err` from
/// `init` is an immediate rejection.
pub fn when_call<F>(
    init: F,
    on_fulfilled: Option<OnFulfilled>,
    on_rejected: Option<OnRejected>,
    on_progress: Option<OnProgress>,
) -> Promise
where
    F: FnOnce() -> Result<Value, Error>,
{
    match init() {
        Ok(value) => when(value, on_fulfilled, on_rejected, on_progress),
        Err(error) => rejected(error).then(on_fulfilled, on_rejected, on_progress),
    }
}

fn settled(result: Result<Value, Error>) -> Promise {
    match result {
        Ok(value) => resolved(value),
        Err(error) => rejected(error),
    }
}

/// Property `name` of `target`, which may be a future.
pub fn get(target: impl Into<Value>, name: &str) -> Promise {
    match target.into() {
        Value::Future(thenable) => thenable.get(name),
        value => settled(value.get(name)),
    }
}

/// Sets property `name` on `target`, which may be a future.
pub fn put(target: impl Into<Value>, name: &str, value: Value) -> Promise {
    match target.into() {
        Value::Future(thenable) => thenable.put(name, value),
        target => settled(target.put(name, value)),
    }
}

/// Calls method `name` on `target`, which may be a future.
pub fn call(target: impl Into<Value>, name: &str, args: Vec<Value>) -> Promise {
    match target.into() {
        Value::Future(thenable) => thenable.call(name, args),
        target => settled(target.call(name, &args)),
    }
}

/// Builds the promise of an aggregate. Cancelling it cancels every member,
/// whether or not the aggregate already settled.
fn aggregate(deferred: Deferred, members: Vec<Value>) -> Promise {
    let own = deferred.canceller();
    let cancel = Cancel::new(move |reason: Option<Error>| {
        for member in &members {
            if let Some(cancel) = member.as_thenable().and_then(|thenable| thenable.canceller()) {
                cancel.cancel(reason.clone());
            }
        }
        if let Some(own) = &own {
            own.cancel(reason);
        }
    });
    deferred.promise().with_cancel(cancel)
}

/// Fulfils with the list of every member's value, in input order, or rejects
/// with the first rejection.
///
/// # Examples
///
/// ```
/// use promised::{all, defer, resolved, Value};
///
/// let slow = defer();
/// let both = all([Value::from(slow.promise()), resolved(2).into()]);
/// slow.resolve(1.into()).unwrap();
/// assert_eq!(
///     futures::executor::block_on(both),
///     Ok(Value::List(vec![1.into(), 2.into()]))
/// );
/// ```
pub fn all<I>(values: I) -> Promise
where
    I: IntoIterator,
    I::Item: Into<Value>,
{
    let members: Vec<Value> = values.into_iter().map(Into::into).collect();
    if members.is_empty() {
        return resolved(Value::List(Vec::new()));
    }
    let deferred = Deferred::with_canceller(|_| None);
    let results = Rc::new(RefCell::new(vec![Value::Undefined; members.len()]));
    let remaining = Rc::new(Cell::new(members.len()));
    for (index, member) in members.iter().enumerate() {
        let on_value = deferred.clone();
        let on_error = deferred.clone();
        let results = results.clone();
        let remaining = remaining.clone();
        when(
            member.clone(),
            Some(Box::new(move |value| {
                results.borrow_mut()[index] = value;
                remaining.set(remaining.get() - 1);
                if remaining.get() == 0 && !on_value.is_settled() {
                    let values = results.take();
                    on_value.resolve_or_log(Value::List(values));
                }
                Ok(Value::Undefined)
            })),
            Some(Box::new(move |error| {
                if !on_error.is_settled() {
                    on_error.reject_or_log(error);
                }
                Ok(Value::Undefined)
            })),
            None,
        );
    }
    aggregate(deferred, members)
}

/// Like [`all`] over the values of a mapping; fulfils with an [`Object`]
/// holding the same keys.
pub fn all_keys<I, K, V>(mapping: I) -> Promise
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    let (keys, values): (Vec<String>, Vec<Value>) = mapping
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .unzip();
    let combined = all(values);
    let cancel = combined.canceller();
    let keyed = combined.done(move |list| {
        let values = match list {
            Value::List(values) => values,
            _ => Vec::new(),
        };
        Ok(keys.into_iter().zip(values).collect::<Object>().into())
    });
    match cancel {
        Some(cancel) => keyed.with_cancel(cancel),
        None => keyed,
    }
}

/// Settles like whichever member settles first. An empty input fulfils with
/// `Undefined`.
pub fn first<I>(values: I) -> Promise
where
    I: IntoIterator,
    I::Item: Into<Value>,
{
    let members: Vec<Value> = values.into_iter().map(Into::into).collect();
    if members.is_empty() {
        return resolved(Value::Undefined);
    }
    let deferred = Deferred::with_canceller(|_| None);
    for member in &members {
        let on_value = deferred.clone();
        let on_error = deferred.clone();
        when(
            member.clone(),
            Some(Box::new(move |value| {
                if !on_value.is_settled() {
                    on_value.resolve_or_log(value);
                }
                Ok(Value::Undefined)
            })),
            Some(Box::new(move |error| {
                if !on_error.is_settled() {
                    on_error.reject_or_log(error);
                }
                Ok(Value::Undefined)
            })),
            None,
        );
    }
    aggregate(deferred, members)
}

/// Runs `steps` one after another, each receiving the previous step's value
/// (the first receives `initial`). Cancelling stops the sequence once the
/// step in flight settles.
pub fn seq<I>(steps: I, initial: impl Into<Value>) -> Promise
where
    I: IntoIterator<Item = Step>,
{
    let deferred = Deferred::with_canceller(|_| None);
    let steps = Rc::new(RefCell::new(steps.into_iter().collect::<VecDeque<_>>()));
    next_step(steps, deferred.clone(), initial.into());
    deferred.promise()
}

fn next_step(steps: Rc<RefCell<VecDeque<Step>>>, deferred: Deferred, mut value: Value) {
    loop {
        if deferred.is_settled() {
            tracing::debug!(remaining = steps.borrow().len(), "sequence stopped early");
            return;
        }
        let step = steps.borrow_mut().pop_front();
        let Some(step) = step else {
            deferred.resolve_or_log(value);
            return;
        };
        match step(value) {
            Err(error) => return deferred.reject_or_log(error),
            Ok(Value::Future(thenable)) => {
                let on_error = deferred.clone();
                thenable.then(
                    Some(Box::new(move |value| {
                        next_step(steps, deferred, value);
                        Ok(Value::Undefined)
                    })),
                    Some(Box::new(move |error| {
                        on_error.reject_or_log(error);
                        Ok(Value::Undefined)
                    })),
                    None,
                );
                return;
            }
            // plain values loop instead of recursing
            Ok(next) => value = next,
        }
    }
}

/// Fulfils with `Undefined` after `ms`. Cancelling clears the timer.
pub fn delay(ms: Duration) -> Promise {
    let timer: Rc<Cell<Option<TimerHandle>>> = Rc::new(Cell::new(None));
    let slot = timer.clone();
    let deferred = Deferred::with_canceller(move |_| {
        if let Some(handle) = slot.take() {
            handle.clear();
        }
        None
    });
    let on_fire = deferred.clone();
    timer.set(Some(runtime::set_timeout(ms, move || {
        on_fire.resolve_or_log(Value::Undefined)
    })));
    deferred.promise()
}

/// Calls a node-style function with `args` followed by a completion
/// callback.
pub fn execute(function: &NodeFunction, args: Vec<Value>) -> Promise {
    let deferred = Deferred::new();
    let completion = deferred.clone();
    let callback: NodeCallback =
        Box::new(move |error, results| complete(&completion, error, results));
    if let Err(error) = (function.body)(args, callback) {
        deferred.reject_or_log(error);
    }
    deferred.promise()
}

fn complete(deferred: &Deferred, error: Option<Error>, mut results: Vec<Value>) {
    if let Some(error) = error {
        return deferred.reject_or_log(error);
    }
    let value = match results.len() {
        0 => Value::Undefined,
        1 => results.pop().unwrap_or_default(),
        _ => Value::List(results),
    };
    deferred.resolve_or_log(value);
}

/// Wraps a node-style function into one returning a promise.
///
/// The callback goes in the last declared parameter slot, so call-site
/// arguments are padded with `Undefined` or truncated to fit. With
/// `assume_no_declared_callback_param` the callback follows the call-site
/// arguments instead.
pub fn convert_async(
    function: NodeFunction,
    assume_no_declared_callback_param: bool,
) -> impl Fn(Vec<Value>) -> Promise {
    move |mut args| {
        if !assume_no_declared_callback_param {
            args.resize(function.arity.saturating_sub(1), Value::Undefined);
        }
        execute(&function, args)
    }
}
