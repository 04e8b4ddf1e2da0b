//! The read-only side of a deferred.
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::deferred::Cancel;
use crate::{Deferred, Error, Value};

/// Called with the fulfilled value. An `Err` rejects the derived promise and
/// a returned `Value::Future` is followed.
pub type OnFulfilled = Box<dyn FnOnce(Value) -> Result<Value, Error>>;
/// Called with the rejection. `Ok` puts the derived promise back on the
/// fulfilled track.
pub type OnRejected = Box<dyn FnOnce(Error) -> Result<Value, Error>>;
pub type OnProgress = Rc<dyn Fn(&Value)>;

/// The future value contract. `then` is the only required operation; every
/// other operation is derived from it.
pub trait Thenable {
    fn then(
        &self,
        on_fulfilled: Option<OnFulfilled>,
        on_rejected: Option<OnRejected>,
        on_progress: Option<OnProgress>,
    ) -> Promise;

    /// The cancel capability, if this future has one.
    fn canceller(&self) -> Option<Cancel> {
        None
    }

    fn done<F>(&self, on_fulfilled: F) -> Promise
    where
        F: FnOnce(Value) -> Result<Value, Error> + 'static,
        Self: Sized,
    {
        self.then(Some(Box::new(on_fulfilled)), None, None)
    }

    fn success<F>(&self, on_fulfilled: F) -> Promise
    where
        F: FnOnce(Value) -> Result<Value, Error> + 'static,
        Self: Sized,
    {
        self.done(on_fulfilled)
    }

    fn fail<F>(&self, on_rejected: F) -> Promise
    where
        F: FnOnce(Error) -> Result<Value, Error> + 'static,
        Self: Sized,
    {
        self.then(None, Some(Box::new(on_rejected)), None)
    }

    fn error<F>(&self, on_rejected: F) -> Promise
    where
        F: FnOnce(Error) -> Result<Value, Error> + 'static,
        Self: Sized,
    {
        self.fail(on_rejected)
    }

    fn progress<F>(&self, on_progress: F) -> Promise
    where
        F: Fn(&Value) + 'static,
        Self: Sized,
    {
        self.then(None, None, Some(Rc::new(on_progress)))
    }

    /// Property `name` of the fulfilled value.
    fn get(&self, name: &str) -> Promise {
        let name = name.to_owned();
        self.then(Some(Box::new(move |value| value.get(&name))), None, None)
    }

    /// Sets property `name` on the fulfilled value; fulfils with `value`.
    fn put(&self, name: &str, value: Value) -> Promise {
        let name = name.to_owned();
        self.then(
            Some(Box::new(move |target| target.put(&name, value))),
            None,
            None,
        )
    }

    /// Calls method `name` on the fulfilled value.
    fn call(&self, name: &str, args: Vec<Value>) -> Promise {
        let name = name.to_owned();
        self.then(
            Some(Box::new(move |target| target.call(&name, &args))),
            None,
            None,
        )
    }
}

/// A handle on the eventual outcome of a [`Deferred`].
///
/// Promises can be chained with [`Thenable::then`] or awaited; awaiting a
/// rejected promise counts as handling the rejection.
#[derive(Clone, Debug)]
pub struct Promise {
    deferred: Deferred,
    cancel: Option<Cancel>,
}

impl Promise {
    pub(crate) fn new(deferred: Deferred) -> Self {
        let cancel = deferred.canceller();
        Self { deferred, cancel }
    }

    /// Replaces the cancel capability, for aggregates whose cancellation must
    /// reach their members even after the aggregate itself settled.
    pub(crate) fn with_cancel(mut self, cancel: Cancel) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn is_settled(&self) -> bool {
        self.deferred.is_settled()
    }
}

impl Thenable for Promise {
    fn then(
        &self,
        on_fulfilled: Option<OnFulfilled>,
        on_rejected: Option<OnRejected>,
        on_progress: Option<OnProgress>,
    ) -> Promise {
        self.deferred
            .subscribe(self.cancel.clone(), on_fulfilled, on_rejected, on_progress)
    }

    fn canceller(&self) -> Option<Cancel> {
        self.cancel.clone()
    }
}

/// Polling only observes settlement. Timers (`delay`, `timeout`, the
/// unhandled-rejection check) fire only while this thread's loop runs through
/// [`runtime::turn`](crate::runtime::turn), [`runtime::run`](crate::runtime::run)
/// or [`runtime::block_on`](crate::runtime::block_on), so a promise waiting on
/// one never completes under a foreign executor alone.
impl Future for Promise {
    type Output = Result<Value, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.deferred.poll_result(cx)
    }
}

/// A promise already fulfilled with `value`.
pub fn resolved(value: impl Into<Value>) -> Promise {
    let deferred = Deferred::new();
    deferred.resolve_or_log(value.into());
    deferred.promise()
}

/// A promise already rejected with `error`.
pub fn rejected(error: Error) -> Promise {
    let deferred = Deferred::new();
    deferred.reject_or_log(error);
    deferred.promise()
}
