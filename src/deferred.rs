//! The producer side of a promise.
//!
//! A `Deferred` owns the listener queue of its promise and is the only thing
//! allowed to settle it. Every handle is a cheap clone of the same shared
//! state, so a deferred can be moved into as many callbacks as needed.
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use crate::promise::{OnFulfilled, OnProgress, OnRejected};
use crate::{runtime, Error, Promise, Thenable, Value};

/// Shared between every hop a rejection passes through untouched, so that
/// observing it anywhere down the chain counts as observing it at the root.
type HandledFlag = Rc<Cell<bool>>;

type Canceller = Rc<dyn Fn(Option<Error>) -> Option<Error>>;

/// The cancel capability of a promise. Only deferreds created with a
/// canceller (and promises derived from them) hand one out.
#[derive(Clone)]
pub struct Cancel(Rc<dyn Fn(Option<Error>)>);

impl Cancel {
    pub(crate) fn new<F>(f: F) -> Self
    where
        F: Fn(Option<Error>) + 'static,
    {
        Self(Rc::new(f))
    }

    /// Cancels with an optional reason. Has no effect once settled.
    pub fn cancel(&self, reason: Option<Error>) {
        (self.0)(reason)
    }
}

impl fmt::Debug for Cancel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cancel {{ ... }}")
    }
}

struct Listener {
    on_fulfilled: Option<OnFulfilled>,
    on_rejected: Option<OnRejected>,
    on_progress: Option<OnProgress>,
    deferred: Deferred,
}

struct Inner {
    result: Option<Result<Value, Error>>,
    /// `None` once the queue has been drained after settlement.
    waiting: Option<Vec<Option<Listener>>>,
    handled: HandledFlag,
    timeout: Option<Duration>,
    canceller: Option<Canceller>,
    wakers: Vec<Waker>,
}

/// The mutable controller of a [`Promise`].
///
/// # Examples
///
/// ```
/// use promised::{defer, Thenable, Value};
///
/// let deferred = defer();
/// let plus_two = deferred
///     .promise()
///     .done(|v| Ok(Value::from(v.as_number().unwrap() + 1.0)))
///     .done(|v| Ok(Value::from(v.as_number().unwrap() + 1.0)));
/// deferred.resolve(1.into()).unwrap();
/// assert_eq!(futures::executor::block_on(plus_two), Ok(Value::from(3)));
/// ```
#[derive(Clone)]
pub struct Deferred {
    inner: Rc<RefCell<Inner>>,
}

impl Default for Deferred {
    fn default() -> Self {
        Self::from_canceller(None)
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Deferred")
            .field("result", &inner.result)
            .field("cancellable", &inner.canceller.is_some())
            .field("timeout", &inner.timeout)
            .finish()
    }
}

impl Deferred {
    /// A deferred without a cancel capability.
    pub fn new() -> Self {
        Self::default()
    }

    /// A deferred whose promise can be cancelled. The canceller receives the
    /// cancel reason and may return the error to reject with.
    pub fn with_canceller<F>(canceller: F) -> Self
    where
        F: Fn(Option<Error>) -> Option<Error> + 'static,
    {
        Self::from_canceller(Some(Rc::new(canceller)))
    }

    fn from_canceller(canceller: Option<Canceller>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                result: None,
                waiting: Some(Vec::new()),
                handled: Rc::new(Cell::new(false)),
                timeout: None,
                canceller,
                wakers: Vec::new(),
            })),
        }
    }

    pub fn promise(&self) -> Promise {
        Promise::new(self.clone())
    }

    pub fn is_settled(&self) -> bool {
        self.inner.borrow().result.is_some()
    }

    pub fn is_cancellable(&self) -> bool {
        self.inner.borrow().canceller.is_some()
    }

    /// Fulfils the promise.
    pub fn resolve(&self, value: Value) -> Result<(), Error> {
        self.settle(Ok(value), None).map(|_| ())
    }

    /// Rejects the promise and reports it on the unhandled-rejection channel
    /// if nobody observes it within the grace period. Returns whether a
    /// listener observed the rejection synchronously.
    pub fn reject(&self, error: Error) -> Result<bool, Error> {
        let handled = self.settle(Err(error.clone()), None)?;
        if !handled {
            self.watch_unhandled(error);
        }
        Ok(handled)
    }

    /// Rejects without arming the unhandled-rejection check.
    pub fn reject_quietly(&self, error: Error) -> Result<bool, Error> {
        self.settle(Err(error), None)
    }

    /// Broadcasts a progress update to every listener, in registration
    /// order. Listeners added by a progress callback during the broadcast
    /// still receive it. Ignored once settled.
    pub fn progress(&self, update: Value) {
        let mut index = 0;
        loop {
            let callback = {
                let inner = self.inner.borrow();
                if inner.result.is_some() {
                    break;
                }
                let Some(slot) = inner.waiting.as_ref().and_then(|w| w.get(index)) else {
                    break;
                };
                slot.as_ref().and_then(|listener| listener.on_progress.clone())
            };
            index += 1;
            if let Some(callback) = callback {
                callback(&update);
            }
        }
    }

    pub fn then(
        &self,
        on_fulfilled: Option<OnFulfilled>,
        on_rejected: Option<OnRejected>,
        on_progress: Option<OnProgress>,
    ) -> Promise {
        self.promise().then(on_fulfilled, on_rejected, on_progress)
    }

    /// The cancel capability, present only when created with a canceller.
    pub fn canceller(&self) -> Option<Cancel> {
        if !self.is_cancellable() {
            return None;
        }
        let weak: Weak<RefCell<Inner>> = Rc::downgrade(&self.inner);
        Some(Cancel::new(move |reason| {
            if let Some(inner) = weak.upgrade() {
                Deferred { inner }.cancel(reason);
            }
        }))
    }

    /// Arms a one-shot timeout. Only the first call arms a timer; every call
    /// returns the duration that was armed.
    pub fn timeout(&self, ms: Duration) -> Duration {
        {
            let mut inner = self.inner.borrow_mut();
            if let Some(armed) = inner.timeout {
                return armed;
            }
            inner.timeout = Some(ms);
        }
        let weak = Rc::downgrade(&self.inner);
        runtime::set_timeout(ms, move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let deferred = Deferred { inner };
            if deferred.is_settled() {
                return;
            }
            tracing::debug!(?ms, "deferred timed out");
            if deferred.is_cancellable() {
                deferred.cancel(Some(Error::Timeout));
            } else if let Err(err) = deferred.reject(Error::Timeout) {
                tracing::debug!(%err, "timeout lost the race to settlement");
            }
        });
        ms
    }

    pub fn armed_timeout(&self) -> Option<Duration> {
        self.inner.borrow().timeout
    }

    fn cancel(&self, reason: Option<Error>) {
        let canceller = {
            let inner = self.inner.borrow();
            if inner.result.is_some() {
                return;
            }
            match inner.canceller.clone() {
                Some(canceller) => canceller,
                None => return,
            }
        };
        let error = canceller(reason.clone()).unwrap_or_else(|| match reason {
            Some(Error::Timeout) => Error::Timeout,
            reason => Error::cancelled(reason),
        });
        if self.is_settled() {
            tracing::debug!(%error, "deferred settled while cancelling");
            return;
        }
        if let Err(err) = self.reject(error) {
            tracing::debug!(%err, "cancellation lost the race to settlement");
        }
    }

    pub(crate) fn subscribe(
        &self,
        upstream: Option<Cancel>,
        on_fulfilled: Option<OnFulfilled>,
        on_rejected: Option<OnRejected>,
        on_progress: Option<OnProgress>,
    ) -> Promise {
        let downstream = match upstream {
            Some(cancel) => Deferred::with_canceller(move |reason| {
                cancel.cancel(reason);
                None
            }),
            None => Deferred::new(),
        };
        let listener = Listener {
            on_fulfilled,
            on_rejected,
            on_progress,
            deferred: downstream.clone(),
        };
        let ready = {
            let mut inner = self.inner.borrow_mut();
            if let Some(waiting) = inner.waiting.as_mut() {
                waiting.push(Some(listener));
                None
            } else {
                Some(listener)
            }
        };
        if let Some(listener) = ready {
            self.notify(listener);
        }
        downstream.promise()
    }

    pub(crate) fn poll_result(&self, cx: &mut Context<'_>) -> Poll<Result<Value, Error>> {
        let mut inner = self.inner.borrow_mut();
        match inner.result.clone() {
            Some(result) => {
                if result.is_err() {
                    inner.handled.set(true);
                }
                Poll::Ready(result)
            }
            None => {
                if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    inner.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }

    fn settle(
        &self,
        result: Result<Value, Error>,
        shared: Option<HandledFlag>,
    ) -> Result<bool, Error> {
        let (handled, wakers) = {
            let mut inner = self.inner.borrow_mut();
            if inner.result.is_some() {
                return Err(Error::AlreadySettled);
            }
            if let Some(flag) = shared {
                inner.handled = flag;
            }
            if result.is_err() && !inner.wakers.is_empty() {
                inner.handled.set(true);
            }
            inner.result = Some(result);
            (inner.handled.clone(), std::mem::take(&mut inner.wakers))
        };
        self.drain();
        for waker in wakers {
            waker.wake();
        }
        Ok(handled.get())
    }

    /// Notifies the queued listeners by index so that listeners queued while
    /// draining are notified in turn.
    fn drain(&self) {
        let mut index = 0;
        loop {
            let listener = {
                let mut inner = self.inner.borrow_mut();
                let len = inner.waiting.as_ref().map_or(0, Vec::len);
                if index >= len {
                    inner.waiting = None;
                    break;
                }
                inner.waiting.as_mut().and_then(|waiting| waiting[index].take())
            };
            index += 1;
            if let Some(listener) = listener {
                self.notify(listener);
            }
        }
    }

    fn notify(&self, listener: Listener) {
        let (result, handled) = {
            let inner = self.inner.borrow();
            match inner.result.clone() {
                Some(result) => (result, inner.handled.clone()),
                None => return,
            }
        };
        let Listener {
            on_fulfilled,
            on_rejected,
            deferred,
            ..
        } = listener;
        let outcome = match result {
            Ok(value) => match on_fulfilled {
                Some(callback) => {
                    handled.set(true);
                    callback(value)
                }
                None => return deferred.resolve_or_log(value),
            },
            Err(error) => match on_rejected {
                Some(callback) => {
                    handled.set(true);
                    callback(error)
                }
                None => {
                    tracing::trace!(%error, "passing rejection downstream");
                    if let Err(err) = deferred.settle(Err(error), Some(handled)) {
                        tracing::debug!(%err, "downstream already settled");
                    }
                    return;
                }
            },
        };
        deferred.adopt(outcome);
    }

    /// Settles with a callback's outcome, following it if it is itself a
    /// future.
    pub(crate) fn adopt(&self, outcome: Result<Value, Error>) {
        match outcome {
            Ok(Value::Future(thenable)) => {
                let on_value = self.clone();
                let on_error = self.clone();
                thenable.then(
                    Some(Box::new(move |value| {
                        on_value.resolve_or_log(value);
                        Ok(Value::Undefined)
                    })),
                    Some(Box::new(move |error| {
                        on_error.reject_or_log(error);
                        Ok(Value::Undefined)
                    })),
                    None,
                );
            }
            Ok(value) => self.resolve_or_log(value),
            Err(error) => self.reject_or_log(error),
        }
    }

    pub(crate) fn resolve_or_log(&self, value: Value) {
        if let Err(err) = self.resolve(value) {
            tracing::debug!(%err, "dropping fulfilment of a settled deferred");
        }
    }

    pub(crate) fn reject_or_log(&self, error: Error) {
        if let Err(err) = self.reject(error) {
            tracing::debug!(%err, "dropping rejection of a settled deferred");
        }
    }

    fn watch_unhandled(&self, error: Error) {
        let handled = self.inner.borrow().handled.clone();
        let grace = runtime::grace_period();
        runtime::set_timeout(grace, move || {
            if !handled.get() {
                runtime::report_unhandled(&error);
            }
        });
    }
}

/// Creates a deferred without a cancel capability.
pub fn defer() -> Deferred {
    Deferred::new()
}

/// Creates a deferred whose promise can be cancelled.
pub fn defer_cancellable<F>(canceller: F) -> Deferred
where
    F: Fn(Option<Error>) -> Option<Error> + 'static,
{
    Deferred::with_canceller(canceller)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn record(log: &Rc<RefCell<Vec<String>>>, tag: &'static str) -> OnFulfilled {
        let log = log.clone();
        Box::new(move |value| {
            log.borrow_mut().push(format!("{tag}:{value}"));
            Ok(value)
        })
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let deferred = Deferred::new();
        deferred.then(Some(record(&log, "a")), None, None);
        deferred.then(Some(record(&log, "b")), None, None);
        deferred.resolve("x".into()).unwrap();
        deferred.then(Some(record(&log, "c")), None, None);
        assert_eq!(*log.borrow(), vec!["a:x", "b:x", "c:x"]);
    }

    #[test]
    fn listener_added_while_draining_is_queued_behind_the_others() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let deferred = Deferred::new();
        let late = deferred.clone();
        let late_log = log.clone();
        deferred.then(
            Some(Box::new(move |value| {
                late.then(Some(record(&late_log, "late")), None, None);
                late_log.borrow_mut().push("first".into());
                Ok(value)
            })),
            None,
            None,
        );
        deferred.then(Some(record(&log, "second")), None, None);
        deferred.resolve(1.into()).unwrap();
        assert_eq!(*log.borrow(), vec!["first", "second:1", "late:1"]);
    }

    #[test]
    fn settling_twice_is_a_fault() {
        let deferred = Deferred::new();
        deferred.resolve(1.into()).unwrap();
        assert_eq!(deferred.resolve(2.into()), Err(Error::AlreadySettled));
        assert_eq!(deferred.reject(Error::msg("late")), Err(Error::AlreadySettled));
    }

    #[test]
    fn progress_reaches_listeners_added_during_broadcast() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let deferred = Deferred::new();
        let again = deferred.clone();
        let added = Rc::new(Cell::new(false));
        let seen_outer = seen.clone();
        deferred.then(
            None,
            None,
            Some(Rc::new(move |update: &Value| {
                seen_outer.borrow_mut().push(format!("outer:{update}"));
                if !added.replace(true) {
                    let seen_inner = seen_outer.clone();
                    again.then(
                        None,
                        None,
                        Some(Rc::new(move |update: &Value| {
                            seen_inner.borrow_mut().push(format!("inner:{update}"));
                        })),
                    );
                }
            })),
        );
        deferred.progress(50.into());
        deferred.progress(90.into());
        deferred.resolve(Value::Undefined).unwrap();
        deferred.progress(100.into());
        assert_eq!(
            *seen.borrow(),
            vec!["outer:50", "inner:50", "outer:90", "inner:90"]
        );
    }

    #[test]
    fn no_canceller_means_no_cancel_capability() {
        assert!(Deferred::new().canceller().is_none());
        assert!(Deferred::new().promise().canceller().is_none());
        assert!(Deferred::with_canceller(|_| None).canceller().is_some());
    }

    #[test]
    fn cancel_synthesizes_cancelled_error() {
        let deferred = Deferred::with_canceller(|_| None);
        let promise = deferred.promise();
        promise.canceller().unwrap().cancel(None);
        assert_eq!(
            futures::executor::block_on(promise),
            Err(Error::Cancelled(None))
        );
    }

    #[test]
    fn cancel_uses_the_canceller_error() {
        let deferred = Deferred::with_canceller(|_| Some(Error::msg("aborted by producer")));
        deferred.canceller().unwrap().cancel(Some(Error::msg("ignored")));
        assert_eq!(
            futures::executor::block_on(deferred.promise()),
            Err(Error::msg("aborted by producer"))
        );
    }

    #[test]
    fn cancel_after_settlement_does_nothing() {
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let deferred = Deferred::with_canceller(move |_| {
            counter.set(counter.get() + 1);
            None
        });
        deferred.resolve(7.into()).unwrap();
        deferred.canceller().unwrap().cancel(None);
        assert_eq!(calls.get(), 0);
        assert_eq!(futures::executor::block_on(deferred.promise()), Ok(7.into()));
    }

    #[test]
    fn cancelling_a_child_cancels_the_parent() {
        let parent = Deferred::with_canceller(|reason| reason);
        let child = parent.promise().done(Ok);
        child.canceller().unwrap().cancel(Some(Error::msg("stop")));
        assert!(parent.is_settled());
        assert_eq!(futures::executor::block_on(child), Err(Error::msg("stop")));
    }

    #[test]
    fn second_timeout_returns_the_armed_value() {
        let deferred = Deferred::new();
        assert_eq!(deferred.armed_timeout(), None);
        assert_eq!(deferred.timeout(Duration::from_millis(50)), Duration::from_millis(50));
        assert_eq!(deferred.timeout(Duration::from_millis(5)), Duration::from_millis(50));
        assert_eq!(deferred.armed_timeout(), Some(Duration::from_millis(50)));
        deferred.resolve(Value::Undefined).unwrap();
    }
}
