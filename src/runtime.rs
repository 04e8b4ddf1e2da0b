//! The single-threaded loop that drives timers.
//!
//! Each thread gets one [`Runtime`], created on first use. It owns the timer
//! queue and the unhandled-rejection registry. Nothing here blocks except
//! [`run`] and [`block_on`], which sleep until the next timer is due.
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::task::noop_waker_ref;

use crate::unhandled::UnhandledRejections;
use crate::{Config, Error, Promise, Value};

type Task = Box<dyn FnOnce()>;
type TimerKey = (Instant, u64);

thread_local! {
    static RUNTIME: Runtime = Runtime::new(Config::default());
}

pub struct Runtime {
    timers: RefCell<BTreeMap<TimerKey, Task>>,
    next_seq: Cell<u64>,
    unhandled: Rc<UnhandledRejections>,
    log_unhandled: Cell<bool>,
}

impl Runtime {
    fn new(config: Config) -> Self {
        Self {
            timers: RefCell::new(BTreeMap::new()),
            next_seq: Cell::new(0),
            unhandled: Rc::new(UnhandledRejections::new(config.grace_period())),
            log_unhandled: Cell::new(config.log_unhandled),
        }
    }

    /// Runs `f` against this thread's runtime.
    pub fn with<R>(f: impl FnOnce(&Runtime) -> R) -> R {
        RUNTIME.with(f)
    }

    pub fn unhandled(&self) -> Rc<UnhandledRejections> {
        self.unhandled.clone()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    /// A delay too large to express as an `Instant` never fires, so it is
    /// not queued at all.
    fn schedule(&self, delay: Duration, task: Task) -> TimerKey {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        let now = Instant::now();
        let Some(deadline) = now.checked_add(delay) else {
            tracing::debug!(?delay, "timer deadline out of range, never firing");
            return (now, seq);
        };
        let key = (deadline, seq);
        self.timers.borrow_mut().insert(key, task);
        key
    }

    fn next_due(&self, now: Instant) -> Option<Task> {
        let mut timers = self.timers.borrow_mut();
        let (&key, _) = timers.first_key_value()?;
        if key.0 > now {
            return None;
        }
        timers.remove(&key)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers.borrow().first_key_value().map(|(key, _)| key.0)
    }
}

/// Handle on a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle(TimerKey);

impl TimerHandle {
    /// Unschedules the timer. Returns `false` if it already fired or was
    /// cleared.
    pub fn clear(&self) -> bool {
        Runtime::with(|rt| rt.timers.borrow_mut().remove(&self.0).is_some())
    }
}

/// Schedules `task` to run once, `delay` from now, on this thread's loop.
pub fn set_timeout<F>(delay: Duration, task: F) -> TimerHandle
where
    F: FnOnce() + 'static,
{
    TimerHandle(Runtime::with(|rt| rt.schedule(delay, Box::new(task))))
}

/// Runs every timer that is due now, each as its own turn. Returns how many
/// ran.
pub fn turn() -> usize {
    let mut ran = 0;
    while let Some(task) = Runtime::with(|rt| rt.next_due(Instant::now())) {
        task();
        ran += 1;
    }
    ran
}

/// Sleeps until the next timer is due and runs everything due by then.
/// Returns `false` when no timers are left.
fn park() -> bool {
    let Some(deadline) = Runtime::with(Runtime::next_deadline) else {
        return false;
    };
    let now = Instant::now();
    if deadline > now {
        std::thread::sleep(deadline - now);
    }
    turn();
    true
}

/// Runs the loop until no timers remain.
pub fn run() {
    while park() {}
}

/// Drives the loop until `promise` settles.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use promised::{delay, runtime, Value};
///
/// let waited = delay(Duration::from_millis(5));
/// assert_eq!(runtime::block_on(&waited), Ok(Value::Undefined));
/// ```
pub fn block_on(promise: &Promise) -> Result<Value, Error> {
    let mut promise = promise.clone();
    let mut cx = Context::from_waker(noop_waker_ref());
    loop {
        if let Poll::Ready(result) = Pin::new(&mut promise).poll(&mut cx) {
            return result;
        }
        if !park() {
            tracing::debug!("block_on stalled with no timers left");
            return Err(Error::Stalled);
        }
    }
}

/// Applies `config` to this thread's runtime.
pub fn configure(config: &Config) {
    Runtime::with(|rt| {
        rt.unhandled.set_grace_period(config.grace_period());
        rt.log_unhandled.set(config.log_unhandled);
    })
}

pub(crate) fn grace_period() -> Duration {
    Runtime::with(|rt| rt.unhandled.grace_period())
}

pub(crate) fn report_unhandled(error: &Error) {
    let (unhandled, log) = Runtime::with(|rt| (rt.unhandled(), rt.log_unhandled.get()));
    let delivered = unhandled.emit(error);
    if delivered == 0 && log {
        tracing::warn!(%error, "unhandled rejection");
    }
}
