//! Reporting of rejections that nobody observed.
//!
//! A rejected deferred arms a check that fires after the grace period. If no
//! listener took a rejected-callback for that rejection by then, it is handed
//! to every subscriber here, once.
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use crate::runtime::Runtime;
use crate::Error;

type Subscriber = Rc<dyn Fn(&Error)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct UnhandledRejections {
    grace_period: Cell<Duration>,
    subscribers: RefCell<Vec<(SubscriptionId, Subscriber)>>,
    next_id: Cell<u64>,
}

impl UnhandledRejections {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            grace_period: Cell::new(grace_period),
            subscribers: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period.get()
    }

    /// Applies to rejections from now on; checks already armed keep the
    /// period they were armed with.
    pub fn set_grace_period(&self, grace_period: Duration) {
        self.grace_period.set(grace_period);
    }

    pub fn subscribe<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&Error) + 'static,
    {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.subscribers.borrow_mut().push((id, Rc::new(subscriber)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.borrow_mut();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// Delivers `error` to the subscribers present when the call starts.
    /// Returns how many were notified.
    pub fn emit(&self, error: &Error) -> usize {
        let snapshot: Vec<Subscriber> = self
            .subscribers
            .borrow()
            .iter()
            .map(|(_, subscriber)| subscriber.clone())
            .collect();
        for subscriber in &snapshot {
            subscriber(error);
        }
        snapshot.len()
    }
}

pub fn subscribe<F>(subscriber: F) -> SubscriptionId
where
    F: Fn(&Error) + 'static,
{
    Runtime::with(|rt| rt.unhandled()).subscribe(subscriber)
}

pub fn unsubscribe(id: SubscriptionId) -> bool {
    Runtime::with(|rt| rt.unhandled()).unsubscribe(id)
}

pub fn grace_period() -> Duration {
    Runtime::with(|rt| rt.unhandled()).grace_period()
}

pub fn set_grace_period(grace_period: Duration) {
    Runtime::with(|rt| rt.unhandled()).set_grace_period(grace_period)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_reaches_every_subscriber_until_unsubscribed() {
        let registry = UnhandledRejections::new(Duration::from_millis(100));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let first = {
            let seen = seen.clone();
            registry.subscribe(move |err| seen.borrow_mut().push(format!("1:{err}")))
        };
        {
            let seen = seen.clone();
            registry.subscribe(move |err| seen.borrow_mut().push(format!("2:{err}")));
        }
        assert_eq!(registry.emit(&Error::Timeout), 2);
        assert!(registry.unsubscribe(first));
        assert!(!registry.unsubscribe(first));
        assert_eq!(registry.emit(&Error::msg("later")), 1);
        assert_eq!(*seen.borrow(), vec!["1:timeout", "2:timeout", "2:later"]);
    }

    #[test]
    fn subscriber_may_subscribe_during_emit() {
        let registry = Rc::new(UnhandledRejections::new(Duration::ZERO));
        let nested = registry.clone();
        registry.subscribe(move |_| {
            nested.subscribe(|_| {});
        });
        assert_eq!(registry.emit(&Error::Timeout), 1);
        assert_eq!(registry.subscriber_count(), 2);
    }

    #[test]
    fn default_grace_period_is_100ms() {
        assert_eq!(grace_period(), Duration::from_millis(100));
    }
}
