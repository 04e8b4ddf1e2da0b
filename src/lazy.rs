//! Lazily produced sequences whose items may arrive over time.
//!
//! Everything is built on one primitive, `some`: feed items to a visitor
//! until it returns `Ok(true)` or the source runs dry, and fulfil with
//! whether it was stopped.
use std::cell::RefCell;
use std::rc::Rc;

use crate::{rejected, resolved, Error, Promise, Thenable, Value};

pub type Visitor = Rc<dyn Fn(Value) -> Result<bool, Error>>;

type SomeFn = dyn Fn(Visitor) -> Promise;

#[derive(Clone)]
pub struct LazyArray {
    some: Rc<SomeFn>,
}

impl LazyArray {
    /// A sequence driven by `some`. The returned promise must fulfil with a
    /// truthy value if the visitor stopped the iteration.
    pub fn new<F>(some: F) -> Self
    where
        F: Fn(Visitor) -> Promise + 'static,
    {
        Self { some: Rc::new(some) }
    }

    pub fn from_values(values: Vec<Value>) -> Self {
        let values = Rc::new(values);
        Self::new(move |visitor| {
            for value in values.iter() {
                match visitor(value.clone()) {
                    Ok(true) => return resolved(true),
                    Ok(false) => {}
                    Err(error) => return rejected(error),
                }
            }
            resolved(false)
        })
    }

    pub fn some<F>(&self, visitor: F) -> Promise
    where
        F: Fn(Value) -> Result<bool, Error> + 'static,
    {
        (self.some)(Rc::new(visitor))
    }

    pub fn for_each<F>(&self, f: F) -> Promise
    where
        F: Fn(Value) -> Result<(), Error> + 'static,
    {
        self.some(move |value| f(value).map(|()| false))
            .done(|_| Ok(Value::Undefined))
    }

    pub fn filter<F>(&self, predicate: F) -> LazyArray
    where
        F: Fn(&Value) -> Result<bool, Error> + 'static,
    {
        let source = self.clone();
        let predicate = Rc::new(predicate);
        LazyArray::new(move |visitor| {
            let predicate = predicate.clone();
            source.some(move |value| {
                if predicate(&value)? {
                    visitor(value)
                } else {
                    Ok(false)
                }
            })
        })
    }

    pub fn map<F>(&self, f: F) -> LazyArray
    where
        F: Fn(Value) -> Result<Value, Error> + 'static,
    {
        let source = self.clone();
        let f = Rc::new(f);
        LazyArray::new(move |visitor| {
            let f = f.clone();
            source.some(move |value| visitor(f(value)?))
        })
    }

    /// This sequence followed by `other`.
    pub fn concat(&self, other: &LazyArray) -> LazyArray {
        let head = self.clone();
        let tail = other.clone();
        LazyArray::new(move |visitor| {
            let tail = tail.clone();
            let rest = visitor.clone();
            (head.some)(visitor).done(move |stopped| {
                if stopped.is_truthy() {
                    Ok(stopped)
                } else {
                    Ok((tail.some)(rest).into())
                }
            })
        })
    }

    /// Collects every item into a `Value::List`.
    pub fn to_real_array(&self) -> Promise {
        let collected = Rc::new(RefCell::new(Vec::new()));
        let sink = collected.clone();
        self.for_each(move |value| {
            sink.borrow_mut().push(value);
            Ok(())
        })
        .done(move |_| Ok(Value::List(collected.take())))
    }
}

impl From<Vec<Value>> for LazyArray {
    fn from(values: Vec<Value>) -> Self {
        LazyArray::from_values(values)
    }
}
