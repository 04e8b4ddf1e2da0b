//! Deferreds and promises for single-threaded, callback-driven code.
//!
//! A [`Deferred`] is the producer side: it settles its [`Promise`] exactly
//! once, reports progress while pending, and may be cancelled or timed out.
//! Consumers chain with [`Thenable::then`] (or simply `.await` the promise),
//! and the combinators ([`all`], [`first`], [`seq`], ...) compose several
//! values into one. Rejections that nobody observes are reported through
//! [`unhandled`] after a grace period.
//!
//! Timers (timeouts, [`delay`], the unhandled-rejection check) run on the
//! per-thread loop in [`runtime`].
//!
//! ```
//! use promised::{defer, runtime, Error};
//! use std::time::Duration;
//!
//! let deferred = defer();
//! deferred.timeout(Duration::from_millis(1));
//! assert_eq!(runtime::block_on(&deferred.promise()), Err(Error::Timeout));
//! ```
mod combinators;
mod config;
mod deferred;
mod error;
mod lazy;
mod promise;
pub mod runtime;
pub mod unhandled;
mod value;

pub use combinators::{
    all, all_keys, call, convert_async, delay, execute, first, get, put, seq, when, when_call,
    NodeCallback, NodeFunction, Step,
};
pub use config::{Config, GRACE_PERIOD_ENV};
pub use deferred::{defer, defer_cancellable, Cancel, Deferred};
pub use error::Error;
pub use lazy::{LazyArray, Visitor};
pub use promise::{rejected, resolved, OnFulfilled, OnProgress, OnRejected, Promise, Thenable};
pub use value::{Function, Object, Value};
