use crate::Value;

/// Every way a promise can be rejected, plus the misuse faults of the
/// deferred itself.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// A deferred was resolved or rejected after it had already settled.
    #[error("This deferred has already been resolved")]
    AlreadySettled,
    /// An armed timeout elapsed before the deferred settled.
    #[error("timeout")]
    Timeout,
    /// A cancellable deferred was cancelled and its canceller supplied no
    /// error of its own.
    #[error("cancelled{}", .0.as_ref().map(|reason| format!(": {reason}")).unwrap_or_default())]
    Cancelled(Option<Box<Error>>),
    /// A property or method was used on a value that cannot support it.
    #[error("type error: {0}")]
    Type(String),
    #[error("{0}")]
    Message(String),
    /// An arbitrary value used as a rejection reason.
    #[error("{0}")]
    Thrown(Value),
    /// `block_on` ran out of timers while the promise was still pending.
    #[error("promise is still pending and the event loop has nothing left to run")]
    Stalled,
}

impl Error {
    pub fn msg(message: impl Into<String>) -> Self {
        Error::Message(message.into())
    }

    pub(crate) fn cancelled(reason: Option<Error>) -> Self {
        Error::Cancelled(reason.map(Box::new))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}
