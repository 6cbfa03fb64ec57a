//! Error taxonomy for the reconciliation core.
//!
//! Every error that can surface out of a reconcile tick is tagged with one
//! of the variants below (see spec §7). The taxonomy drives two decisions:
//! whether the error is retriable (used by `error_policy` in the
//! `kube-runtime`-driven controllers and by the bespoke work queue), and
//! whether it should be written into object status for the user to see.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Retryable driver/transport error (cancelled, deadline-exceeded,
    /// unavailable, resource-exhausted, aborted, or a pre-RPC transport
    /// failure). Requeue with the rate limiter; never mutate status.
    #[error("transient driver error: {0}")]
    TransientDriver(String),

    /// Non-retryable driver error. Recorded into object status and
    /// event-logged; requeued at the max interval.
    #[error("driver error: {0}")]
    FinalDriver(String),

    /// Optimistic-concurrency loss on a write. Requeue immediately, no
    /// backoff growth.
    #[error("object conflict: {0}")]
    ObjectConflict(String),

    /// The object was not found. Callers decide whether this means
    /// "nothing to do" or "pending visibility".
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// Invalid user input. Terminal until the user fixes it; only
    /// reconsidered on resync.
    #[error("validation error: {0}")]
    Validation(String),

    /// Programmer error / invariant violation. Logged, event-recorded,
    /// requeued with backoff.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("driver transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// Whether a requeue should be attempted at all (vs. terminal until
    /// the resync sweep or user intervention).
    pub fn is_retriable(&self) -> bool {
        !matches!(self, Error::Validation(_))
    }

    /// Whether this error should grow the backoff window (transient) or
    /// requeue at a fixed, immediate/maximum interval.
    pub fn requeue_after(&self, policy: &crate::rate_limiter::RetryPolicy, attempt: u32) -> Option<std::time::Duration> {
        match self {
            Error::Validation(_) => None,
            Error::ObjectConflict(_) => Some(std::time::Duration::from_millis(50)),
            Error::FinalDriver(_) => Some(policy.max),
            _ => Some(policy.backoff_for(attempt)),
        }
    }

    pub fn from_kube_get(e: kube::Error, name: &str) -> Error {
        match &e {
            kube::Error::Api(ae) if ae.code == 404 => {
                Error::ObjectNotFound(format!("{name}: {ae}"))
            }
            kube::Error::Api(ae) if ae.code == 409 => {
                Error::ObjectConflict(format!("{name}: {ae}"))
            }
            _ => Error::Kube(e),
        }
    }
}
