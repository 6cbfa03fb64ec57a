//! Transport/status code classification (spec §4.1 "Error classification").
//!
//! `retryable`: {cancelled, deadline-exceeded, unavailable,
//! resource-exhausted, aborted, or a non-RPC error that occurred before
//! the call}. `final`: all other code-bearing status errors. Callers
//! must not delete or rewrite controller state on a retryable error.

use tonic::{Code, Status};

use crate::error::Error;

pub fn classify_status(status: Status) -> Error {
    match status.code() {
        Code::Cancelled
        | Code::DeadlineExceeded
        | Code::Unavailable
        | Code::ResourceExhausted
        | Code::Aborted => Error::TransientDriver(status.message().to_string()),
        _ => Error::FinalDriver(status.message().to_string()),
    }
}

/// A failure before the RPC was even sent (connect failure, socket
/// gone) is always retryable.
pub fn classify_transport(err: tonic::transport::Error) -> Error {
    Error::TransientDriver(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_codes() {
        for code in [
            Code::Cancelled,
            Code::DeadlineExceeded,
            Code::Unavailable,
            Code::ResourceExhausted,
            Code::Aborted,
        ] {
            let err = classify_status(Status::new(code, "x"));
            assert!(matches!(err, Error::TransientDriver(_)), "{code:?} should be retryable");
        }
    }

    #[test]
    fn final_codes() {
        for code in [Code::NotFound, Code::InvalidArgument, Code::Internal, Code::PermissionDenied] {
            let err = classify_status(Status::new(code, "x"));
            assert!(matches!(err, Error::FinalDriver(_)), "{code:?} should be final");
        }
    }
}
