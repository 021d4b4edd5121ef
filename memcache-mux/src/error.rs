use thiserror::Error;

use crate::context::ReqState;
use crate::operation::ReplyKind;

/// Errors returned by the context queue.
///
/// Per-request outcomes (timeouts, connection failures, server results) are
/// not errors: they are delivered to the waiter as a [`Reply`](crate::Reply)
/// carrying a [`ResultCode`](crate::ResultCode).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A decoded reply does not have the shape the matched request expects.
    /// The stream is most likely desynchronized; the request is left untouched.
    #[error("reply type mismatch for request {id}: expected {expected:?}, got {actual:?}")]
    ReplyTypeMismatch {
        id: u64,
        expected: ReplyKind,
        actual: ReplyKind,
    },
    /// A reply arrived for a request whose write has not been confirmed yet.
    #[error("reply for request {id} arrived while in state {state:?}")]
    ReplyBeforeSent { id: u64, state: ReqState },
    /// Configuration value out of range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}
