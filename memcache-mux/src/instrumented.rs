//! Reply-delivery notifications.
//!
//! A queue built with [`QueueBuilder::on_reply`](crate::QueueBuilder::on_reply)
//! invokes the callback each time a server reply completes a request. The
//! callback is fire-and-forget: it cannot fail the delivery.

use crate::operation::Operation;
use crate::reply::ResultCode;

/// Metadata for a delivered reply, passed to the `on_reply` callback.
#[derive(Debug, Clone)]
pub struct ReplyEvent {
    /// Request id.
    pub id: u64,
    /// The operation that was answered.
    pub operation: Operation,
    /// Result code carried by the reply.
    pub result: ResultCode,
    /// Nanoseconds from `mark_as_pending` to reply delivery.
    pub latency_ns: u64,
}

impl ReplyEvent {
    /// For GET: `Some(true)` = hit, `Some(false)` = miss. `None` for others.
    pub fn hit(&self) -> Option<bool> {
        match self.operation {
            Operation::Get | Operation::Gets => Some(self.result == ResultCode::Found),
            _ => None,
        }
    }
}

pub(crate) type ReplyCallback = Box<dyn Fn(&ReplyEvent) + Send>;
