//! Per-request bookkeeping.
//!
//! A request goes through three representations:
//!
//! - [`RequestContext`]: built by the caller, not yet enqueued (state NONE).
//!   It has no state accessor: the queue consumes it on enqueue.
//! - `Entry`: owned by the [`ContextQueue`](crate::ContextQueue) slab while
//!   the request is outstanding. Only the queue changes its state.
//! - [`ReplyHandle`]: kept by the caller to wait for the outcome.
//!
//! The entry and the handle share a single-slot completion channel. The
//! entry is consumed when it completes, so the slot is written at most once
//! and the waiter is woken exactly once.

use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::list::{Link, Linked};
use crate::operation::{self, Operation, Protocol, ReplyKind};
use crate::parser::ParserInitializer;
use crate::reply::{Reply, ResultCode};

/// Lifecycle state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReqState {
    /// Built, not yet enqueued.
    None,
    /// Waiting to be handed to the transport.
    Pending,
    /// Handed to the transport, write not yet confirmed.
    Writing,
    /// Canceled while writing; retired on the next `mark_next_as_sent`.
    WriteCanceled,
    /// Written, waiting for the server's reply.
    AwaitingReply,
    /// Terminal.
    Complete,
}

/// Encoded request bytes, produced by the request encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedRequest {
    bytes: Bytes,
}

impl SerializedRequest {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A request that has not been enqueued yet.
///
/// Hand it to [`ContextQueue::mark_as_pending`](crate::ContextQueue::mark_as_pending)
/// to enqueue it; that returns the [`ReplyHandle`] to wait on.
pub struct RequestContext {
    id: u64,
    operation: Operation,
    protocol: Protocol,
    request: SerializedRequest,
    initializer: ParserInitializer,
    tx: Sender<Reply>,
    rx: Receiver<Reply>,
}

impl RequestContext {
    /// Create a context for `operation` with the caller-assigned `id`.
    ///
    /// The parser initializer defaults to the one matching the operation's
    /// reply kind.
    pub fn new(operation: Operation, request: SerializedRequest, id: u64, protocol: Protocol) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(1);
        Self {
            id,
            operation,
            protocol,
            request,
            initializer: operation.parser_initializer(),
            tx,
            rx,
        }
    }

    /// Replace the parser initializer.
    pub fn with_initializer(mut self, initializer: ParserInitializer) -> Self {
        self.initializer = initializer;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn reply_kind(&self) -> ReplyKind {
        self.operation.reply_kind()
    }

    pub fn request(&self) -> &SerializedRequest {
        &self.request
    }

    /// Wire bytes of a plausible reply to this request.
    pub fn fake_reply(&self) -> Bytes {
        operation::fake_reply(self.protocol, self.operation, self.id)
    }

    /// Split into the queue-owned entry and the caller's reply handle.
    ///
    /// `seq` is the queue's submission sequence number. Unlike the id it is
    /// never reused, so it tells a live request apart from a completed one
    /// that held the same slot.
    pub(crate) fn into_parts(
        self,
        slot: usize,
        seq: u64,
        cancel: Sender<Cancel>,
        default_timeout: Duration,
    ) -> (Entry, ReplyHandle) {
        let handle = ReplyHandle {
            id: self.id,
            slot,
            seq,
            kind: self.operation.reply_kind(),
            rx: self.rx,
            cancel,
            default_timeout,
        };
        let entry = Entry {
            id: self.id,
            seq,
            operation: self.operation,
            request: self.request,
            initializer: self.initializer,
            state: ReqState::None,
            cancel_result: None,
            reply_consumed: false,
            link: Link::default(),
            enqueued_at: Instant::now(),
            tx: self.tx,
        };
        (entry, handle)
    }
}

/// Cancellation request sent from a waiter to the queue owner.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cancel {
    pub(crate) slot: usize,
    pub(crate) seq: u64,
    pub(crate) result: ResultCode,
}

/// Queue-owned state of an outstanding request.
pub(crate) struct Entry {
    pub(crate) id: u64,
    /// Submission sequence number; also the request's position on the wire.
    pub(crate) seq: u64,
    pub(crate) operation: Operation,
    pub(crate) request: SerializedRequest,
    pub(crate) initializer: ParserInitializer,
    pub(crate) state: ReqState,
    /// Result to complete with once a canceled write is retired.
    pub(crate) cancel_result: Option<ResultCode>,
    /// The server answered while the canceled write was still in flight.
    pub(crate) reply_consumed: bool,
    link: Link,
    enqueued_at: Instant,
    tx: Sender<Reply>,
}

impl Entry {
    pub(crate) fn reply_kind(&self) -> ReplyKind {
        self.operation.reply_kind()
    }

    /// Type check: does `reply` have the shape this request expects?
    pub(crate) fn accepts(&self, reply: &Reply) -> bool {
        reply.kind() == self.reply_kind()
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    /// Fulfill the request and wake the waiter.
    ///
    /// Taking `self` by value means the entry has already been removed from
    /// the slab, and therefore from every list.
    pub(crate) fn complete(mut self, reply: Reply) {
        debug_assert!(self.accepts(&reply), "completing request {} with wrong reply kind", self.id);
        self.state = ReqState::Complete;
        // The waiter may have given up (handle dropped); nothing to wake then.
        let _ = self.tx.try_send(reply);
    }

    /// Fail the request with `result`.
    pub(crate) fn reply_error(self, result: ResultCode) {
        let reply = Reply::error(self.reply_kind(), result);
        self.complete(reply);
    }
}

impl Linked for Entry {
    fn link(&self) -> &Link {
        &self.link
    }

    fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }
}

impl Drop for Entry {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            assert_eq!(
                self.state,
                ReqState::Complete,
                "request {} dropped before completion",
                self.id
            );
        }
    }
}

/// Caller's side of an enqueued request.
///
/// Blocks the calling thread while waiting; the queue owner is never blocked.
pub struct ReplyHandle {
    id: u64,
    slot: usize,
    seq: u64,
    kind: ReplyKind,
    rx: Receiver<Reply>,
    cancel: Sender<Cancel>,
    default_timeout: Duration,
}

impl ReplyHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn reply_kind(&self) -> ReplyKind {
        self.kind
    }

    /// Returns the reply if the request has already completed.
    pub fn try_reply(&self) -> Option<Reply> {
        self.rx.try_recv().ok()
    }

    /// Wait using the queue's configured default timeout.
    pub fn wait(self) -> Reply {
        let timeout = self.default_timeout;
        self.wait_for_reply(timeout)
    }

    /// Wait up to `timeout` for the request to complete.
    ///
    /// On timeout the request is canceled, and this call keeps blocking until
    /// the queue owner confirms the request has left the queue. If a reply
    /// wins the race against the cancellation, that reply is returned;
    /// otherwise the result is a [`ResultCode::Timeout`] reply.
    pub fn wait_for_reply(self, timeout: Duration) -> Reply {
        match self.rx.recv_timeout(timeout) {
            Ok(reply) => reply,
            Err(RecvTimeoutError::Timeout) => self.cancel_and_wait(ResultCode::Timeout),
            Err(RecvTimeoutError::Disconnected) => Reply::error(self.kind, ResultCode::LocalError),
        }
    }

    /// Cancel the request and wait for the queue owner to confirm.
    ///
    /// Returns the reply if it arrived first, an [`ResultCode::Aborted`]
    /// reply otherwise.
    pub fn cancel(self) -> Reply {
        self.cancel_and_wait(ResultCode::Aborted)
    }

    fn cancel_and_wait(self, result: ResultCode) -> Reply {
        tracing::trace!(
            target: "memcache_mux::context",
            id = self.id,
            result = result.as_str(),
            "requesting cancellation"
        );
        // If the queue is gone it has already completed every entry.
        let _ = self.cancel.send(Cancel {
            slot: self.slot,
            seq: self.seq,
            result,
        });
        match self.rx.recv() {
            Ok(reply) => reply,
            Err(_) => Reply::error(self.kind, result),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::ReplyBody;

    fn context(op: Operation) -> RequestContext {
        RequestContext::new(op, SerializedRequest::new(&b"get k\r\n"[..]), 5, Protocol::Ascii)
    }

    #[test]
    fn new_context_accessors() {
        let ctx = context(Operation::Get);
        assert_eq!(ctx.id(), 5);
        assert_eq!(ctx.reply_kind(), ReplyKind::Get);
        assert_eq!(ctx.request().len(), 7);
        assert_eq!(&ctx.fake_reply()[..], b"END\r\n");
    }

    #[test]
    fn complete_wakes_handle_once() {
        let (cancel_tx, _cancel_rx) = crossbeam_channel::unbounded();
        let (entry, handle) = context(Operation::Set).into_parts(0, 0, cancel_tx, Duration::from_secs(1));
        assert!(entry.accepts(&Reply::stored()));
        assert!(!entry.accepts(&Reply::miss()));

        entry.complete(Reply::stored());
        let reply = handle.wait_for_reply(Duration::from_millis(100));
        assert_eq!(reply.result(), ResultCode::Stored);
    }

    #[test]
    fn reply_error_keeps_kind() {
        let (cancel_tx, _cancel_rx) = crossbeam_channel::unbounded();
        let (entry, handle) = context(Operation::Incr).into_parts(0, 0, cancel_tx, Duration::from_secs(1));
        entry.reply_error(ResultCode::ConnectError);
        let reply = handle.try_reply().unwrap();
        assert_eq!(reply.result(), ResultCode::ConnectError);
        assert_eq!(reply.body(), &ReplyBody::Arithmetic(None));
    }

    #[test]
    fn timeout_sends_cancel_request() {
        let (cancel_tx, cancel_rx) = crossbeam_channel::unbounded::<Cancel>();
        let (entry, handle) = context(Operation::Get).into_parts(3, 11, cancel_tx, Duration::from_secs(1));

        let waiter = std::thread::spawn(move || handle.wait_for_reply(Duration::from_millis(10)));

        // Play the queue owner: confirm the cancellation.
        let cancel = cancel_rx.recv().unwrap();
        assert_eq!(cancel.slot, 3);
        assert_eq!(cancel.seq, 11);
        assert_eq!(cancel.result, ResultCode::Timeout);
        entry.reply_error(cancel.result);

        let reply = waiter.join().unwrap();
        assert_eq!(reply.result(), ResultCode::Timeout);
    }

    #[test]
    #[should_panic(expected = "dropped before completion")]
    fn dropping_incomplete_entry_panics() {
        let (cancel_tx, _cancel_rx) = crossbeam_channel::unbounded();
        let (entry, _handle) = context(Operation::Get).into_parts(0, 0, cancel_tx, Duration::from_secs(1));
        drop(entry);
    }
}
