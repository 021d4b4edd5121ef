//! The per-connection context queue.
//!
//! [`ContextQueue`] is the only thing that changes a request's state. It owns
//! every outstanding request in a slab and threads them through three FIFO
//! lists:
//!
//! ```text
//! mark_as_pending      mark_next_as_sending      mark_next_as_sent        reply
//!  NONE ──────────► PENDING ──────────────► WRITING ─────────────► AWAITING_REPLY ──► COMPLETE
//!                      │                       │ cancel                  │
//!                      │ cancel                ▼                         │ cancel
//!                      │                 WRITE_CANCELED ── sent ──┐      │
//!                      └──────────────────────────────────────────┴──────┴──► COMPLETE
//! ```
//!
//! All methods run on the connection's I/O context and never block. Waiters
//! on other threads only reach the queue through the cancellation channel,
//! drained by [`ContextQueue::process_cancellations`].

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use slab::Slab;

use crate::config::QueueConfig;
use crate::context::{Cancel, Entry, ReplyHandle, ReqState, RequestContext};
use crate::error::Error;
use crate::instrumented::{ReplyCallback, ReplyEvent};
use crate::list::List;
use crate::metrics;
use crate::operation::{Operation, Protocol};
use crate::parser::{ParserInitializer, RetainedInitializers};
use crate::reply::{Reply, ResultCode};

const TARGET: &str = "memcache_mux::queue";

/// A request handed to the transport for writing.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub id: u64,
    pub operation: Operation,
    /// Encoded request bytes. Owned, so the transport may keep them for as
    /// long as the write takes, independent of the request's fate.
    pub payload: Bytes,
}

/// What [`ContextQueue::mark_next_as_sent`] did with the written request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sent {
    /// Moved to the awaiting-reply list.
    AwaitingReply { id: u64 },
    /// The request was canceled during the write and has now been retired.
    Canceled { id: u64 },
}

impl Sent {
    pub fn id(self) -> u64 {
        match self {
            Sent::AwaitingReply { id } | Sent::Canceled { id } => id,
        }
    }

    /// State of the request after the transition.
    pub fn state(self) -> ReqState {
        match self {
            Sent::AwaitingReply { .. } => ReqState::AwaitingReply,
            Sent::Canceled { .. } => ReqState::Complete,
        }
    }
}

/// Outcome of [`ContextQueue::reply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The reply completed request `id`.
    Delivered { id: u64 },
    /// The reply answers request `id`, which already left the queue
    /// (timed out or canceled). It was dropped.
    Discarded { id: u64 },
    /// No outstanding request matches. Nothing changed.
    Unmatched,
}

/// Builder for a [`ContextQueue`] with a reply-delivery callback.
pub struct QueueBuilder {
    config: QueueConfig,
    on_reply: Option<ReplyCallback>,
}

impl QueueBuilder {
    /// Register a callback invoked each time a reply completes a request.
    pub fn on_reply<F: Fn(&ReplyEvent) + Send + 'static>(mut self, f: F) -> Self {
        self.on_reply = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Result<ContextQueue, Error> {
        self.config.validate()?;
        let (cancel_tx, cancel_rx) = crossbeam_channel::unbounded();
        let retained = if self.config.protocol.is_out_of_order() {
            RetainedInitializers::keyed(self.config.capacity)
        } else {
            RetainedInitializers::in_order()
        };
        Ok(ContextQueue {
            protocol: self.config.protocol,
            default_timeout: self.config.default_timeout,
            entries: Slab::with_capacity(self.config.capacity),
            pending: List::default(),
            writing: List::default(),
            awaiting: List::default(),
            index: HashMap::new(),
            retained,
            next_seq: 0,
            cancel_tx,
            cancel_rx,
            on_reply: self.on_reply,
        })
    }
}

/// Tracks every outstanding request on one connection.
pub struct ContextQueue {
    protocol: Protocol,
    default_timeout: Duration,
    entries: Slab<Entry>,
    /// Enqueued, not yet handed to the transport.
    pending: List,
    /// Handed to the transport, write not confirmed. Includes WRITE_CANCELED.
    writing: List,
    /// Written, waiting for a reply.
    awaiting: List,
    /// Request id to slab key. Maintained for the out-of-order protocol only.
    index: HashMap<u64, usize>,
    retained: RetainedInitializers,
    /// Sequence number for the next enqueued request.
    next_seq: u64,
    cancel_tx: Sender<Cancel>,
    cancel_rx: Receiver<Cancel>,
    on_reply: Option<ReplyCallback>,
}

impl ContextQueue {
    pub fn new(config: QueueConfig) -> Result<Self, Error> {
        Self::builder(config).build()
    }

    pub fn builder(config: QueueConfig) -> QueueBuilder {
        QueueBuilder {
            config,
            on_reply: None,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[inline]
    fn out_of_order(&self) -> bool {
        self.protocol.is_out_of_order()
    }

    // -- Observers --------------------------------------------------------------

    /// Requests not yet handed to the transport.
    pub fn pending_request_count(&self) -> usize {
        self.pending.len()
    }

    /// Requests handed to the transport and not yet complete.
    pub fn inflight_request_count(&self) -> usize {
        self.writing.len() + self.awaiting.len()
    }

    /// Id of the oldest pending request.
    pub fn first_id(&self) -> Option<u64> {
        self.pending.front().map(|slot| self.entries[slot].id)
    }

    /// Number of retained initializers for requests that left early.
    pub fn stored_initializer_count(&self) -> usize {
        self.retained.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.writing.is_empty() && self.awaiting.is_empty()
    }

    // -- State transitions ----------------------------------------------------

    /// Enqueue a request: NONE → PENDING.
    ///
    /// # Panics
    /// Panics if a request with the same id is outstanding on an
    /// out-of-order connection.
    pub fn mark_as_pending(&mut self, ctx: RequestContext) -> ReplyHandle {
        debug_assert_eq!(
            ctx.protocol(),
            self.protocol,
            "request {} built for another protocol",
            ctx.id()
        );
        let id = ctx.id();
        if self.out_of_order() {
            assert!(
                !self.index.contains_key(&id),
                "request id {id} is already outstanding"
            );
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let vacant = self.entries.vacant_entry();
        let slot = vacant.key();
        let (mut entry, handle) =
            ctx.into_parts(slot, seq, self.cancel_tx.clone(), self.default_timeout);
        entry.state = ReqState::Pending;
        vacant.insert(entry);
        self.pending.push_back(&mut self.entries, slot);
        if self.out_of_order() {
            self.index.insert(id, slot);
        }

        metrics::REQUESTS_ENQUEUED.increment();
        metrics::REQUESTS_OUTSTANDING.increment();
        tracing::trace!(target: TARGET, id, seq, pending = self.pending.len(), "request pending");
        handle
    }

    /// Hand the oldest pending request to the transport: PENDING → WRITING.
    ///
    /// Returns `None` if nothing is pending.
    pub fn mark_next_as_sending(&mut self) -> Option<Outgoing> {
        let slot = self.pending.pop_front(&mut self.entries)?;
        let entry = &mut self.entries[slot];
        debug_assert_eq!(entry.state, ReqState::Pending);
        entry.state = ReqState::Writing;
        let outgoing = Outgoing {
            id: entry.id,
            operation: entry.operation,
            payload: entry.request.bytes().clone(),
        };
        self.writing.push_back(&mut self.entries, slot);

        tracing::trace!(target: TARGET, id = outgoing.id, "request writing");
        Some(outgoing)
    }

    /// The transport finished writing the oldest writing request.
    ///
    /// WRITING → AWAITING_REPLY, or, if the request was canceled during the
    /// write, retire it: its parser initializer is retained because the
    /// server will still answer it.
    ///
    /// # Panics
    /// Panics if no request is being written.
    pub fn mark_next_as_sent(&mut self) -> Sent {
        let Some(slot) = self.writing.pop_front(&mut self.entries) else {
            panic!("mark_next_as_sent called with no request being written");
        };

        let state = self.entries[slot].state;
        match state {
            ReqState::Writing => {
                let entry = &mut self.entries[slot];
                entry.state = ReqState::AwaitingReply;
                let id = entry.id;
                self.awaiting.push_back(&mut self.entries, slot);
                tracing::trace!(target: TARGET, id, "request awaiting reply");
                Sent::AwaitingReply { id }
            }
            ReqState::WriteCanceled => {
                let entry = self.entries.remove(slot);
                let id = entry.id;
                self.unindex(id);
                if !entry.reply_consumed {
                    self.retain(&entry);
                }
                let result = entry.cancel_result.unwrap_or(ResultCode::Timeout);
                metrics::REQUESTS_CANCELED.increment();
                tracing::debug!(
                    target: TARGET,
                    id,
                    result = result.as_str(),
                    "canceled request retired after write"
                );
                retire_with_error(entry, result);
                Sent::Canceled { id }
            }
            state => panic!("request in writing list with state {state:?}"),
        }
    }

    // -- Reply matching -------------------------------------------------------

    /// Deliver a decoded reply.
    ///
    /// Out-of-order: matched by `id`. In-order: `id` is ignored and the reply
    /// answers the oldest request written, live or retired. A reply owed to
    /// a request that timed out after being written is discarded in its turn.
    ///
    /// Unknown or already-resolved ids are a no-op. A reply whose shape does
    /// not match the request leaves the queue untouched and returns
    /// [`Error::ReplyTypeMismatch`]; the stream should be treated as corrupt.
    pub fn reply(&mut self, id: u64, reply: Reply) -> Result<Delivery, Error> {
        let slot = if self.out_of_order() {
            match self.index.get(&id) {
                Some(&slot) => slot,
                None => return Ok(self.orphan_reply(id)),
            }
        } else {
            let head = self.stream_head();
            // Retired requests still own their place on the wire; a reply
            // goes to them only if they were written before the live head.
            let orphan_first = match (self.retained.front(), head) {
                (Some((seq, _)), Some(slot)) => seq < self.entries[slot].seq,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if orphan_first {
                if let Some((orphan, _)) = self.retained.pop_front() {
                    return Ok(self.discard(orphan));
                }
            }
            match head {
                Some(slot) => slot,
                None => return Ok(self.unmatched(id)),
            }
        };

        let entry = &mut self.entries[slot];
        match entry.state {
            ReqState::AwaitingReply => {}
            ReqState::WriteCanceled => {
                // Answered before the write was confirmed; nothing left to
                // retain once the write completes.
                entry.reply_consumed = true;
                let id = entry.id;
                return Ok(self.discard(id));
            }
            state => {
                return Err(Error::ReplyBeforeSent {
                    id: entry.id,
                    state,
                });
            }
        }

        if !entry.accepts(&reply) {
            metrics::REPLY_TYPE_MISMATCH.increment();
            tracing::warn!(
                target: TARGET,
                id = entry.id,
                expected = ?entry.reply_kind(),
                actual = ?reply.kind(),
                "reply type mismatch"
            );
            return Err(Error::ReplyTypeMismatch {
                id: entry.id,
                expected: entry.reply_kind(),
                actual: reply.kind(),
            });
        }

        self.awaiting.remove(&mut self.entries, slot);
        let entry = self.entries.remove(slot);
        let id = entry.id;
        self.unindex(id);
        self.notify_reply(&entry, &reply);
        metrics::REPLIES_DELIVERED.increment();
        retire(entry, reply);
        Ok(Delivery::Delivered { id })
    }

    fn orphan_reply(&mut self, id: u64) -> Delivery {
        if self.retained.take(id).is_some() {
            self.discard(id)
        } else {
            self.unmatched(id)
        }
    }

    fn discard(&self, id: u64) -> Delivery {
        metrics::REPLIES_DISCARDED.increment();
        tracing::debug!(target: TARGET, id, "discarding reply for retired request");
        Delivery::Discarded { id }
    }

    fn unmatched(&self, id: u64) -> Delivery {
        metrics::REPLIES_UNMATCHED.increment();
        tracing::debug!(target: TARGET, id, "reply matches no outstanding request");
        Delivery::Unmatched
    }

    fn notify_reply(&self, entry: &Entry, reply: &Reply) {
        let latency_ns = entry.elapsed().as_nanos() as u64;
        tracing::trace!(
            target: TARGET,
            id = entry.id,
            op = entry.operation.name(),
            result = reply.result().as_str(),
            latency_ns,
            "reply delivered"
        );
        if let Some(ref cb) = self.on_reply {
            cb(&ReplyEvent {
                id: entry.id,
                operation: entry.operation,
                result: reply.result(),
                latency_ns,
            });
        }
    }

    /// Parser initializer for the next reply.
    ///
    /// Out-of-order: the initializer of the outstanding or recently retired
    /// request `id`. In-order: `id` is ignored; the initializer belongs to
    /// whichever went out first, the oldest retired request still owed a
    /// reply or the oldest live request.
    /// `None` means no reconfiguration is needed or the request is unknown.
    pub fn parser_initializer(&self, id: u64) -> Option<ParserInitializer> {
        if self.out_of_order() {
            self.index
                .get(&id)
                .map(|&slot| self.entries[slot].initializer)
                .or_else(|| self.retained.get(id))
        } else {
            let head = self.stream_head().map(|slot| &self.entries[slot]);
            match (self.retained.front(), head) {
                (Some((seq, init)), Some(entry)) if seq < entry.seq => Some(init),
                (_, Some(entry)) => Some(entry.initializer),
                (retained, None) => retained.map(|(_, init)| init),
            }
        }
    }

    /// Oldest live request already handed to the transport whose reply is
    /// still owed. With the in-order protocol the next reply belongs to it
    /// unless an older retired request is still owed one. A reply can
    /// overtake the write confirmation, so the writing list is the fallback;
    /// canceled writes that were already answered are skipped there.
    fn stream_head(&self) -> Option<usize> {
        self.awaiting.front().or_else(|| {
            self.writing
                .iter(&self.entries)
                .find(|&slot| !self.entries[slot].reply_consumed)
        })
    }

    /// Keep a retired request's initializer for its late reply.
    fn retain(&mut self, entry: &Entry) {
        if let Some(evicted) = self.retained.push(entry.seq, entry.id, entry.initializer) {
            metrics::INITIALIZERS_EVICTED.increment();
            tracing::debug!(
                target: TARGET,
                id = evicted,
                retained = self.retained.len(),
                "evicted retained initializer"
            );
        }
    }

    /// Drop all retained initializers. Call when the connection closes: the
    /// replies they were kept for can no longer arrive.
    pub fn clear_stored_initializers(&mut self) {
        self.retained.clear();
    }

    // -- Failure --------------------------------------------------------------

    /// Fail every pending request with `result`.
    pub fn fail_all_pending(&mut self, result: ResultCode) {
        let mut failed = 0u64;
        while let Some(slot) = self.pending.pop_front(&mut self.entries) {
            let entry = self.entries.remove(slot);
            self.unindex(entry.id);
            retire_with_error(entry, result);
            failed += 1;
        }
        self.record_failed("pending", failed, result);
    }

    /// Fail every request already handed to the transport with `result`.
    ///
    /// Requests canceled during their write complete with their cancellation
    /// result instead, which is what their waiter asked for.
    pub fn fail_all_sent(&mut self, result: ResultCode) {
        let mut failed = 0u64;
        while let Some(slot) = self.writing.pop_front(&mut self.entries) {
            let entry = self.entries.remove(slot);
            self.unindex(entry.id);
            let result = match entry.state {
                ReqState::WriteCanceled => entry.cancel_result.unwrap_or(result),
                _ => result,
            };
            retire_with_error(entry, result);
            failed += 1;
        }
        while let Some(slot) = self.awaiting.pop_front(&mut self.entries) {
            let entry = self.entries.remove(slot);
            self.unindex(entry.id);
            retire_with_error(entry, result);
            failed += 1;
        }
        self.record_failed("sent", failed, result);
    }

    fn record_failed(&self, list: &'static str, failed: u64, result: ResultCode) {
        if failed == 0 {
            return;
        }
        metrics::REQUESTS_FAILED.add(failed);
        tracing::debug!(
            target: TARGET,
            list,
            failed,
            result = result.as_str(),
            "failed outstanding requests"
        );
    }

    /// The connection closed: fail everything and forget retained
    /// initializers. Afterwards the queue is empty.
    pub fn on_channel_closed(&mut self, result: ResultCode) {
        self.fail_all_sent(result);
        self.fail_all_pending(result);
        self.clear_stored_initializers();
        debug_assert!(self.entries.is_empty());
    }

    // -- Cancellation ---------------------------------------------------------

    /// Apply cancellation requests sent by timed-out or canceling waiters.
    ///
    /// Returns the number of requests affected. Call this from the I/O loop
    /// whenever requests may be waiting with a deadline.
    pub fn process_cancellations(&mut self) -> usize {
        let mut canceled = 0;
        while let Ok(cancel) = self.cancel_rx.try_recv() {
            if self.cancel(cancel) {
                canceled += 1;
            }
        }
        canceled
    }

    /// Take a request out of the queue on its waiter's behalf.
    ///
    /// PENDING and AWAITING_REPLY requests complete immediately. A WRITING
    /// request is only marked; the transport may still reference its bytes,
    /// so it completes on the next `mark_next_as_sent`. Stale requests
    /// (already complete, slot reused) are ignored. Caller ids may repeat,
    /// so staleness is judged by sequence number.
    fn cancel(&mut self, cancel: Cancel) -> bool {
        let Cancel { slot, seq, result } = cancel;
        let (id, state) = match self.entries.get(slot) {
            Some(entry) if entry.seq == seq => (entry.id, entry.state),
            _ => return false,
        };

        match state {
            ReqState::Pending => {
                self.pending.remove(&mut self.entries, slot);
                let entry = self.entries.remove(slot);
                self.unindex(id);
                tracing::debug!(target: TARGET, id, result = result.as_str(), "canceled pending request");
                metrics::REQUESTS_CANCELED.increment();
                retire_with_error(entry, result);
                true
            }
            ReqState::Writing => {
                let entry = &mut self.entries[slot];
                entry.state = ReqState::WriteCanceled;
                entry.cancel_result = Some(result);
                tracing::debug!(target: TARGET, id, result = result.as_str(), "canceling request during write");
                true
            }
            ReqState::AwaitingReply => {
                self.awaiting.remove(&mut self.entries, slot);
                let entry = self.entries.remove(slot);
                self.unindex(id);
                self.retain(&entry);
                tracing::debug!(target: TARGET, id, result = result.as_str(), "canceled request awaiting reply");
                metrics::REQUESTS_CANCELED.increment();
                retire_with_error(entry, result);
                true
            }
            ReqState::WriteCanceled => false,
            ReqState::None | ReqState::Complete => {
                unreachable!("request {id} in queue with state {state:?}")
            }
        }
    }

    fn unindex(&mut self, id: u64) {
        if self.out_of_order() {
            self.index.remove(&id);
        }
    }
}

impl Drop for ContextQueue {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            tracing::warn!(
                target: TARGET,
                outstanding = self.entries.len(),
                "context queue dropped with outstanding requests"
            );
            self.on_channel_closed(ResultCode::LocalError);
        }
    }
}

fn retire(entry: Entry, reply: Reply) {
    metrics::REQUESTS_OUTSTANDING.decrement();
    entry.complete(reply);
}

fn retire_with_error(entry: Entry, result: ResultCode) {
    metrics::REQUESTS_OUTSTANDING.decrement();
    entry.reply_error(result);
}
