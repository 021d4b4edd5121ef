//! End-to-end request lifecycles driven through the public API, playing the
//! transport on the test thread and the callers on spawned threads.

use std::thread;
use std::time::Duration;

use memcache_mux::{
    ContextQueue, Delivery, Operation, Protocol, QueueConfig, Reply, ReplyHandle, RequestContext,
    ResultCode, Sent, SerializedRequest,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn queue(protocol: Protocol) -> ContextQueue {
    ContextQueue::new(QueueConfig::for_protocol(protocol)).unwrap()
}

fn enqueue(q: &mut ContextQueue, op: Operation, id: u64) -> ReplyHandle {
    let request = SerializedRequest::new(format!("{} key{id}\r\n", op.name()));
    q.mark_as_pending(RequestContext::new(op, request, id, q.protocol()))
}

fn send_one(q: &mut ContextQueue) -> Sent {
    q.mark_next_as_sending().unwrap();
    q.mark_next_as_sent()
}

/// Run `process_cancellations` until one request has been canceled.
fn drain_one_cancel(q: &mut ContextQueue) {
    for _ in 0..5_000 {
        if q.process_cancellations() > 0 {
            return;
        }
        thread::sleep(Duration::from_millis(1));
    }
    panic!("no cancellation arrived");
}

fn data(reply: &Reply) -> &[u8] {
    reply.value().unwrap().data.as_ref()
}

// ── Matching ────────────────────────────────────────────────────────

#[test]
fn in_order_replies_match_submission_order() {
    let mut q = queue(Protocol::Ascii);
    let handles: Vec<_> = (1..=3).map(|id| enqueue(&mut q, Operation::Get, id)).collect();
    for _ in 0..3 {
        q.mark_next_as_sending().unwrap();
    }
    for _ in 0..3 {
        q.mark_next_as_sent();
    }
    assert_eq!(q.inflight_request_count(), 3);

    // Wire arrival tagged 2, 1, 3; matching is positional.
    assert_eq!(q.reply(2, Reply::hit("first", 0)).unwrap(), Delivery::Delivered { id: 1 });
    assert_eq!(q.reply(1, Reply::hit("second", 0)).unwrap(), Delivery::Delivered { id: 2 });
    assert_eq!(q.reply(3, Reply::hit("third", 0)).unwrap(), Delivery::Delivered { id: 3 });

    let replies: Vec<_> = handles.into_iter().map(|h| h.try_reply().unwrap()).collect();
    assert_eq!(data(&replies[0]), b"first");
    assert_eq!(data(&replies[1]), b"second");
    assert_eq!(data(&replies[2]), b"third");
    assert!(q.is_empty());
}

#[test]
fn out_of_order_replies_match_by_id() {
    let mut q = queue(Protocol::Binary);
    let h10 = enqueue(&mut q, Operation::Get, 10);
    let h11 = enqueue(&mut q, Operation::Get, 11);
    send_one(&mut q);
    send_one(&mut q);

    assert_eq!(q.reply(11, Reply::hit("eleven", 0)).unwrap(), Delivery::Delivered { id: 11 });
    assert_eq!(data(&h11.try_reply().unwrap()), b"eleven");
    assert!(h10.try_reply().is_none());
    assert_eq!(q.inflight_request_count(), 1);

    // Unknown and already-resolved ids change nothing.
    assert_eq!(q.reply(12, Reply::miss()).unwrap(), Delivery::Unmatched);
    assert_eq!(q.reply(11, Reply::miss()).unwrap(), Delivery::Unmatched);
    assert_eq!(q.inflight_request_count(), 1);
    assert!(h10.try_reply().is_none());

    assert_eq!(q.reply(10, Reply::miss()).unwrap(), Delivery::Delivered { id: 10 });
    assert_eq!(h10.try_reply().unwrap().result(), ResultCode::NotFound);
}

#[test]
fn type_mismatch_is_reported_and_request_survives() {
    let mut q = queue(Protocol::Ascii);
    let h = enqueue(&mut q, Operation::Incr, 1);
    send_one(&mut q);

    assert!(q.reply(0, Reply::stored()).is_err());
    assert_eq!(q.inflight_request_count(), 1);
    assert!(h.try_reply().is_none());

    q.reply(0, Reply::numeric(42)).unwrap();
    assert_eq!(h.try_reply().unwrap().counter(), Some(42));
}

// ── Failure ─────────────────────────────────────────────────────────

#[test]
fn connection_close_fails_every_list() {
    let mut q = queue(Protocol::Ascii);
    let awaiting = enqueue(&mut q, Operation::Set, 1);
    let writing = enqueue(&mut q, Operation::Delete, 2);
    let pending = enqueue(&mut q, Operation::Get, 3);
    send_one(&mut q);
    q.mark_next_as_sending().unwrap();
    assert_eq!(q.pending_request_count(), 1);
    assert_eq!(q.inflight_request_count(), 2);

    q.fail_all_pending(ResultCode::ConnectError);
    assert_eq!(q.pending_request_count(), 0);
    assert_eq!(q.inflight_request_count(), 2);
    assert_eq!(pending.try_reply().unwrap().result(), ResultCode::ConnectError);
    assert!(writing.try_reply().is_none());

    q.fail_all_sent(ResultCode::ConnectError);
    assert_eq!(q.pending_request_count(), 0);
    assert_eq!(q.inflight_request_count(), 0);
    assert_eq!(writing.try_reply().unwrap().result(), ResultCode::ConnectError);
    assert_eq!(awaiting.try_reply().unwrap().result(), ResultCode::ConnectError);
}

#[test]
fn channel_closed_forgets_retained_initializers() {
    let mut q = queue(Protocol::Ascii);
    let h = enqueue(&mut q, Operation::Get, 1);
    send_one(&mut q);

    let waiter = thread::spawn(move || h.wait_for_reply(Duration::from_millis(5)));
    drain_one_cancel(&mut q);
    assert_eq!(waiter.join().unwrap().result(), ResultCode::Timeout);
    assert_eq!(q.stored_initializer_count(), 1);

    q.on_channel_closed(ResultCode::ConnectError);
    assert_eq!(q.stored_initializer_count(), 0);
    assert!(q.parser_initializer(0).is_none());
}

// ── Timeouts and cancellation ───────────────────────────────────────

#[test]
fn timeout_while_writing_waits_for_write_to_finish() {
    let mut q = queue(Protocol::Ascii);
    let h = enqueue(&mut q, Operation::Get, 7);
    let outgoing = q.mark_next_as_sending().unwrap();
    assert_eq!(outgoing.id, 7);

    let waiter = thread::spawn(move || h.wait_for_reply(Duration::from_millis(5)));
    drain_one_cancel(&mut q);

    // Still in the writing list; the waiter is held until the write is done.
    assert_eq!(q.inflight_request_count(), 1);
    thread::sleep(Duration::from_millis(20));
    assert!(!waiter.is_finished());

    assert_eq!(q.mark_next_as_sent(), Sent::Canceled { id: 7 });
    assert_eq!(q.inflight_request_count(), 0);
    assert_eq!(waiter.join().unwrap().result(), ResultCode::Timeout);

    // The server still answers; the retained initializer lets the stream
    // skip that reply.
    assert_eq!(q.stored_initializer_count(), 1);
    assert!(q.parser_initializer(0).is_some());
    assert_eq!(q.reply(0, Reply::miss()).unwrap(), Delivery::Discarded { id: 7 });
    assert_eq!(q.stored_initializer_count(), 0);
}

#[test]
fn timeout_behind_head_keeps_in_order_replies_aligned() {
    let mut q = queue(Protocol::Ascii);
    let first = enqueue(&mut q, Operation::Get, 1);
    let second = enqueue(&mut q, Operation::Get, 2);
    send_one(&mut q);
    send_one(&mut q);

    let waiter = thread::spawn(move || second.wait_for_reply(Duration::from_millis(5)));
    drain_one_cancel(&mut q);
    assert_eq!(waiter.join().unwrap().result(), ResultCode::Timeout);

    // The server answers in submission order regardless.
    assert_eq!(q.reply(0, Reply::hit("value-1", 0)).unwrap(), Delivery::Delivered { id: 1 });
    assert_eq!(q.reply(0, Reply::hit("value-2", 0)).unwrap(), Delivery::Discarded { id: 2 });
    assert_eq!(data(&first.try_reply().unwrap()), b"value-1");
}

#[test]
fn late_cancel_does_not_touch_request_with_same_id() {
    let mut q = queue(Protocol::Ascii);
    let a = enqueue(&mut q, Operation::Get, 0);
    send_one(&mut q);

    // A times out just as its reply is delivered; the reply wins.
    let waiter = thread::spawn(move || a.wait_for_reply(Duration::from_millis(5)));
    thread::sleep(Duration::from_millis(20));
    assert_eq!(q.reply(0, Reply::miss()).unwrap(), Delivery::Delivered { id: 0 });
    assert_eq!(waiter.join().unwrap().result(), ResultCode::NotFound);

    let b = enqueue(&mut q, Operation::Get, 0);
    assert_eq!(q.process_cancellations(), 0);
    assert_eq!(q.pending_request_count(), 1);
    assert!(b.try_reply().is_none());
}

#[test]
fn explicit_cancel_aborts_pending_request() {
    let mut q = queue(Protocol::Binary);
    let h = enqueue(&mut q, Operation::Touch, 3);

    let waiter = thread::spawn(move || h.cancel());
    drain_one_cancel(&mut q);
    assert_eq!(waiter.join().unwrap().result(), ResultCode::Aborted);
    assert_eq!(q.pending_request_count(), 0);
    // Never written, so no reply is owed.
    assert_eq!(q.stored_initializer_count(), 0);
}

#[test]
fn cancellation_racing_reply_has_one_outcome() {
    for round in 0..40u64 {
        let mut q = queue(Protocol::Binary);
        let h = enqueue(&mut q, Operation::Get, round);
        send_one(&mut q);

        let timeout = Duration::from_micros(round * 25);
        let waiter = thread::spawn(move || h.wait_for_reply(timeout));
        thread::sleep(Duration::from_micros(500));

        q.process_cancellations();
        let delivery = q.reply(round, Reply::hit("v", 0)).unwrap();
        let reply = waiter.join().unwrap();

        match delivery {
            Delivery::Delivered { .. } => assert_eq!(reply.result(), ResultCode::Found),
            Delivery::Discarded { .. } => assert_eq!(reply.result(), ResultCode::Timeout),
            Delivery::Unmatched => panic!("reply for {round} unmatched"),
        }
        // A cancel that lost the race is stale.
        assert_eq!(q.process_cancellations(), 0);
        assert!(q.is_empty());
    }
}

#[test]
fn wait_uses_configured_default_timeout() {
    let config = QueueConfig {
        default_timeout: Duration::from_millis(5),
        ..QueueConfig::for_protocol(Protocol::Binary)
    };
    let mut q = ContextQueue::new(config).unwrap();
    let h = enqueue(&mut q, Operation::Version, 1);
    send_one(&mut q);

    let waiter = thread::spawn(move || h.wait());
    drain_one_cancel(&mut q);
    assert_eq!(waiter.join().unwrap().result(), ResultCode::Timeout);
    assert!(q.parser_initializer(1).is_some());
}

#[test]
fn dropped_queue_releases_waiters() {
    let mut q = queue(Protocol::Ascii);
    let h = enqueue(&mut q, Operation::Get, 1);
    send_one(&mut q);

    let waiter = thread::spawn(move || h.wait_for_reply(Duration::from_secs(5)));
    drop(q);
    assert_eq!(waiter.join().unwrap().result(), ResultCode::LocalError);
}
