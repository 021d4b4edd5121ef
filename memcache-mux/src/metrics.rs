//! Request multiplexing metrics.
//!
//! Process-wide counters shared by every [`ContextQueue`](crate::ContextQueue).
//! Exposed through the `metriken` registry, so any exporter that walks it
//! (Prometheus admin endpoint, test harness) picks them up.

use metriken::{Counter, Gauge, metric};

// ── Request lifecycle ────────────────────────────────────────────

#[metric(
    name = "memcache_mux/requests/enqueued",
    description = "Requests marked as pending"
)]
pub static REQUESTS_ENQUEUED: Counter = Counter::new();

#[metric(
    name = "memcache_mux/requests/outstanding",
    description = "Requests enqueued and not yet complete"
)]
pub static REQUESTS_OUTSTANDING: Gauge = Gauge::new();

#[metric(
    name = "memcache_mux/requests/canceled",
    description = "Requests retired by timeout or caller cancellation"
)]
pub static REQUESTS_CANCELED: Counter = Counter::new();

#[metric(
    name = "memcache_mux/requests/failed",
    description = "Requests failed in bulk on connection failure"
)]
pub static REQUESTS_FAILED: Counter = Counter::new();

// ── Replies ──────────────────────────────────────────────────────

#[metric(
    name = "memcache_mux/replies/delivered",
    description = "Replies matched to a waiting request"
)]
pub static REPLIES_DELIVERED: Counter = Counter::new();

#[metric(
    name = "memcache_mux/replies/discarded",
    description = "Late replies for requests that already left the queue"
)]
pub static REPLIES_DISCARDED: Counter = Counter::new();

#[metric(
    name = "memcache_mux/replies/unmatched",
    description = "Replies with an unknown id or no outstanding request"
)]
pub static REPLIES_UNMATCHED: Counter = Counter::new();

#[metric(
    name = "memcache_mux/replies/type_mismatch",
    description = "Replies whose shape did not match the request"
)]
pub static REPLY_TYPE_MISMATCH: Counter = Counter::new();

// ── Parser initializers ──────────────────────────────────────────

#[metric(
    name = "memcache_mux/initializers/evicted",
    description = "Retained initializers dropped to stay within the queue capacity"
)]
pub static INITIALIZERS_EVICTED: Counter = Counter::new();
