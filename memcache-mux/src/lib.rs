//! Request/reply multiplexing core for Memcache clients.
//!
//! A [`ContextQueue`] tracks every outstanding request on one connection from
//! submission to completion and matches replies back to the caller that
//! issued them. ASCII connections are strictly pipelined: a reply always
//! answers the oldest request still expecting one. Binary connections match
//! replies by the id echoed in the opaque field.
//!
//! The queue is driven by the connection's I/O loop; callers block on a
//! [`ReplyHandle`] from any thread.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use memcache_mux::{
//!     ContextQueue, Operation, Protocol, QueueConfig, Reply, RequestContext, ResultCode,
//!     SerializedRequest,
//! };
//!
//! let mut queue = ContextQueue::new(QueueConfig::for_protocol(Protocol::Ascii))?;
//!
//! // Caller: build and enqueue a request.
//! let request = SerializedRequest::new(&b"get hello\r\n"[..]);
//! let ctx = RequestContext::new(Operation::Get, request, 1, Protocol::Ascii);
//! let handle = queue.mark_as_pending(ctx);
//!
//! // I/O loop: write it, then deliver the decoded reply.
//! let outgoing = queue.mark_next_as_sending().unwrap();
//! assert_eq!(&outgoing.payload[..], b"get hello\r\n");
//! queue.mark_next_as_sent();
//! queue.reply(0, Reply::hit("world", 0))?;
//!
//! // Caller: collect the result.
//! let reply = handle.wait_for_reply(Duration::from_millis(100));
//! assert_eq!(reply.result(), ResultCode::Found);
//! assert_eq!(reply.value().unwrap().data.as_ref(), b"world");
//! # Ok::<(), memcache_mux::Error>(())
//! ```

// ── Internal modules ────────────────────────────────────────────────────
pub(crate) mod list;

// ── Public modules ──────────────────────────────────────────────────────
pub mod config;
pub mod context;
pub mod error;
pub mod instrumented;
pub mod metrics;
pub mod operation;
pub mod parser;
pub mod queue;
pub mod reply;

// ── Re-exports ──────────────────────────────────────────────────────────

pub use config::QueueConfig;
pub use context::{ReplyHandle, ReqState, RequestContext, SerializedRequest};
pub use error::Error;
pub use instrumented::ReplyEvent;
pub use operation::{Operation, Protocol, ReplyKind, fake_reply};
pub use parser::{ParserInitializer, ReplyParser};
pub use queue::{ContextQueue, Delivery, Outgoing, QueueBuilder, Sent};
pub use reply::{Reply, ReplyBody, ResultCode, Value};
