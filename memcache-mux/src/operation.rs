//! Operation tags, reply-kind tags, and protocol framing modes.
//!
//! Every request is tagged with its [`Operation`] at construction time. The
//! operation determines the [`ReplyKind`] the request accepts, the parser
//! initializer used to decode its reply, and the canned wire bytes returned
//! by [`fake_reply`].

use bytes::{BufMut, Bytes, BytesMut};

use crate::parser::{ParserInitializer, ReplyParser};

/// Magic byte for binary response packets.
const RESPONSE_MAGIC: u8 = 0x81;

/// Binary protocol header size.
const HEADER_SIZE: usize = 24;

/// Binary status: no error.
const STATUS_NO_ERROR: u16 = 0x0000;

/// Binary status: key not found.
const STATUS_KEY_NOT_FOUND: u16 = 0x0001;

/// Wire framing used on a connection.
///
/// The framing decides how replies are matched to requests: ASCII replies
/// carry no request id and always answer the oldest outstanding request,
/// binary replies echo the request id in the opaque field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    /// Text protocol, strictly pipelined.
    #[default]
    Ascii,
    /// Binary protocol, replies matched by opaque id.
    Binary,
}

impl Protocol {
    /// Returns true if replies are matched by id rather than by position.
    #[inline]
    pub fn is_out_of_order(self) -> bool {
        matches!(self, Protocol::Binary)
    }
}

/// A Memcache operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Gets,
    Set,
    Add,
    Replace,
    Append,
    Prepend,
    Cas,
    Delete,
    Incr,
    Decr,
    Touch,
    FlushAll,
    Version,
}

/// Shape of the reply an operation expects.
///
/// Several operations share one reply shape (all storage commands answer
/// with a store reply, for example).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyKind {
    Get,
    Store,
    Delete,
    Arithmetic,
    Touch,
    Flush,
    Version,
}

impl Operation {
    /// The reply shape this operation accepts.
    pub fn reply_kind(self) -> ReplyKind {
        match self {
            Operation::Get | Operation::Gets => ReplyKind::Get,
            Operation::Set
            | Operation::Add
            | Operation::Replace
            | Operation::Append
            | Operation::Prepend
            | Operation::Cas => ReplyKind::Store,
            Operation::Delete => ReplyKind::Delete,
            Operation::Incr | Operation::Decr => ReplyKind::Arithmetic,
            Operation::Touch => ReplyKind::Touch,
            Operation::FlushAll => ReplyKind::Flush,
            Operation::Version => ReplyKind::Version,
        }
    }

    /// Command name as it appears on the ASCII wire.
    pub fn name(self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::Gets => "gets",
            Operation::Set => "set",
            Operation::Add => "add",
            Operation::Replace => "replace",
            Operation::Append => "append",
            Operation::Prepend => "prepend",
            Operation::Cas => "cas",
            Operation::Delete => "delete",
            Operation::Incr => "incr",
            Operation::Decr => "decr",
            Operation::Touch => "touch",
            Operation::FlushAll => "flush_all",
            Operation::Version => "version",
        }
    }

    /// Binary protocol opcode. CAS is a SET carrying a CAS value.
    pub fn opcode(self) -> u8 {
        match self {
            Operation::Get | Operation::Gets => 0x00,
            Operation::Set | Operation::Cas => 0x01,
            Operation::Add => 0x02,
            Operation::Replace => 0x03,
            Operation::Delete => 0x04,
            Operation::Incr => 0x05,
            Operation::Decr => 0x06,
            Operation::FlushAll => 0x08,
            Operation::Version => 0x0B,
            Operation::Append => 0x0E,
            Operation::Prepend => 0x0F,
            Operation::Touch => 0x1C,
        }
    }

    /// Parser initializer that configures a decoder for this operation's reply.
    pub fn parser_initializer(self) -> ParserInitializer {
        match self.reply_kind() {
            ReplyKind::Get => expect_get as ParserInitializer,
            ReplyKind::Store => expect_store as ParserInitializer,
            ReplyKind::Delete => expect_delete as ParserInitializer,
            ReplyKind::Arithmetic => expect_arithmetic as ParserInitializer,
            ReplyKind::Touch => expect_touch as ParserInitializer,
            ReplyKind::Flush => expect_flush as ParserInitializer,
            ReplyKind::Version => expect_version as ParserInitializer,
        }
    }
}

fn expect_get(parser: &mut dyn ReplyParser) {
    parser.expect_next(ReplyKind::Get);
}

fn expect_store(parser: &mut dyn ReplyParser) {
    parser.expect_next(ReplyKind::Store);
}

fn expect_delete(parser: &mut dyn ReplyParser) {
    parser.expect_next(ReplyKind::Delete);
}

fn expect_arithmetic(parser: &mut dyn ReplyParser) {
    parser.expect_next(ReplyKind::Arithmetic);
}

fn expect_touch(parser: &mut dyn ReplyParser) {
    parser.expect_next(ReplyKind::Touch);
}

fn expect_flush(parser: &mut dyn ReplyParser) {
    parser.expect_next(ReplyKind::Flush);
}

fn expect_version(parser: &mut dyn ReplyParser) {
    parser.expect_next(ReplyKind::Version);
}

/// Canned reply bytes for `op`, as the server would send them.
///
/// Lets a consumer synthesize a reply locally and feed it through the normal
/// parse path without a network round trip. GET variants produce a miss,
/// everything else a success. Binary replies echo `id` in the opaque field
/// (truncated to 32 bits, as on the wire).
pub fn fake_reply(protocol: Protocol, op: Operation, id: u64) -> Bytes {
    match protocol {
        Protocol::Ascii => Bytes::from_static(ascii_fake_reply(op.reply_kind())),
        Protocol::Binary => binary_fake_reply(op, id),
    }
}

fn ascii_fake_reply(kind: ReplyKind) -> &'static [u8] {
    match kind {
        ReplyKind::Get => b"END\r\n",
        ReplyKind::Store => b"STORED\r\n",
        ReplyKind::Delete => b"DELETED\r\n",
        ReplyKind::Arithmetic => b"0\r\n",
        ReplyKind::Touch => b"TOUCHED\r\n",
        ReplyKind::Flush => b"OK\r\n",
        ReplyKind::Version => b"VERSION memcache-mux\r\n",
    }
}

fn binary_fake_reply(op: Operation, id: u64) -> Bytes {
    let (status, body): (u16, &[u8]) = match op.reply_kind() {
        ReplyKind::Get => (STATUS_KEY_NOT_FOUND, &b""[..]),
        // 64-bit counter value
        ReplyKind::Arithmetic => (STATUS_NO_ERROR, &b"\0\0\0\0\0\0\0\0"[..]),
        ReplyKind::Version => (STATUS_NO_ERROR, &b"memcache-mux"[..]),
        _ => (STATUS_NO_ERROR, &b""[..]),
    };

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + body.len());
    buf.put_u8(RESPONSE_MAGIC);
    buf.put_u8(op.opcode());
    buf.put_u16(0); // key length
    buf.put_u8(0); // extras length
    buf.put_u8(0); // data type
    buf.put_u16(status);
    buf.put_u32(body.len() as u32);
    buf.put_u32(id as u32);
    buf.put_u64(0); // cas
    buf.put_slice(body);
    buf.freeze()
}
