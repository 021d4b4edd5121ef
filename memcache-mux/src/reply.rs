//! Reply values and result codes.
//!
//! A [`Reply`] is the single outcome type handed to a waiting caller. Server
//! answers and locally injected failures (timeouts, connection errors) take
//! the same shape: a [`ResultCode`] plus a [`ReplyBody`] of the kind the
//! request expects.

use bytes::Bytes;

use crate::operation::ReplyKind;

/// Outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    /// GET hit.
    Found,
    /// Miss, or the key does not exist.
    NotFound,
    Stored,
    NotStored,
    /// CAS token mismatch.
    Exists,
    Deleted,
    Touched,
    Ok,
    /// The request did not complete before its deadline.
    Timeout,
    /// Could not establish a connection.
    ConnectError,
    ConnectTimeout,
    /// The server answered with SERVER_ERROR.
    RemoteError,
    /// The server answered with CLIENT_ERROR or ERROR.
    ClientError,
    /// Failure inside the client (connection closed, queue torn down).
    LocalError,
    /// The caller canceled the request.
    Aborted,
}

impl ResultCode {
    /// Returns true for codes produced by a failure rather than by the
    /// server answering the request.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            ResultCode::Timeout
                | ResultCode::ConnectError
                | ResultCode::ConnectTimeout
                | ResultCode::RemoteError
                | ResultCode::ClientError
                | ResultCode::LocalError
                | ResultCode::Aborted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResultCode::Found => "found",
            ResultCode::NotFound => "notfound",
            ResultCode::Stored => "stored",
            ResultCode::NotStored => "notstored",
            ResultCode::Exists => "exists",
            ResultCode::Deleted => "deleted",
            ResultCode::Touched => "touched",
            ResultCode::Ok => "ok",
            ResultCode::Timeout => "timeout",
            ResultCode::ConnectError => "connect_error",
            ResultCode::ConnectTimeout => "connect_timeout",
            ResultCode::RemoteError => "remote_error",
            ResultCode::ClientError => "client_error",
            ResultCode::LocalError => "local_error",
            ResultCode::Aborted => "aborted",
        }
    }
}

/// A value returned by a GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    /// The cached data.
    pub data: Bytes,
    /// Flags stored with the item.
    pub flags: u32,
    /// CAS unique token (present for `gets`).
    pub cas: Option<u64>,
}

/// Operation-specific payload of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody {
    Get(Option<Value>),
    Store,
    Delete,
    /// New counter value after INCR/DECR.
    Arithmetic(Option<u64>),
    Touch,
    Flush,
    Version(Option<Bytes>),
}

impl ReplyBody {
    /// An empty body of the given kind, used for error replies.
    pub fn empty(kind: ReplyKind) -> Self {
        match kind {
            ReplyKind::Get => ReplyBody::Get(None),
            ReplyKind::Store => ReplyBody::Store,
            ReplyKind::Delete => ReplyBody::Delete,
            ReplyKind::Arithmetic => ReplyBody::Arithmetic(None),
            ReplyKind::Touch => ReplyBody::Touch,
            ReplyKind::Flush => ReplyBody::Flush,
            ReplyKind::Version => ReplyBody::Version(None),
        }
    }

    pub fn kind(&self) -> ReplyKind {
        match self {
            ReplyBody::Get(_) => ReplyKind::Get,
            ReplyBody::Store => ReplyKind::Store,
            ReplyBody::Delete => ReplyKind::Delete,
            ReplyBody::Arithmetic(_) => ReplyKind::Arithmetic,
            ReplyBody::Touch => ReplyKind::Touch,
            ReplyBody::Flush => ReplyKind::Flush,
            ReplyBody::Version(_) => ReplyKind::Version,
        }
    }
}

/// A decoded reply, or a locally injected failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    result: ResultCode,
    body: ReplyBody,
}

impl Reply {
    pub fn new(result: ResultCode, body: ReplyBody) -> Self {
        Self { result, body }
    }

    /// A failure reply of the given kind.
    pub fn error(kind: ReplyKind, result: ResultCode) -> Self {
        Self::new(result, ReplyBody::empty(kind))
    }

    // -- Constructors for decoded server replies --------------------------------

    /// A GET hit.
    pub fn hit(data: impl Into<Bytes>, flags: u32) -> Self {
        Self::new(
            ResultCode::Found,
            ReplyBody::Get(Some(Value {
                data: data.into(),
                flags,
                cas: None,
            })),
        )
    }

    /// A GET miss.
    pub fn miss() -> Self {
        Self::new(ResultCode::NotFound, ReplyBody::Get(None))
    }

    pub fn stored() -> Self {
        Self::new(ResultCode::Stored, ReplyBody::Store)
    }

    pub fn not_stored() -> Self {
        Self::new(ResultCode::NotStored, ReplyBody::Store)
    }

    pub fn deleted() -> Self {
        Self::new(ResultCode::Deleted, ReplyBody::Delete)
    }

    pub fn numeric(value: u64) -> Self {
        Self::new(ResultCode::Ok, ReplyBody::Arithmetic(Some(value)))
    }

    pub fn version(version: impl Into<Bytes>) -> Self {
        Self::new(ResultCode::Ok, ReplyBody::Version(Some(version.into())))
    }

    // -- Accessors ------------------------------------------------------------

    pub fn result(&self) -> ResultCode {
        self.result
    }

    pub fn kind(&self) -> ReplyKind {
        self.body.kind()
    }

    pub fn body(&self) -> &ReplyBody {
        &self.body
    }

    pub fn is_error(&self) -> bool {
        self.result.is_error()
    }

    /// The value of a GET hit.
    pub fn value(&self) -> Option<&Value> {
        match &self.body {
            ReplyBody::Get(value) => value.as_ref(),
            _ => None,
        }
    }

    /// The new counter value of an INCR/DECR.
    pub fn counter(&self) -> Option<u64> {
        match self.body {
            ReplyBody::Arithmetic(value) => value,
            _ => None,
        }
    }

    pub fn into_body(self) -> ReplyBody {
        self.body
    }
}
