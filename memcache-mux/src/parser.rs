//! Parser collaborator interface and the retained-initializer buffer.
//!
//! The reply decoder lives outside this crate. Before decoding each reply the
//! transport asks the queue which [`ParserInitializer`] to run, so the decoder
//! knows the shape of the reply that comes next. Initializers are plain `fn`
//! pointers, so they stay valid after the request that supplied them is gone.

use std::collections::{BTreeMap, HashMap};

use crate::operation::ReplyKind;

/// The reply decoder, as seen by a parser initializer.
pub trait ReplyParser {
    /// Configure the decoder to expect a reply of `kind` next.
    fn expect_next(&mut self, kind: ReplyKind);
}

/// Callback that configures a [`ReplyParser`] for one request's reply.
pub type ParserInitializer = fn(&mut dyn ReplyParser);

/// Initializers of requests that left the queue while a reply from the
/// server may still be on its way (timed out or canceled after the write).
///
/// Entries are ordered by the queue's submission sequence, which is also the
/// order requests went out on the wire. The in-order protocol compares the
/// oldest entry against the oldest live request to decide who the next reply
/// belongs to. The out-of-order protocol looks entries up by request id and
/// keeps at most `limit` of them, evicting the oldest.
pub(crate) struct RetainedInitializers {
    by_seq: BTreeMap<u64, (u64, ParserInitializer)>,
    /// Request id to sequence. Out-of-order only; in-order ids may repeat.
    by_id: Option<HashMap<u64, u64>>,
    limit: usize,
}

impl RetainedInitializers {
    /// Buffer for the in-order protocol. Unbounded: every entry is answered
    /// by a reply that precedes the replies of live requests.
    pub(crate) fn in_order() -> Self {
        Self {
            by_seq: BTreeMap::new(),
            by_id: None,
            limit: usize::MAX,
        }
    }

    /// Buffer for the out-of-order protocol holding at most `limit` entries.
    pub(crate) fn keyed(limit: usize) -> Self {
        Self {
            by_seq: BTreeMap::new(),
            by_id: Some(HashMap::new()),
            limit,
        }
    }

    /// Retain `initializer` for request `id`. Returns the id of an entry
    /// evicted to stay within the limit.
    pub(crate) fn push(&mut self, seq: u64, id: u64, initializer: ParserInitializer) -> Option<u64> {
        self.by_seq.insert(seq, (id, initializer));
        if let Some(by_id) = self.by_id.as_mut() {
            if let Some(replaced) = by_id.insert(id, seq) {
                self.by_seq.remove(&replaced);
            }
        }
        if self.by_seq.len() <= self.limit {
            return None;
        }
        let (evicted, _) = self.pop_front()?;
        Some(evicted)
    }

    /// Oldest entry as `(seq, initializer)`.
    pub(crate) fn front(&self) -> Option<(u64, ParserInitializer)> {
        self.by_seq.first_key_value().map(|(&seq, &(_, init))| (seq, init))
    }

    /// Remove the oldest entry, returning its request id and initializer.
    pub(crate) fn pop_front(&mut self) -> Option<(u64, ParserInitializer)> {
        let (seq, (id, init)) = self.by_seq.pop_first()?;
        if let Some(by_id) = self.by_id.as_mut() {
            if by_id.get(&id) == Some(&seq) {
                by_id.remove(&id);
            }
        }
        Some((id, init))
    }

    pub(crate) fn get(&self, id: u64) -> Option<ParserInitializer> {
        let seq = self.by_id.as_ref()?.get(&id)?;
        self.by_seq.get(seq).map(|&(_, init)| init)
    }

    /// Remove and return the entry for `id`.
    pub(crate) fn take(&mut self, id: u64) -> Option<ParserInitializer> {
        let seq = self.by_id.as_mut()?.remove(&id)?;
        self.by_seq.remove(&seq).map(|(_, init)| init)
    }

    pub(crate) fn clear(&mut self) {
        self.by_seq.clear();
        if let Some(by_id) = self.by_id.as_mut() {
            by_id.clear();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.by_seq.len()
    }
}
