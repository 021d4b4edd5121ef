//! Index-linked FIFO lists over slab keys.
//!
//! Each slab entry embeds one [`Link`], so an entry can be a member of at
//! most one [`List`] at a time. Append, pop-front, and unlink of an
//! arbitrary member are all O(1).

use slab::Slab;

/// Per-entry list hook.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Link {
    prev: Option<usize>,
    next: Option<usize>,
}

/// Access to the hook embedded in a slab entry.
pub(crate) trait Linked {
    fn link(&self) -> &Link;
    fn link_mut(&mut self) -> &mut Link;
}

/// A FIFO of slab keys threaded through the entries' [`Link`]s.
#[derive(Debug, Default)]
pub(crate) struct List {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl List {
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub(crate) fn front(&self) -> Option<usize> {
        self.head
    }

    /// Append `key` at the tail. The entry must not be linked anywhere.
    pub(crate) fn push_back<T: Linked>(&mut self, arena: &mut Slab<T>, key: usize) {
        debug_assert_eq!(*arena[key].link(), Link::default(), "entry {key} already linked");
        debug_assert_ne!(self.head, Some(key), "entry {key} already at head");

        *arena[key].link_mut() = Link {
            prev: self.tail,
            next: None,
        };
        match self.tail {
            Some(tail) => arena[tail].link_mut().next = Some(key),
            None => self.head = Some(key),
        }
        self.tail = Some(key);
        self.len += 1;
    }

    /// Unlink and return the head key.
    pub(crate) fn pop_front<T: Linked>(&mut self, arena: &mut Slab<T>) -> Option<usize> {
        let key = self.head?;
        self.remove(arena, key);
        Some(key)
    }

    /// Unlink `key`, which must be a member of this list.
    pub(crate) fn remove<T: Linked>(&mut self, arena: &mut Slab<T>, key: usize) {
        debug_assert!(self.len > 0, "remove from empty list");
        let Link { prev, next } = std::mem::take(arena[key].link_mut());

        match prev {
            Some(prev) => arena[prev].link_mut().next = next,
            None => {
                debug_assert_eq!(self.head, Some(key), "entry {key} not in this list");
                self.head = next;
            }
        }
        match next {
            Some(next) => arena[next].link_mut().prev = prev,
            None => self.tail = prev,
        }
        self.len -= 1;
    }

    /// Iterate keys from head to tail.
    pub(crate) fn iter<'a, T: Linked>(&self, arena: &'a Slab<T>) -> Iter<'a, T> {
        Iter {
            arena,
            cursor: self.head,
        }
    }
}

pub(crate) struct Iter<'a, T> {
    arena: &'a Slab<T>,
    cursor: Option<usize>,
}

impl<T: Linked> Iterator for Iter<'_, T> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let key = self.cursor?;
        self.cursor = self.arena[key].link().next;
        Some(key)
    }
}
