//! Consumer-side cache for subscription snapshots.
//!
//! Snapshots may be followed by out-of-band patches for entities already
//! shown (an author resolved after the comment list was emitted), so a local
//! list must be updated by identity, never by position.

use crate::models::{Comment, CommentId, CommentView, Thread, ThreadId, ThreadView};

/// An entity with a stable identity.
pub trait Keyed {
    type Key: PartialEq + Clone;

    fn key(&self) -> Self::Key;
}

impl Keyed for Thread {
    type Key = ThreadId;

    fn key(&self) -> ThreadId {
        self.id.clone()
    }
}

impl Keyed for ThreadView {
    type Key = ThreadId;

    fn key(&self) -> ThreadId {
        self.thread.id.clone()
    }
}

impl Keyed for Comment {
    type Key = CommentId;

    fn key(&self) -> CommentId {
        self.id.clone()
    }
}

impl Keyed for CommentView {
    type Key = CommentId;

    fn key(&self) -> CommentId {
        self.comment.id.clone()
    }
}

/// Ordered local copy of a subscribed list, owned by exactly one subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replica<T> {
    items: Vec<T>,
}

impl<T> Default for Replica<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: Keyed> Replica<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the entity with the same key, or appends it.
    pub fn upsert(&mut self, item: T) {
        let key = item.key();
        match self.items.iter_mut().find(|existing| existing.key() == key) {
            Some(slot) => *slot = item,
            None => self.items.push(item),
        }
    }

    /// Rebuilds the replica from a full snapshot, keeping snapshot order.
    pub fn apply_snapshot(&mut self, snapshot: Vec<T>) {
        self.items = snapshot;
    }

    pub fn get(&self, key: &T::Key) -> Option<&T> {
        self.items.iter().find(|item| &item.key() == key)
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
