//! Pooled singly-linked cells.
//!
//! Transient membership lists ("which peers does this list reference") are
//! chains of small cells recycled through a [`Pool`]. Cells carry no
//! liveness tag: the move-only [`LinkId`] is the only handle to a cell, so it
//! cannot be freed twice or read after it is freed.

use crate::pool::{Key, Pool, PoolStats, Poolable};

/// Exclusive handle to a link cell. Consumed by [`LinkPool::free_link`].
#[derive(Debug, PartialEq, Eq)]
pub struct LinkId(Key);

pub struct Link<V> {
    value: Option<V>,
    next: Option<LinkId>,
}

impl<V> Default for Link<V> {
    fn default() -> Self {
        Self {
            value: None,
            next: None,
        }
    }
}

impl<V> Poolable for Link<V> {
    const KIND: &'static str = "link";
}

pub struct LinkPool<V> {
    pool: Pool<Link<V>>,
}

impl<V> Default for LinkPool<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> LinkPool<V> {
    pub fn new() -> Self {
        Self { pool: Pool::new() }
    }

    /// Takes a cell off the free stack (or grows the pool) and stores `value`.
    pub fn make_link(&mut self, value: V) -> LinkId {
        let key = self.pool.acquire();
        self.cell_mut(key).value = Some(value);
        LinkId(key)
    }

    /// Returns a cell to the free stack and hands back its value.
    /// Freeing `None` is a no-op.
    pub fn free_link(&mut self, link: impl Into<Option<LinkId>>) -> Option<V> {
        let LinkId(key) = link.into()?;
        let cell = self.cell_mut(key);
        crate::invariant!(
            cell.next.is_none(),
            "freeing link {:?} that still owns its tail",
            key
        );
        let value = cell.value.take();
        self.pool.release(key);
        value
    }

    pub fn value(&self, link: &LinkId) -> &V {
        self.value_at(link.0)
    }

    pub fn next(&self, link: &LinkId) -> Option<&LinkId> {
        self.pool.get(link.0).and_then(|cell| cell.next.as_ref())
    }

    /// Replaces the cell's successor, returning the old one.
    pub fn set_next(&mut self, link: &LinkId, next: Option<LinkId>) -> Option<LinkId> {
        std::mem::replace(&mut self.cell_mut(link.0).next, next)
    }

    pub fn take_next(&mut self, link: &LinkId) -> Option<LinkId> {
        self.cell_mut(link.0).next.take()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    fn value_at(&self, key: Key) -> &V {
        match self.pool.get(key).and_then(|cell| cell.value.as_ref()) {
            Some(value) => value,
            None => crate::fatal!("link {:?} has no value", key),
        }
    }

    fn next_key(&self, key: Key) -> Option<Key> {
        self.pool
            .get(key)
            .and_then(|cell| cell.next.as_ref())
            .map(|next| next.0)
    }

    fn cell_mut(&mut self, key: Key) -> &mut Link<V> {
        match self.pool.get_mut(key) {
            Some(cell) => cell,
            None => crate::fatal!("stale link {:?}", key),
        }
    }
}

/// Head of a singly-linked chain of cells from a [`LinkPool`].
///
/// A list must always be used with the pool its cells came from.
#[derive(Debug, Default)]
pub struct LinkList {
    head: Option<LinkId>,
    len: usize,
}

impl LinkList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn head(&self) -> Option<&LinkId> {
        self.head.as_ref()
    }

    /// Prepends `value`.
    pub fn push<V>(&mut self, pool: &mut LinkPool<V>, value: V) {
        let link = pool.make_link(value);
        pool.set_next(&link, self.head.take());
        self.head = Some(link);
        self.len += 1;
    }

    /// Finds the first cell holding `value`.
    pub fn find_user_link<'a, V: PartialEq>(
        &'a self,
        pool: &'a LinkPool<V>,
        value: &V,
    ) -> Option<&'a LinkId> {
        let mut cursor = self.head.as_ref();
        while let Some(link) = cursor {
            if pool.value(link) == value {
                return Some(link);
            }
            cursor = pool.next(link);
        }
        None
    }

    /// Unlinks and frees the first cell holding `value`.
    pub fn remove<V: PartialEq>(&mut self, pool: &mut LinkPool<V>, value: &V) -> Option<V> {
        let head_key = self.head.as_ref()?.0;
        if pool.value_at(head_key) == value {
            let head = self.head.take()?;
            self.head = pool.take_next(&head);
            self.len -= 1;
            return pool.free_link(head);
        }

        let mut prev = head_key;
        while let Some(next) = pool.next_key(prev) {
            if pool.value_at(next) == value {
                let target = pool.cell_mut(prev).next.take()?;
                let after = pool.take_next(&target);
                pool.cell_mut(prev).next = after;
                self.len -= 1;
                return pool.free_link(target);
            }
            prev = next;
        }
        None
    }

    /// Frees every cell, returning the values front to back.
    pub fn clear<V>(&mut self, pool: &mut LinkPool<V>) -> Vec<V> {
        let mut values = Vec::with_capacity(self.len);
        let mut cursor = self.head.take();
        while let Some(link) = cursor {
            cursor = pool.take_next(&link);
            values.extend(pool.free_link(link));
        }
        self.len = 0;
        values
    }

    pub fn iter<'a, V>(&'a self, pool: &'a LinkPool<V>) -> impl Iterator<Item = &'a V> + 'a {
        let mut cursor = self.head.as_ref();
        std::iter::from_fn(move || {
            let link = cursor?;
            cursor = pool.next(link);
            Some(pool.value(link))
        })
    }
}
