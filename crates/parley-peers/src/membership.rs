//! Doubly-linked membership cells.
//!
//! Used for lists whose members come and go from the middle (a channel's
//! member list, a server's downlinks). Cells are individually allocated
//! rather than pooled; churn on these lists is low enough that the free
//! stack buys nothing. Removal is O(1) given the cell and the list head.

use slab::Slab;

/// Exclusive handle to a membership cell. Consumed by
/// [`Memberships::remove_dlink`].
#[derive(Debug, PartialEq, Eq)]
pub struct DLinkId(usize);

/// Head slot of one membership list.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DLinkHead {
    first: Option<usize>,
}

impl DLinkHead {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }
}

struct DLinkNode<V> {
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Backing store shared by any number of membership lists.
///
/// A head must always be used with the store its cells came from.
pub struct Memberships<V> {
    cells: Slab<DLinkNode<V>>,
}

impl<V> Default for Memberships<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Memberships<V> {
    pub fn new() -> Self {
        Self { cells: Slab::new() }
    }

    /// Prepends `value` to the list rooted at `head`.
    pub fn add_dlink(&mut self, head: &mut DLinkHead, value: V) -> DLinkId {
        let next = head.first;
        let key = self.cells.insert(DLinkNode {
            value,
            prev: None,
            next,
        });
        if let Some(next) = next {
            self.node_mut(next).prev = Some(key);
        }
        head.first = Some(key);
        DLinkId(key)
    }

    /// Splices `cell` out of the list rooted at `head` and frees it.
    pub fn remove_dlink(&mut self, head: &mut DLinkHead, cell: DLinkId) -> V {
        let DLinkId(key) = cell;
        let node = match self.cells.try_remove(key) {
            Some(node) => node,
            None => crate::fatal!("membership cell {} already removed", key),
        };

        match node.prev {
            Some(prev) => self.node_mut(prev).next = node.next,
            None => {
                crate::invariant!(
                    head.first == Some(key),
                    "membership cell {} removed through the wrong head",
                    key
                );
                head.first = node.next;
            }
        }
        if let Some(next) = node.next {
            self.node_mut(next).prev = node.prev;
        }
        node.value
    }

    pub fn get(&self, cell: &DLinkId) -> &V {
        &self.node(cell.0).value
    }

    pub fn get_mut(&mut self, cell: &DLinkId) -> &mut V {
        &mut self.node_mut(cell.0).value
    }

    pub fn iter<'a>(&'a self, head: &DLinkHead) -> impl Iterator<Item = &'a V> + 'a {
        let mut cursor = head.first;
        std::iter::from_fn(move || {
            let node = self.node(cursor?);
            cursor = node.next;
            Some(&node.value)
        })
    }

    /// Cells currently allocated across all lists.
    pub fn in_use(&self) -> usize {
        self.cells.len()
    }

    /// Bytes one cell occupies.
    pub fn cell_size() -> usize {
        std::mem::size_of::<DLinkNode<V>>()
    }

    fn node(&self, key: usize) -> &DLinkNode<V> {
        match self.cells.get(key) {
            Some(node) => node,
            None => crate::fatal!("dangling membership cell {}", key),
        }
    }

    fn node_mut(&mut self, key: usize) -> &mut DLinkNode<V> {
        match self.cells.get_mut(key) {
            Some(node) => node,
            None => crate::fatal!("dangling membership cell {}", key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(store: &Memberships<u32>, head: &DLinkHead) -> Vec<u32> {
        store.iter(head).copied().collect()
    }

    #[test]
    fn add_prepends() {
        let mut store = Memberships::new();
        let mut head = DLinkHead::new();
        store.add_dlink(&mut head, 1);
        store.add_dlink(&mut head, 2);
        store.add_dlink(&mut head, 3);
        assert_eq!(collect(&store, &head), vec![3, 2, 1]);
    }

    #[test]
    fn remove_from_middle_relinks_neighbours() {
        let mut store = Memberships::new();
        let mut head = DLinkHead::new();
        store.add_dlink(&mut head, 1);
        let middle = store.add_dlink(&mut head, 2);
        store.add_dlink(&mut head, 3);

        assert_eq!(store.remove_dlink(&mut head, middle), 2);
        assert_eq!(collect(&store, &head), vec![3, 1]);
        assert_eq!(store.in_use(), 2);
    }

    #[test]
    fn remove_first_moves_head() {
        let mut store = Memberships::new();
        let mut head = DLinkHead::new();
        store.add_dlink(&mut head, 1);
        let first = store.add_dlink(&mut head, 2);

        store.remove_dlink(&mut head, first);
        assert_eq!(collect(&store, &head), vec![1]);
    }

    #[test]
    fn remove_last_empties_list() {
        let mut store = Memberships::new();
        let mut head = DLinkHead::new();
        let only = store.add_dlink(&mut head, 9);
        store.remove_dlink(&mut head, only);
        assert!(head.is_empty());
        assert_eq!(store.in_use(), 0);
    }

    #[test]
    fn lists_share_one_store() {
        let mut store = Memberships::new();
        let mut a = DLinkHead::new();
        let mut b = DLinkHead::new();
        let a1 = store.add_dlink(&mut a, 1);
        store.add_dlink(&mut b, 10);
        store.add_dlink(&mut a, 2);

        store.remove_dlink(&mut a, a1);
        assert_eq!(collect(&store, &a), vec![2]);
        assert_eq!(collect(&store, &b), vec![10]);
    }
}
