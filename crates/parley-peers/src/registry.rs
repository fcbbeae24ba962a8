//! Global peer registry.
//!
//! Every live peer identity sits on one doubly-linked list threaded through
//! the peers' own `prev`/`next` fields. New peers go on the head, so the
//! local server (`me`), linked first, stays at the tail and is never removed.
//! The registry coordinates keys into the peer pool; the pool owns the data.

use crate::peer::{Peer, PeerId};
use crate::pool::Pool;

#[derive(Debug, Default)]
pub struct Registry {
    head: Option<PeerId>,
    sentinel: Option<PeerId>,
    len: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head(&self) -> Option<PeerId> {
        self.head
    }

    /// The terminal entry: this server's own identity.
    pub fn sentinel(&self) -> Option<PeerId> {
        self.sentinel
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Links the local server's identity. It must be the first entry.
    pub fn link_sentinel(&mut self, peers: &mut Pool<Peer>, id: PeerId) {
        crate::invariant!(self.head.is_none(), "sentinel linked into a non-empty registry");
        self.link(peers, id);
        self.sentinel = Some(id);
    }

    /// Inserts `id` at the head.
    pub fn link(&mut self, peers: &mut Pool<Peer>, id: PeerId) {
        let old_head = self.head;
        let peer = peer_mut(peers, id);
        crate::invariant!(
            peer.prev.is_none() && peer.next.is_none() && old_head != Some(id),
            "peer {:?} linked twice",
            id
        );
        peer.prev = None;
        peer.next = old_head;

        if let Some(old) = old_head {
            peer_mut(peers, old).prev = Some(id);
        }
        self.head = Some(id);
        self.len += 1;
    }

    /// True while `id` is on the list.
    ///
    /// Only the sentinel lacks a successor, so any other peer is linked iff
    /// it has one or is the head.
    pub fn is_linked(&self, peers: &Pool<Peer>, id: PeerId) -> bool {
        peers.get(id.0).is_some_and(|p| p.next.is_some())
            || self.head == Some(id)
            || self.sentinel == Some(id)
    }

    /// Splices `id` out. Unlinking a peer that is not on the list is a
    /// no-op; either way the peer leaves with both links cleared.
    pub fn unlink(&mut self, peers: &mut Pool<Peer>, id: PeerId) -> bool {
        crate::invariant!(self.sentinel != Some(id), "attempt to unlink the local server");

        let linked = self.is_linked(peers, id);
        let peer = peer_mut(peers, id);
        let (prev, next) = (peer.prev.take(), peer.next.take());
        if !linked {
            return false;
        }

        match prev {
            Some(prev) => peer_mut(peers, prev).next = next,
            None => self.head = next,
        }
        if let Some(next) = next {
            peer_mut(peers, next).prev = prev;
        }
        self.len -= 1;
        true
    }

    /// Walks the list head to tail.
    pub fn iter<'a>(&self, peers: &'a Pool<Peer>) -> Iter<'a> {
        Iter {
            peers,
            cursor: self.head,
        }
    }

    /// Exhaustive consistency check: every entry is live, back links agree,
    /// the list terminates at the sentinel and visits no more peers than the
    /// pool has ever allocated. Panics on the first inconsistency.
    pub fn verify(&self, peers: &Pool<Peer>) {
        let limit = peers.stats().allocated;
        let mut prev: Option<PeerId> = None;
        let mut visited = 0u64;
        let mut cursor = self.head;

        while let Some(id) = cursor {
            let peer = match peers.get(id.0) {
                Some(peer) if peer.liveness.is_live() => peer,
                _ => crate::fatal!("registry entry {:?} is not a live peer", id),
            };
            crate::invariant!(peer.prev == prev, "registry back link broken at {:?}", id);
            visited += 1;
            crate::invariant!(visited <= limit, "registry loops");
            prev = Some(id);
            cursor = peer.next;
        }

        crate::invariant!(prev == self.sentinel, "registry does not end at the sentinel");
        crate::invariant!(visited as usize == self.len, "registry length drifted");
    }
}

pub struct Iter<'a> {
    peers: &'a Pool<Peer>,
    cursor: Option<PeerId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (PeerId, &'a Peer);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let peer = match self.peers.get(id.0) {
            Some(peer) => peer,
            None => crate::fatal!("registry points at released peer {:?}", id),
        };
        self.cursor = peer.next;
        Some((id, peer))
    }
}

fn peer_mut(peers: &mut Pool<Peer>, id: PeerId) -> &mut Peer {
    match peers.get_mut(id.0) {
        Some(peer) => peer,
        None => crate::fatal!("registry touched released peer {:?}", id),
    }
}
