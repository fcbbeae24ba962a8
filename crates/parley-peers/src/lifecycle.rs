//! Peer and connection lifecycle.
//!
//! [`Peers`] owns the pools and the registry and is the only place peers
//! and connections are created or destroyed. The exit path for a peer is
//! always:
//!
//! 1. record whowas history (registered users only);
//! 2. unlink from the registry;
//! 3. release the user or server extension;
//! 4. release the identity, which for a directly connected peer also
//!    releases its connection, or parks it until the event layer and timer
//!    subsystem report their handles gone.
//!
//! Because unlinking comes first, a broadcast walking the registry never
//! meets a half torn-down peer.

use std::collections::HashMap;

use parley_core::config::{LimitsConfig, ParleyConfig};
use parley_core::{now_secs, Timestamp};

use crate::connection::{ConnId, Connection, OwnedConnection};
use crate::hooks::Collaborators;
use crate::link::{Link, LinkPool};
use crate::membership::Memberships;
use crate::peer::{ConnRef, Extension, Peer, PeerId, Registration, ServerExt, Status, UserExt};
use crate::pool::{Liveness, Pool};
use crate::registry::{self, Registry};
use crate::stats::{ListInfo, PoolCounters, Usage};
use crate::teardown::TeardownEvent;

pub struct Peers<E> {
    peers: Pool<Peer>,
    conns: Pool<Connection>,
    links: LinkPool<PeerId>,
    memberships: Memberships<PeerId>,
    registry: Registry,
    /// Connections whose owner is gone but whose socket or timer is still
    /// live. Released when the last completion arrives.
    parked: HashMap<ConnId, OwnedConnection>,
    limits: LimitsConfig,
    now: Timestamp,
    me: PeerId,
    users: usize,
    servers: usize,
    env: E,
}

impl<E: Collaborators> Peers<E> {
    pub fn new(config: &ParleyConfig, env: E) -> Self {
        Self::with_clock(config, env, now_secs())
    }

    /// Builds the pools, prewarms them and links this server's own identity
    /// as the registry sentinel.
    pub fn with_clock(config: &ParleyConfig, env: E, now: Timestamp) -> Self {
        let prewarm = config.pools.max_connections;
        let mut peers: Pool<Peer> = Pool::with_prewarm(prewarm);
        let conns: Pool<Connection> = Pool::with_prewarm(prewarm);

        let me = PeerId(peers.acquire());
        {
            let peer = peer_entry(&mut peers, me);
            peer.liveness = Liveness::Live;
            peer.status = Status::Me;
            peer.name = config.server.name.clone();
            peer.username = "unknown".to_string();
            peer.hnext = Some(me);
            peer.from = Some(me);
            peer.first_time = now;
            peer.last_time = now;
            peer.since = now;
        }
        let mut registry = Registry::new();
        registry.link_sentinel(&mut peers, me);

        tracing::info!(prewarm, server = %config.server.name, "peer pools initialised");

        Self {
            peers,
            conns,
            links: LinkPool::new(),
            memberships: Memberships::new(),
            registry,
            parked: HashMap::new(),
            limits: config.limits.clone(),
            now,
            me,
            users: 0,
            servers: 0,
            env,
        }
    }

    // ── Clock ─────────────────────────────────────────────────────────────────

    pub fn now(&self) -> Timestamp {
        self.now
    }

    /// Advances the cached clock. The event loop calls this once per turn.
    pub fn tick(&mut self, now: Timestamp) {
        self.now = now;
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    /// This server's own identity.
    pub fn me(&self) -> PeerId {
        self.me
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut E {
        &mut self.env
    }

    pub fn peer(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(id.0)
    }

    pub fn peer_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(id.0)
    }

    pub fn connection(&self, id: ConnId) -> Option<&Connection> {
        self.conns.get(id.0)
    }

    pub fn connection_mut(&mut self, id: ConnId) -> Option<&mut Connection> {
        self.conns.get_mut(id.0)
    }

    /// Connection a peer talks through, owned or borrowed.
    pub fn connection_of(&self, id: PeerId) -> Option<ConnId> {
        self.peer(id).and_then(Peer::connection)
    }

    /// Live peers, newest first, ending with this server.
    pub fn iter(&self) -> registry::Iter<'_> {
        self.registry.iter(&self.peers)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn is_linked(&self, id: PeerId) -> bool {
        self.registry.is_linked(&self.peers, id)
    }

    pub fn links(&self) -> &LinkPool<PeerId> {
        &self.links
    }

    pub fn links_mut(&mut self) -> &mut LinkPool<PeerId> {
        &mut self.links
    }

    pub fn memberships(&self) -> &Memberships<PeerId> {
        &self.memberships
    }

    pub fn memberships_mut(&mut self) -> &mut Memberships<PeerId> {
        &mut self.memberships
    }

    /// Connections waiting on socket or timer completions.
    pub fn parked(&self) -> usize {
        self.parked.len()
    }

    pub fn is_parked(&self, id: ConnId) -> bool {
        self.parked.contains_key(&id)
    }

    /// Walks the whole registry checking its links. Expensive.
    pub fn verify(&self) {
        self.registry.verify(&self.peers);
    }

    // ── Connections ───────────────────────────────────────────────────────────

    /// Takes a connection off the pool and initialises it. The result has no
    /// owner yet; the caller attaches one or hands it back through
    /// [`Peers::free_connection`].
    pub fn create_local_connection(&mut self) -> OwnedConnection {
        let id = ConnId(self.conns.acquire());
        let conn = conn_entry(&mut self.conns, id);
        crate::invariant!(
            !conn.liveness.is_live(),
            "connection {:?} came off the pool live",
            id
        );
        conn.init(self.now, &self.limits);
        OwnedConnection::new(id)
    }

    /// Releases a connection that never got an owner or whose owner was
    /// detached. `None` is a no-op. A socket or timer still registered is
    /// cancelled first and the connection parked until it completes.
    pub fn free_connection(&mut self, conn: impl Into<Option<OwnedConnection>>) {
        let Some(owned) = conn.into() else {
            return;
        };
        let entry = conn_entry(&mut self.conns, owned.id());
        crate::invariant!(
            entry.owner.is_none(),
            "connection {:?} freed while owned by {:?}",
            owned.id(),
            entry.owner
        );
        self.release_or_park(owned);
    }

    /// The event layer registered the connection's socket.
    pub fn socket_registered(&mut self, conn: ConnId) {
        self.advance(conn, TeardownEvent::SocketRegistered);
    }

    /// The connection's timer was armed.
    pub fn timer_armed(&mut self, conn: ConnId) {
        self.advance(conn, TeardownEvent::TimerArmed);
    }

    /// The event layer has dropped the socket registration.
    pub fn socket_released(&mut self, conn: ConnId) {
        self.advance(conn, TeardownEvent::SocketReleased);
    }

    /// The timer fired or its cancellation completed.
    pub fn timer_released(&mut self, conn: ConnId) {
        self.advance(conn, TeardownEvent::TimerReleased);
    }

    /// Single transition point of the deferred-teardown machine. A parked
    /// connection is released on the transition that reaches `Idle`.
    fn advance(&mut self, id: ConnId, event: TeardownEvent) {
        let Some(conn) = self.conns.get_mut(id.0) else {
            tracing::warn!(conn = ?id, ?event, "teardown event for released connection");
            return;
        };

        if matches!(
            event,
            TeardownEvent::SocketRegistered | TeardownEvent::TimerArmed
        ) {
            crate::invariant!(
                !self.parked.contains_key(&id),
                "{:?} on connection {:?} after its owner left",
                event,
                id
            );
        }

        conn.teardown = conn.teardown.on(event);
        match event {
            TeardownEvent::TimerArmed => conn.timer.arm(),
            TeardownEvent::TimerReleased => conn.timer.finish(),
            TeardownEvent::SocketRegistered | TeardownEvent::SocketReleased => {}
        }
        tracing::trace!(conn = ?id, ?event, state = ?conn.teardown, "teardown transition");

        if conn.teardown.is_idle() && conn.owner.is_none() {
            if let Some(owned) = self.parked.remove(&id) {
                self.dealloc_connection(owned);
            }
        }
    }

    /// Detaches the owner and releases the connection: immediately when
    /// nothing is outstanding, otherwise queue the cancellations and park it.
    fn release_or_park(&mut self, owned: OwnedConnection) {
        let id = owned.id();
        let conn = conn_entry(&mut self.conns, id);
        conn.owner = None;

        crate::invariant!(
            !conn.timer.is_queued() || conn.teardown.timer_pending(),
            "connection {:?} has a queued timer the teardown state does not know about",
            id
        );

        if conn.teardown.is_idle() && !conn.timer.is_active() {
            self.dealloc_connection(owned);
            return;
        }

        let socket = conn.teardown.socket_pending();
        let timer = conn.teardown.timer_pending();
        if timer {
            conn.timer.cancel();
        }
        let state = conn.teardown;

        if socket {
            self.env.queue_socket_cancel(id);
        }
        if timer {
            self.env.queue_timer_cancel(id);
        }
        tracing::debug!(conn = ?id, ?state, "connection parked until cancellations complete");
        self.parked.insert(id, owned);
    }

    fn dealloc_connection(&mut self, owned: OwnedConnection) {
        let id = owned.into_id();
        let conn = conn_entry(&mut self.conns, id);
        crate::invariant!(
            conn.liveness.is_live(),
            "connection {:?} released twice",
            id
        );
        crate::invariant!(
            conn.owner.is_none(),
            "connection {:?} released while owned by {:?}",
            id,
            conn.owner
        );
        crate::invariant!(
            !conn.timer.is_active() && !conn.timer.is_queued(),
            "connection {:?} released with its timer queued",
            id
        );
        crate::invariant!(
            conn.teardown.is_idle(),
            "connection {:?} released in teardown state {:?}",
            id,
            conn.teardown
        );

        tracing::debug!(conn = ?id, fd = conn.fd(), "deallocating connection");
        conn.drain();
        conn.liveness = Liveness::Dormant;
        self.conns.release(id.0);
    }

    // ── Peers ─────────────────────────────────────────────────────────────────

    /// Allocates a peer identity.
    ///
    /// Without an introducer the peer is directly connected and gets a fresh
    /// connection it owns. With one, it shares the introducer's connection
    /// as a read-only back-reference.
    pub fn make_client(&mut self, from: Option<PeerId>, status: Status) -> PeerId {
        let introduced = from.map(|via| {
            let introducer = live_peer(&self.peers, via);
            match &introducer.conn {
                Some(conn) => (conn.id(), introducer.from.unwrap_or(via)),
                None => crate::fatal!("introducer {:?} has no connection", via),
            }
        });

        let id = PeerId(self.peers.acquire());
        let now = self.now;

        let (conn, origin) = match introduced {
            None => {
                let owned = self.create_local_connection();
                conn_entry(&mut self.conns, owned.id()).owner = Some(id);
                (ConnRef::Owned(owned), id)
            }
            Some((conn, origin)) => (ConnRef::Borrowed(conn), origin),
        };
        let conn_id = conn.id();
        let local = conn.is_owner();

        let peer = peer_entry(&mut self.peers, id);
        crate::invariant!(
            !peer.liveness.is_live(),
            "peer {:?} came off the pool live",
            id
        );
        if local {
            peer.first_time = now;
            peer.last_time = now;
            peer.since = now;
            peer.last_nick = now;
            peer.registration = Registration::INIT;
        }
        peer.from = Some(origin);
        peer.conn = Some(conn);
        peer.liveness = Liveness::Live;
        peer.status = status;
        peer.hnext = Some(id);
        peer.username = "unknown".to_string();

        tracing::debug!(peer = ?id, conn = ?conn_id, local, "client allocated");
        id
    }

    /// Links a peer into the registry.
    pub fn add_client_to_list(&mut self, id: PeerId) {
        live_peer(&self.peers, id);
        self.registry.link(&mut self.peers, id);
    }

    /// Full exit path: history, unlink, extensions, then release.
    pub fn remove_client_from_list(&mut self, id: PeerId) {
        crate::invariant!(id != self.me, "attempt to remove the local server");

        let peer = live_peer(&self.peers, id);
        if peer.is_user() && peer.user().is_some() {
            self.env.record_disconnect(id, peer);
        }

        self.registry.unlink(&mut self.peers, id);
        self.release_extension(id);
        self.free_client(id);
    }

    /// Releases a peer identity that is already off the registry.
    pub fn free_client(&mut self, id: PeerId) {
        crate::invariant!(id != self.me, "attempt to free the local server");
        let linked = self.registry.is_linked(&self.peers, id);

        let peer = live_peer(&self.peers, id);
        crate::invariant!(
            peer.hnext == Some(id),
            "peer {:?} freed while still on a hash chain",
            id
        );
        crate::invariant!(
            !linked && peer.prev.is_none() && peer.next.is_none(),
            "peer {:?} freed while still in the registry",
            id
        );
        tracing::debug!(peer = ?id, name = %peer.name, conn = ?peer.connection(), "freeing client");

        self.release_extension(id);

        let peer = peer_entry(&mut self.peers, id);
        let auth = peer.auth.take();
        let conn = peer.conn.take();
        peer.from = None;
        peer.liveness = Liveness::Dormant;

        if let Some(auth) = auth {
            self.env.destroy_auth_request(auth);
        }
        if let Some(ConnRef::Owned(owned)) = conn {
            self.release_or_park(owned);
        }
        self.peers.release(id.0);
    }

    /// Attaches a user record, or returns the one already there.
    pub fn make_user(&mut self, id: PeerId) -> &mut UserExt {
        let peer = live_peer_mut(&mut self.peers, id);
        if peer.ext == Extension::None {
            peer.ext = Extension::User(Box::default());
            self.users += 1;
        }
        match &mut peer.ext {
            Extension::User(user) => &mut **user,
            _ => crate::fatal!("peer {:?} is a server; cannot attach a user record", id),
        }
    }

    /// Attaches a server record, or returns the one already there.
    pub fn make_server(&mut self, id: PeerId) -> &mut ServerExt {
        let peer = live_peer_mut(&mut self.peers, id);
        if peer.ext == Extension::None {
            peer.ext = Extension::Server(Box::default());
            self.servers += 1;
        }
        match &mut peer.ext {
            Extension::Server(serv) => &mut **serv,
            _ => crate::fatal!("peer {:?} is a user; cannot attach a server record", id),
        }
    }

    /// Detaches and releases whatever extension the peer carries.
    fn release_extension(&mut self, id: PeerId) {
        let ext = std::mem::take(&mut live_peer_mut(&mut self.peers, id).ext);
        match ext {
            Extension::None => {}
            Extension::User(user) => {
                if let Some(server) = user.server.filter(|&server| server != id) {
                    self.clear_numeric_slot(server, id);
                }
                self.users -= 1;
                self.env.release_user(user);
            }
            Extension::Server(mut serv) => {
                if let Some(user) = serv.user.take() {
                    self.env.release_user(user);
                }
                self.servers -= 1;
            }
        }
    }

    /// Drops `id` from its server's numeric client table.
    fn clear_numeric_slot(&mut self, server: PeerId, id: PeerId) {
        let Some(serv) = self.peers.get_mut(server.0).and_then(Peer::server_mut) else {
            return;
        };
        for slot in serv.client_list.iter_mut().filter(|slot| **slot == Some(id)) {
            *slot = None;
        }
    }

    // ── Diagnostics ───────────────────────────────────────────────────────────

    /// Objects in use per kind and the memory they hold.
    pub fn list_info(&self) -> ListInfo {
        ListInfo {
            clients: Usage::of::<Peer>(self.peers.in_use()),
            connections: Usage::of::<Connection>(self.conns.in_use()),
            users: Usage::of::<UserExt>(self.users),
            servers: Usage::of::<ServerExt>(self.servers),
            links: Usage::of::<Link<PeerId>>(self.links.stats().in_use),
            memberships: Usage::new(
                self.memberships.in_use(),
                Memberships::<PeerId>::cell_size(),
            ),
            parked: self.parked.len(),
            pools: PoolCounters {
                peers: self.peers.stats(),
                connections: self.conns.stats(),
                links: self.links.stats(),
            },
        }
    }
}

fn live_peer(peers: &Pool<Peer>, id: PeerId) -> &Peer {
    match peers.get(id.0) {
        Some(peer) if peer.liveness.is_live() => peer,
        _ => crate::fatal!("peer {:?} is not live", id),
    }
}

fn live_peer_mut(peers: &mut Pool<Peer>, id: PeerId) -> &mut Peer {
    match peers.get_mut(id.0) {
        Some(peer) if peer.liveness.is_live() => peer,
        _ => crate::fatal!("peer {:?} is not live", id),
    }
}

fn peer_entry(peers: &mut Pool<Peer>, id: PeerId) -> &mut Peer {
    match peers.get_mut(id.0) {
        Some(peer) => peer,
        None => crate::fatal!("stale peer handle {:?}", id),
    }
}

fn conn_entry(conns: &mut Pool<Connection>, id: ConnId) -> &mut Connection {
    match conns.get_mut(id.0) {
        Some(conn) => conn,
        None => crate::fatal!("stale connection handle {:?}", id),
    }
}
