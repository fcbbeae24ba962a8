//! parley-peers integration tests.
//!
//! Drives the peer core the way the daemon does, through [`Peers`], with a
//! recording stand-in for the event layer, timer subsystem and history.
//! Completions are delivered by hand so every interleaving is explicit.
//!
//!   cargo test --test integration

use parley_core::config::ParleyConfig;
use parley_peers::{
    AuthLayer, AuthRequest, ConnId, Peer, PeerId, Peers, SessionHistory, SocketLayer, Status,
    TimerLayer, UserExt, UserLayer,
};

mod churn;
mod lifecycle;
mod lists;
mod sharing;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const SERVER_NAME: &str = "irc.example.net";

/// Every call the core made outward, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SocketCancel(ConnId),
    TimerCancel(ConnId),
    Signoff(String),
    AuthDestroyed(u64),
    UserReleased(String),
}

#[derive(Debug, Default)]
pub struct Recorder {
    pub calls: Vec<Call>,
}

impl Recorder {
    pub fn signoffs(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Signoff(nick) => Some(nick.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &Call) -> usize {
        self.calls.iter().filter(|call| *call == wanted).count()
    }
}

impl SocketLayer for Recorder {
    fn queue_socket_cancel(&mut self, conn: ConnId) {
        self.calls.push(Call::SocketCancel(conn));
    }
}

impl TimerLayer for Recorder {
    fn queue_timer_cancel(&mut self, conn: ConnId) {
        self.calls.push(Call::TimerCancel(conn));
    }
}

impl SessionHistory for Recorder {
    fn record_disconnect(&mut self, _id: PeerId, peer: &Peer) {
        self.calls.push(Call::Signoff(peer.name.clone()));
    }
}

impl AuthLayer for Recorder {
    fn destroy_auth_request(&mut self, auth: AuthRequest) {
        self.calls.push(Call::AuthDestroyed(auth.token));
    }
}

impl UserLayer for Recorder {
    fn release_user(&mut self, user: Box<UserExt>) {
        self.calls.push(Call::UserReleased(user.host));
    }
}

pub fn config(max_connections: usize) -> ParleyConfig {
    let mut config = ParleyConfig::default();
    config.server.name = SERVER_NAME.to_string();
    config.pools.max_connections = max_connections;
    config
}

pub fn core() -> Peers<Recorder> {
    Peers::with_clock(&config(8), Recorder::default(), 1_700_000_000)
}

/// A directly connected client, listed, with its socket registered.
pub fn connect(peers: &mut Peers<Recorder>) -> (PeerId, ConnId) {
    let id = peers.make_client(None, Status::Unknown);
    peers.add_client_to_list(id);
    let conn = peers.connection_of(id).expect("local client has a connection");
    peers.socket_registered(conn);
    (id, conn)
}

/// Completes registration for `id` as `nick`.
pub fn register(peers: &mut Peers<Recorder>, id: PeerId, nick: &str) {
    let host = format!("{nick}.users.example.net");
    peers.make_user(id).host = host;
    let peer = peers.peer_mut(id).expect("peer is live");
    peer.name = nick.to_string();
    peer.status = Status::User;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn test_fresh_core_holds_only_the_local_server() {
    let peers = core();
    let listed: Vec<_> = peers.iter().map(|(_, peer)| peer.name.clone()).collect();
    assert_eq!(listed, vec![SERVER_NAME.to_string()]);

    let info = peers.list_info();
    assert_eq!(info.clients.in_use, 1);
    assert_eq!(info.connections.in_use, 0);
    assert_eq!(info.pools.peers.allocated, 8);
    assert_eq!(info.pools.connections.free, 8);
    peers.verify();
}
