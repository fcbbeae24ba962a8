//! Logical peer identity: a user, a server link, or this server itself.

use bitflags::bitflags;
use parley_core::Timestamp;

use crate::connection::{ConnId, OwnedConnection};
use crate::pool::{Key, Liveness, Poolable};

/// Handle to a pooled peer identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub(crate) Key);

/// What a peer is, as far as the protocol layer has worked out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub enum Status {
    /// Outbound server connect in progress.
    Connecting,
    /// Server handshake in progress.
    Handshake,
    /// This server.
    Me,
    /// Freshly accepted, nothing known yet.
    #[default]
    Unknown,
    UnknownUser,
    UnknownServer,
    Server,
    User,
}

bitflags! {
    /// Per-peer flag bits.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct PeerFlags: u32 {
        /// Socket is gone; the peer is waiting to be exited.
        const DEAD    = 1 << 0;
        /// Exit in progress.
        const CLOSING = 1 << 1;
    }
}

bitflags! {
    /// Registration steps a local client still owes.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct Registration: u8 {
        const NICK = 1 << 0;
        const USER = 1 << 1;
        /// What a newly accepted client starts with.
        const INIT = Self::NICK.bits() | Self::USER.bits();
    }
}

/// How a peer reaches its transport connection.
#[derive(Debug, PartialEq, Eq)]
pub enum ConnRef {
    /// Directly connected: this peer's release path frees the connection.
    Owned(OwnedConnection),
    /// Introduced over a server link: read-only back-reference.
    Borrowed(ConnId),
}

impl ConnRef {
    pub fn id(&self) -> ConnId {
        match self {
            ConnRef::Owned(owned) => owned.id(),
            ConnRef::Borrowed(id) => *id,
        }
    }

    pub fn is_owner(&self) -> bool {
        matches!(self, ConnRef::Owned(_))
    }
}

/// Record attached once a client completes registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserExt {
    pub host: String,
    pub realname: String,
    pub account: Option<String>,
    /// Server this user sits on.
    pub server: Option<PeerId>,
}

/// Record attached once a peer is recognised as a linked server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerExt {
    /// Last error seen on the link. Never empty.
    pub last_error: String,
    /// Nick of the operator who initiated the link, if any.
    pub by: String,
    /// Estimated link lag in milliseconds.
    pub lag: u32,
    /// User record of the operator who initiated the link.
    pub user: Option<Box<UserExt>>,
    /// Numeric-indexed table of clients behind this server.
    pub client_list: Vec<Option<PeerId>>,
}

impl Default for ServerExt {
    fn default() -> Self {
        Self {
            last_error: "<>".to_string(),
            by: String::new(),
            lag: 60_000,
            user: None,
            client_list: Vec::new(),
        }
    }
}

/// Optional per-peer extension. A peer is a user or a server, never both.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum Extension {
    #[default]
    None,
    User(Box<UserExt>),
    Server(Box<ServerExt>),
}

/// Handle for an ident/DNS check still running on a fresh connection.
#[derive(Debug, PartialEq, Eq)]
pub struct AuthRequest {
    pub started: Timestamp,
    pub token: u64,
}

#[derive(Debug, Default)]
pub struct Peer {
    pub(crate) liveness: Liveness,
    pub(crate) prev: Option<PeerId>,
    pub(crate) next: Option<PeerId>,
    pub(crate) hnext: Option<PeerId>,
    pub(crate) from: Option<PeerId>,
    pub(crate) conn: Option<ConnRef>,
    pub(crate) ext: Extension,
    pub(crate) auth: Option<AuthRequest>,
    pub status: Status,
    pub flags: PeerFlags,
    pub registration: Registration,
    pub name: String,
    pub username: String,
    pub first_time: Timestamp,
    pub last_time: Timestamp,
    pub since: Timestamp,
    pub last_nick: Timestamp,
}

impl Poolable for Peer {
    const KIND: &'static str = "peer";

    fn liveness(&self) -> Liveness {
        self.liveness
    }
}

impl Peer {
    pub fn liveness(&self) -> Liveness {
        self.liveness
    }

    pub fn prev(&self) -> Option<PeerId> {
        self.prev
    }

    pub fn next(&self) -> Option<PeerId> {
        self.next
    }

    /// Next peer on the same nick-hash chain; the peer itself when unhashed.
    pub fn hash_next(&self) -> Option<PeerId> {
        self.hnext
    }

    pub fn set_hash_next(&mut self, next: PeerId) {
        self.hnext = Some(next);
    }

    /// The directly connected peer this one arrived through.
    pub fn from(&self) -> Option<PeerId> {
        self.from
    }

    pub fn connection(&self) -> Option<ConnId> {
        self.conn.as_ref().map(ConnRef::id)
    }

    /// True for directly connected peers.
    pub fn is_local(&self) -> bool {
        self.conn.as_ref().is_some_and(ConnRef::is_owner)
    }

    pub fn is_me(&self) -> bool {
        self.status == Status::Me
    }

    pub fn is_user(&self) -> bool {
        self.status == Status::User
    }

    pub fn is_server(&self) -> bool {
        self.status == Status::Server
    }

    pub fn extension(&self) -> &Extension {
        &self.ext
    }

    pub fn user(&self) -> Option<&UserExt> {
        match &self.ext {
            Extension::User(user) => Some(user),
            _ => None,
        }
    }

    pub fn user_mut(&mut self) -> Option<&mut UserExt> {
        match &mut self.ext {
            Extension::User(user) => Some(user),
            _ => None,
        }
    }

    pub fn server(&self) -> Option<&ServerExt> {
        match &self.ext {
            Extension::Server(serv) => Some(serv),
            _ => None,
        }
    }

    pub fn server_mut(&mut self) -> Option<&mut ServerExt> {
        match &mut self.ext {
            Extension::Server(serv) => Some(serv),
            _ => None,
        }
    }

    pub fn attach_auth(&mut self, auth: AuthRequest) {
        self.auth = Some(auth);
    }

    pub fn auth(&self) -> Option<&AuthRequest> {
        self.auth.as_ref()
    }

    /// Removes a finished auth request so release does not discard it.
    pub fn take_auth(&mut self) -> Option<AuthRequest> {
        self.auth.take()
    }
}
