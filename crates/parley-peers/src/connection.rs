//! Transport-side object: one per directly connected peer.
//!
//! A `Connection` holds the descriptor, the send and receive queues, the
//! per-connection timer slot, the pending DNS reply and the listener it was
//! accepted on. Its lifetime is governed by the exclusive
//! [`OwnedConnection`] token; peers introduced over the link only ever see
//! a [`ConnId`].

use std::collections::VecDeque;
use std::net::IpAddr;
use std::os::fd::RawFd;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parley_core::Timestamp;

use crate::peer::PeerId;
use crate::pool::{Key, Liveness, Poolable};
use crate::teardown::{Teardown, TimerSlot};

/// Non-owning reference to a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub(crate) Key);

/// The one reference allowed to release a connection.
///
/// Only the peer manager can mint one, and releasing a connection consumes
/// it, so a borrowed [`ConnId`] can never trigger destruction.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "dropping an OwnedConnection leaks its pool slot"]
pub struct OwnedConnection(ConnId);

impl OwnedConnection {
    pub(crate) fn new(id: ConnId) -> Self {
        Self(id)
    }

    pub fn id(&self) -> ConnId {
        self.0
    }

    pub(crate) fn into_id(self) -> ConnId {
        self.0
    }
}

/// Which command table a connection's input goes through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Handler {
    #[default]
    Unregistered,
    Client,
}

/// Result of a completed DNS lookup, parked here until registration
/// consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsReply {
    pub hostname: String,
    pub addrs: Vec<IpAddr>,
}

/// A listening socket connections are accepted on. Reference counted:
/// the listener goes away when the last connection accepted on it (and
/// the accept loop) let go.
#[derive(Debug)]
pub struct Listener {
    pub addr: std::net::SocketAddr,
}

#[derive(Debug)]
pub struct Connection {
    pub(crate) liveness: Liveness,
    pub(crate) owner: Option<PeerId>,
    pub(crate) teardown: Teardown,
    pub(crate) timer: TimerSlot,
    fd: RawFd,
    pub sendq: VecDeque<Bytes>,
    pub recvq: BytesMut,
    dns_reply: Option<Box<DnsReply>>,
    listener: Option<Arc<Listener>>,
    pub next_nick: Timestamp,
    pub next_target: Timestamp,
    pub handler: Handler,
}

impl Default for Connection {
    fn default() -> Self {
        Self {
            liveness: Liveness::Dormant,
            owner: None,
            teardown: Teardown::Idle,
            timer: TimerSlot::default(),
            fd: -1,
            sendq: VecDeque::new(),
            recvq: BytesMut::new(),
            dns_reply: None,
            listener: None,
            next_nick: 0,
            next_target: 0,
            handler: Handler::Unregistered,
        }
    }
}

impl Poolable for Connection {
    const KIND: &'static str = "connection";

    fn liveness(&self) -> Liveness {
        self.liveness
    }
}

impl Connection {
    pub fn liveness(&self) -> Liveness {
        self.liveness
    }

    /// Peer this connection belongs to; `None` once that peer is gone.
    pub fn owner(&self) -> Option<PeerId> {
        self.owner
    }

    pub fn teardown(&self) -> Teardown {
        self.teardown
    }

    pub fn timer(&self) -> TimerSlot {
        self.timer
    }

    /// Descriptor, or -1 when none is attached.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Hands the descriptor to this connection. It is closed when the
    /// connection is released.
    pub fn attach_fd(&mut self, fd: RawFd) {
        crate::invariant!(self.fd < 0, "connection already owns fd {}", self.fd);
        self.fd = fd;
    }

    pub fn set_dns_reply(&mut self, reply: DnsReply) {
        self.dns_reply = Some(Box::new(reply));
    }

    pub fn dns_reply(&self) -> Option<&DnsReply> {
        self.dns_reply.as_deref()
    }

    pub fn take_dns_reply(&mut self) -> Option<DnsReply> {
        self.dns_reply.take().map(|reply| *reply)
    }

    pub fn set_listener(&mut self, listener: Arc<Listener>) {
        self.listener = Some(listener);
    }

    pub fn listener(&self) -> Option<&Arc<Listener>> {
        self.listener.as_ref()
    }

    /// Queues one outbound message.
    pub fn send(&mut self, message: Bytes) {
        self.sendq.push_back(message);
    }

    pub fn sendq_len(&self) -> usize {
        self.sendq.iter().map(Bytes::len).sum()
    }

    /// Resets everything a fresh connection starts with. Called right after
    /// the slot comes off the pool.
    pub(crate) fn init(&mut self, now: Timestamp, limits: &parley_core::config::LimitsConfig) {
        self.liveness = Liveness::Live;
        self.fd = -1;
        self.teardown = Teardown::Idle;
        self.timer = TimerSlot::default();
        self.next_nick = now - limits.nick_delay_secs;
        self.next_target = now - limits.target_delay_secs * (limits.start_targets - 1);
        self.handler = Handler::Unregistered;
    }

    /// Frees every resource the connection holds: DNS reply, descriptor,
    /// queues and listener reference. Each step runs regardless of how the
    /// previous one went.
    pub(crate) fn drain(&mut self) {
        self.dns_reply = None;
        if self.fd >= 0 {
            // SAFETY: the descriptor was handed over through `attach_fd` and
            // nothing else closes it.
            let rc = unsafe { libc::close(self.fd) };
            if rc != 0 {
                tracing::debug!(
                    fd = self.fd,
                    error = %std::io::Error::last_os_error(),
                    "close failed during connection release"
                );
            }
            self.fd = -1;
        }
        self.sendq.clear();
        self.recvq.clear();
        self.listener = None;
    }
}
