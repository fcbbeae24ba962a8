//! Connects the peer core to the async runtime.
//!
//! Socket readers and registration timers run as tasks, each holding a
//! oneshot receiver. Queuing a cancellation fires the matching sender; the
//! task winds down and reports completion back over the core event channel.

use std::collections::{HashMap, VecDeque};

use tokio::sync::oneshot;

use parley_core::Timestamp;
use parley_peers::{AuthLayer, ConnId, Peer, PeerId, SessionHistory, SocketLayer, TimerLayer, UserLayer};

/// One remembered signoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhowasEntry {
    pub nick: String,
    pub username: String,
    pub host: String,
    pub realname: String,
    pub logoff: Timestamp,
}

pub struct Bridge {
    sockets: HashMap<ConnId, oneshot::Sender<()>>,
    timers: HashMap<ConnId, oneshot::Sender<()>>,
    whowas: VecDeque<WhowasEntry>,
    capacity: usize,
}

impl Bridge {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            sockets: HashMap::new(),
            timers: HashMap::new(),
            whowas: VecDeque::with_capacity(history_capacity),
            capacity: history_capacity,
        }
    }

    pub fn watch_socket(&mut self, conn: ConnId, cancel: oneshot::Sender<()>) {
        self.sockets.insert(conn, cancel);
    }

    pub fn watch_timer(&mut self, conn: ConnId, cancel: oneshot::Sender<()>) {
        self.timers.insert(conn, cancel);
    }

    /// Drops bookkeeping for a timer that has finished on its own.
    pub fn forget_timer(&mut self, conn: ConnId) {
        self.timers.remove(&conn);
    }

    pub fn forget_socket(&mut self, conn: ConnId) {
        self.sockets.remove(&conn);
    }

    /// Most recent signoffs for `nick`, newest first.
    pub fn whowas<'a>(&'a self, nick: &'a str) -> impl Iterator<Item = &'a WhowasEntry> + 'a {
        self.whowas
            .iter()
            .rev()
            .filter(move |entry| entry.nick.eq_ignore_ascii_case(nick))
    }

    pub fn history_len(&self) -> usize {
        self.whowas.len()
    }
}

impl SocketLayer for Bridge {
    fn queue_socket_cancel(&mut self, conn: ConnId) {
        match self.sockets.remove(&conn) {
            Some(cancel) => {
                if cancel.send(()).is_err() {
                    tracing::debug!(conn = ?conn, "socket reader already gone");
                }
            }
            None => tracing::warn!(conn = ?conn, "socket cancel for unknown reader"),
        }
    }
}

impl TimerLayer for Bridge {
    fn queue_timer_cancel(&mut self, conn: ConnId) {
        match self.timers.remove(&conn) {
            Some(cancel) => {
                if cancel.send(()).is_err() {
                    tracing::debug!(conn = ?conn, "timer already fired");
                }
            }
            None => tracing::debug!(conn = ?conn, "timer cancel after completion"),
        }
    }
}

impl SessionHistory for Bridge {
    fn record_disconnect(&mut self, id: PeerId, peer: &Peer) {
        if self.capacity == 0 {
            return;
        }
        let (host, realname) = peer
            .user()
            .map(|user| (user.host.clone(), user.realname.clone()))
            .unwrap_or_default();
        if self.whowas.len() == self.capacity {
            self.whowas.pop_front();
        }
        self.whowas.push_back(WhowasEntry {
            nick: peer.name.clone(),
            username: peer.username.clone(),
            host,
            realname,
            logoff: peer.last_time,
        });
        tracing::debug!(peer = ?id, nick = %peer.name, "recorded signoff");
    }
}

impl AuthLayer for Bridge {}

impl UserLayer for Bridge {}
