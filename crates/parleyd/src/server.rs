//! The core loop: owns every peer and connection and is the only task that
//! touches them.

use std::net::SocketAddr;
use std::os::fd::IntoRawFd;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};

use parley_core::config::ParleyConfig;
use parley_core::now_secs;
use parley_peers::{
    AuthRequest, ConnId, DnsReply, Handler, Listener, PeerFlags, PeerId, Peers, Registration,
    Status,
};

use crate::bridge::Bridge;
use crate::net;

/// Longest partial line a client may leave buffered.
const MAX_RECVQ: usize = 8192;

/// Everything the socket and timer tasks report back.
#[derive(Debug)]
pub enum CoreEvent {
    Accepted {
        stream: std::net::TcpStream,
        addr: SocketAddr,
    },
    Data {
        conn: ConnId,
        bytes: Bytes,
    },
    Eof {
        conn: ConnId,
        error: Option<String>,
    },
    SocketReleased(ConnId),
    TimerFired(ConnId),
    TimerReleased(ConnId),
}

pub struct Server {
    peers: Peers<Bridge>,
    listener: Arc<Listener>,
    events: mpsc::UnboundedSender<CoreEvent>,
    registration_timeout: Duration,
    description: String,
    next_auth_token: u64,
}

impl Server {
    pub fn new(
        config: &ParleyConfig,
        listener: Arc<Listener>,
        events: mpsc::UnboundedSender<CoreEvent>,
    ) -> Self {
        let bridge = Bridge::new(config.history.capacity);
        Self {
            peers: Peers::new(config, bridge),
            listener,
            events,
            registration_timeout: Duration::from_secs(config.network.registration_timeout_secs),
            description: config.server.description.clone(),
            next_auth_token: 0,
        }
    }

    pub fn peers(&self) -> &Peers<Bridge> {
        &self.peers
    }

    pub fn handle(&mut self, event: CoreEvent) {
        self.peers.tick(now_secs());
        match event {
            CoreEvent::Accepted { stream, addr } => self.accept(stream, addr),
            CoreEvent::Data { conn, bytes } => self.receive(conn, bytes),
            CoreEvent::Eof { conn, error } => {
                if let Some(id) = self.owner(conn) {
                    if let Some(peer) = self.peers.peer_mut(id) {
                        peer.flags.insert(PeerFlags::DEAD);
                    }
                    let reason = error.unwrap_or_else(|| "Connection closed".to_string());
                    self.exit_peer(id, &reason);
                }
            }
            CoreEvent::SocketReleased(conn) => {
                self.peers.env_mut().forget_socket(conn);
                self.peers.socket_released(conn);
            }
            CoreEvent::TimerFired(conn) => self.registration_expired(conn),
            CoreEvent::TimerReleased(conn) => {
                self.peers.env_mut().forget_timer(conn);
                self.peers.timer_released(conn);
            }
        }
    }

    fn accept(&mut self, stream: std::net::TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nonblocking(true) {
            tracing::warn!(%addr, error = %e, "could not make socket non-blocking");
            return;
        }

        let id = self.peers.make_client(None, Status::Unknown);
        let Some(conn) = self.peers.connection_of(id) else {
            return;
        };
        let fd = stream.into_raw_fd();
        if let Some(entry) = self.peers.connection_mut(conn) {
            entry.attach_fd(fd);
            entry.set_listener(self.listener.clone());
            entry.set_dns_reply(DnsReply {
                hostname: addr.ip().to_string(),
                addrs: vec![addr.ip()],
            });
        }

        self.next_auth_token += 1;
        let now = self.peers.now();
        if let Some(peer) = self.peers.peer_mut(id) {
            peer.attach_auth(AuthRequest {
                started: now,
                token: self.next_auth_token,
            });
        }
        self.peers.add_client_to_list(id);

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.peers.env_mut().watch_socket(conn, cancel_tx);
        tokio::spawn(net::read_loop(conn, fd, self.events.clone(), cancel_rx));
        self.peers.socket_registered(conn);

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.peers.env_mut().watch_timer(conn, cancel_tx);
        tokio::spawn(net::timer(
            conn,
            self.registration_timeout,
            self.events.clone(),
            cancel_rx,
        ));
        self.peers.timer_armed(conn);

        tracing::info!(peer = ?id, conn = ?conn, %addr, fd, "client connected");
    }

    fn receive(&mut self, conn: ConnId, bytes: Bytes) {
        let Some(id) = self.owner(conn) else {
            return;
        };
        let split = match self.peers.connection_mut(conn) {
            Some(entry) => {
                entry.recvq.extend_from_slice(&bytes);
                split_lines(&mut entry.recvq)
            }
            None => return,
        };
        let lines = match split {
            Ok(lines) => lines,
            Err(Flooded(buffered)) => {
                tracing::warn!(peer = ?id, conn = ?conn, buffered, "receive queue overflow");
                self.reply(conn, "ERROR :Excess Flood");
                self.flush(conn);
                self.exit_peer(id, "Excess Flood");
                return;
            }
        };
        let now = self.peers.now();
        if let Some(peer) = self.peers.peer_mut(id) {
            peer.last_time = now;
        }

        for line in lines {
            if line.is_empty() {
                continue;
            }
            if !self.peers.peer(id).is_some_and(|p| p.liveness().is_live()) {
                break;
            }
            self.command(id, conn, &line);
        }
        self.flush(conn);
    }

    fn command(&mut self, id: PeerId, conn: ConnId, line: &str) {
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        match verb.to_ascii_uppercase().as_str() {
            "NICK" => {
                let now = self.peers.now();
                if let Some(peer) = self.peers.peer_mut(id) {
                    peer.name = rest.trim_start_matches(':').to_string();
                    peer.registration.remove(Registration::NICK);
                    peer.last_nick = now;
                }
                self.try_register(id, conn);
            }
            "USER" => {
                let (params, realname) = rest.split_once(" :").unwrap_or((rest, ""));
                let username = params.split(' ').next().unwrap_or_default().to_string();
                if let Some(peer) = self.peers.peer_mut(id) {
                    peer.username = username;
                    peer.registration.remove(Registration::USER);
                }
                self.peers.make_user(id).realname = realname.to_string();
                self.try_register(id, conn);
            }
            "PING" => self.reply(conn, &format!("PONG {rest}")),
            "QUIT" => {
                let reason = rest.trim_start_matches(':');
                let reason = if reason.is_empty() { "Client quit" } else { reason };
                self.reply(conn, &format!("ERROR :Closing link ({reason})"));
                self.flush(conn);
                self.exit_peer(id, reason);
            }
            "WHOWAS" => {
                let nick = rest.split(' ').next().unwrap_or_default();
                let lines: Vec<String> = self
                    .peers
                    .env()
                    .whowas(nick)
                    .map(|w| format!("{} {} {} * :{}", w.nick, w.username, w.host, w.realname))
                    .collect();
                for line in &lines {
                    self.numeric(id, conn, 314, line);
                }
                self.numeric(id, conn, 369, &format!("{nick} :End of WHOWAS"));
            }
            "STATS" if rest.trim() == "z" => {
                let report = self.peers.list_info().to_string();
                for line in report.lines() {
                    self.numeric(id, conn, 249, &format!("z :{line}"));
                }
            }
            _ => self.numeric(id, conn, 421, &format!("{verb} :Unknown command")),
        }
    }

    /// Completes registration once both NICK and USER have arrived.
    fn try_register(&mut self, id: PeerId, conn: ConnId) {
        let ready = self
            .peers
            .peer(id)
            .is_some_and(|p| p.registration.is_empty() && p.status == Status::Unknown);
        if !ready {
            return;
        }

        let host = self
            .peers
            .connection_mut(conn)
            .and_then(|entry| entry.take_dns_reply())
            .map(|reply| reply.hostname);
        let nick = match self.peers.peer_mut(id) {
            Some(peer) => {
                peer.status = Status::User;
                if let Some(auth) = peer.take_auth() {
                    tracing::debug!(peer = ?id, token = auth.token, "auth check complete");
                }
                peer.name.clone()
            }
            None => return,
        };

        let me = self.peers.me();
        let user = self.peers.make_user(id);
        user.server = Some(me);
        if let Some(host) = host {
            user.host = host;
        }
        if let Some(entry) = self.peers.connection_mut(conn) {
            entry.handler = Handler::Client;
        }

        let server = self.server_name();
        self.numeric(id, conn, 1, &format!(":Welcome to {server}, {nick}"));
        let host = format!(":Your host is {server}, {}", self.description);
        self.numeric(id, conn, 2, &host);
        tracing::info!(peer = ?id, %nick, "client registered");
    }

    fn registration_expired(&mut self, conn: ConnId) {
        let Some(id) = self.owner(conn) else {
            return;
        };
        let registered = self
            .peers
            .peer(id)
            .is_some_and(|p| p.status == Status::User);
        if !registered {
            self.reply(conn, "ERROR :Registration timeout");
            self.flush(conn);
            self.exit_peer(id, "Registration timeout");
        }
    }

    fn exit_peer(&mut self, id: PeerId, reason: &str) {
        let Some(peer) = self.peers.peer_mut(id) else {
            return;
        };
        if peer.flags.contains(PeerFlags::CLOSING) {
            return;
        }
        peer.flags.insert(PeerFlags::CLOSING);
        let dead = peer.flags.contains(PeerFlags::DEAD);
        tracing::info!(peer = ?id, nick = %peer.name, reason, dead, "client exiting");
        self.peers.remove_client_from_list(id);
    }

    /// Disconnects every client. Connections then drain through the normal
    /// completion path.
    pub fn shutdown(&mut self) {
        let me = self.peers.me();
        let ids: Vec<PeerId> = self
            .peers
            .iter()
            .map(|(id, _)| id)
            .filter(|&id| id != me)
            .collect();
        tracing::info!(count = ids.len(), "disconnecting all clients");
        for id in ids {
            if let Some(conn) = self.peers.connection_of(id) {
                self.reply(conn, "ERROR :Server shutting down");
                self.flush(conn);
            }
            self.exit_peer(id, "Server shutting down");
        }
    }

    pub fn is_drained(&self) -> bool {
        self.peers.parked() == 0
    }

    pub fn report(&self) {
        let info = self.peers.list_info();
        tracing::info!(
            clients = info.clients.in_use,
            connections = info.connections.in_use,
            parked = info.parked,
            bytes = info.total().bytes,
            "pool usage"
        );
        tracing::debug!(report = %info.to_json(), "list info");
        if cfg!(debug_assertions) {
            self.peers.verify();
        }
    }

    fn owner(&self, conn: ConnId) -> Option<PeerId> {
        self.peers.connection(conn).and_then(|entry| entry.owner())
    }

    fn server_name(&self) -> String {
        self.peers
            .peer(self.peers.me())
            .map(|me| me.name.clone())
            .unwrap_or_default()
    }

    fn reply(&mut self, conn: ConnId, text: &str) {
        let line = format!(":{} {text}\r\n", self.server_name());
        if let Some(entry) = self.peers.connection_mut(conn) {
            entry.send(Bytes::from(line));
        }
    }

    /// Numeric replies carry the target nick, or `*` before one is set.
    fn numeric(&mut self, id: PeerId, conn: ConnId, code: u16, text: &str) {
        let target = match self.peers.peer(id).map(|p| p.name.as_str()) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => "*".to_string(),
        };
        self.reply(conn, &format!("{code:03} {target} {text}"));
    }

    fn flush(&mut self, conn: ConnId) {
        let Some(entry) = self.peers.connection_mut(conn) else {
            return;
        };
        let fd = entry.fd();
        while let Some(front) = entry.sendq.front_mut() {
            match net::write_fd(fd, front) {
                Ok(n) if n == front.len() => {
                    entry.sendq.pop_front();
                }
                Ok(n) => {
                    front.advance(n);
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::debug!(conn = ?conn, error = %e, "write failed");
                    entry.sendq.clear();
                    break;
                }
            }
        }
    }
}

/// A client left more than [`MAX_RECVQ`] bytes without a line break.
#[derive(Debug, PartialEq, Eq)]
struct Flooded(usize);

/// Splits complete lines off the front of `recvq`, leaving any partial line
/// buffered.
fn split_lines(recvq: &mut BytesMut) -> Result<Vec<String>, Flooded> {
    let mut lines = Vec::new();
    while let Some(pos) = recvq.iter().position(|&b| b == b'\n') {
        let line = recvq.split_to(pos + 1);
        lines.push(String::from_utf8_lossy(&line).trim_end().to_string());
    }
    if recvq.len() > MAX_RECVQ {
        return Err(Flooded(recvq.len()));
    }
    Ok(lines)
}
