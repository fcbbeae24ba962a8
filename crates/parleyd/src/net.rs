//! Socket and timer tasks feeding the core loop.

use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

use parley_peers::{ConnId, Listener};

use crate::server::CoreEvent;

const READ_CHUNK: usize = 4096;

/// Accepts connections and hands them to the core as plain std streams.
/// Holds a reference to the listener for as long as it runs.
pub async fn accept_loop(
    socket: TcpListener,
    listener: Arc<Listener>,
    events: mpsc::UnboundedSender<CoreEvent>,
) {
    tracing::info!(addr = %listener.addr, "accepting connections");
    loop {
        let (stream, addr) = match socket.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        let stream = match stream.into_std() {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(%addr, error = %e, "could not detach accepted socket");
                continue;
            }
        };
        if events.send(CoreEvent::Accepted { stream, addr }).is_err() {
            break;
        }
    }
}

/// Reads from a connection's descriptor until cancelled.
///
/// The descriptor belongs to the connection; this task only polls it. EOF
/// and read errors are reported once, after which the task idles until the
/// core cancels it. Every reader ends with exactly one `SocketReleased`.
pub async fn read_loop(
    conn: ConnId,
    fd: RawFd,
    events: mpsc::UnboundedSender<CoreEvent>,
    mut cancel: oneshot::Receiver<()>,
) {
    let io = match AsyncFd::with_interest(fd, Interest::READABLE) {
        Ok(io) => io,
        Err(e) => {
            tracing::warn!(conn = ?conn, fd, error = %e, "could not register socket");
            let _ = events.send(CoreEvent::Eof {
                conn,
                error: Some(e.to_string()),
            });
            let _ = cancel.await;
            let _ = events.send(CoreEvent::SocketReleased(conn));
            return;
        }
    };

    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let ready = tokio::select! {
            _ = &mut cancel => break,
            ready = io.readable() => ready,
        };
        let read = match ready {
            Ok(mut guard) => match guard.try_io(|inner| read_fd(*inner.get_ref(), &mut buf)) {
                Ok(read) => read,
                Err(_would_block) => continue,
            },
            Err(e) => Err(e),
        };
        let error = match read {
            Ok(0) => None,
            Ok(n) => {
                let bytes = Bytes::copy_from_slice(&buf[..n]);
                let _ = events.send(CoreEvent::Data { conn, bytes });
                continue;
            }
            Err(e) => Some(e.to_string()),
        };

        let _ = events.send(CoreEvent::Eof { conn, error });
        let _ = (&mut cancel).await;
        break;
    }
    drop(io);
    let _ = events.send(CoreEvent::SocketReleased(conn));
}

/// Fires once after `delay` unless cancelled first. Ends with exactly one
/// `TimerReleased` either way.
pub async fn timer(
    conn: ConnId,
    delay: Duration,
    events: mpsc::UnboundedSender<CoreEvent>,
    cancel: oneshot::Receiver<()>,
) {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {
            let _ = events.send(CoreEvent::TimerFired(conn));
        }
        _ = cancel => {}
    }
    let _ = events.send(CoreEvent::TimerReleased(conn));
}

fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: `buf` is valid for `buf.len()` bytes and the descriptor stays
    // open until this task reports `SocketReleased`.
    let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// Writes as much of `data` as the socket takes without blocking.
pub fn write_fd(fd: RawFd, data: &[u8]) -> io::Result<usize> {
    // SAFETY: `data` is valid for `data.len()` bytes; the caller owns `fd`.
    let n = unsafe { libc::write(fd, data.as_ptr().cast(), data.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}
