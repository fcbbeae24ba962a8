//! parley-peers — peer object lifecycle and pooling.
//!
//! Owns the three hot object kinds of the daemon (peer identities, transport
//! connections, link cells), the global registry of live peers, and the
//! deferred teardown that lets a connection outlive its peer until the
//! event layer and timer subsystem have let go of it.
//!
//! Everything here runs on one task. Asynchronous work happens elsewhere and
//! reports back through [`Peers::socket_released`] and
//! [`Peers::timer_released`].

/// Logs and panics. Used for broken invariants, which mean memory-safety
/// bugs in the caller; release builds abort on panic.
macro_rules! fatal {
    ($($arg:tt)+) => {{
        tracing::error!($($arg)+);
        panic!($($arg)+)
    }};
}
pub(crate) use fatal;

macro_rules! invariant {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::fatal!($($arg)+);
        }
    };
}
pub(crate) use invariant;

pub mod connection;
pub mod hooks;
pub mod lifecycle;
pub mod link;
pub mod membership;
pub mod peer;
pub mod pool;
pub mod registry;
pub mod stats;
pub mod teardown;

pub use connection::{ConnId, Connection, DnsReply, Handler, Listener, OwnedConnection};
pub use hooks::{AuthLayer, Collaborators, SessionHistory, SocketLayer, TimerLayer, UserLayer};
pub use lifecycle::Peers;
pub use link::{LinkId, LinkList, LinkPool};
pub use membership::{DLinkHead, DLinkId, Memberships};
pub use peer::{
    AuthRequest, ConnRef, Extension, Peer, PeerFlags, PeerId, Registration, ServerExt, Status,
    UserExt,
};
pub use pool::{Key, Liveness, Pool, PoolStats, Poolable};
pub use registry::Registry;
pub use stats::{ListInfo, PoolCounters, Usage};
pub use teardown::{Teardown, TeardownEvent, TimerSlot, TimerState};
