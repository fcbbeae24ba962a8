//! Seams to the subsystems the peer core calls out to.
//!
//! The event layer, timer subsystem, whowas history, auth checker and user
//! bookkeeping all live outside this crate. [`crate::Peers`] is generic over
//! one value implementing every trait here; the daemon provides the real
//! one, tests provide recorders.

use crate::connection::ConnId;
use crate::peer::{AuthRequest, Peer, PeerId, UserExt};

pub trait SocketLayer {
    /// Asks the event layer to drop its registration for `conn`'s socket.
    /// Completion comes back later through [`crate::Peers::socket_released`].
    fn queue_socket_cancel(&mut self, conn: ConnId);
}

pub trait TimerLayer {
    /// Asks the timer subsystem to delete `conn`'s timer. Completion comes
    /// back later through [`crate::Peers::timer_released`].
    fn queue_timer_cancel(&mut self, conn: ConnId);
}

pub trait SessionHistory {
    /// Called once per registered user, just before it leaves the registry.
    fn record_disconnect(&mut self, id: PeerId, peer: &Peer);
}

pub trait AuthLayer {
    /// Discards an auth request whose client is being released.
    fn destroy_auth_request(&mut self, auth: AuthRequest) {
        drop(auth);
    }
}

pub trait UserLayer {
    /// Releases a user record detached from an exiting peer.
    fn release_user(&mut self, user: Box<UserExt>) {
        drop(user);
    }
}

/// Everything [`crate::Peers`] needs from the outside world.
pub trait Collaborators: SocketLayer + TimerLayer + SessionHistory + AuthLayer + UserLayer {}

impl<T> Collaborators for T where T: SocketLayer + TimerLayer + SessionHistory + AuthLayer + UserLayer {}
