//! Deferred-teardown state for connections.
//!
//! A connection can outlive its peer while the event layer still has its
//! socket registered or the timer subsystem still has its timer queued.
//! [`Teardown`] records which of those asynchronous handles are live; the
//! peer manager drives it with [`TeardownEvent`]s and releases the
//! connection on the transition that lands on `Idle` after the owning peer
//! has gone.

/// Outstanding asynchronous handles on a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub enum Teardown {
    #[default]
    Idle,
    SocketPending,
    TimerPending,
    BothPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownEvent {
    /// The socket was registered with the event layer.
    SocketRegistered,
    /// The per-connection timer was armed.
    TimerArmed,
    /// The event layer let go of the socket.
    SocketReleased,
    /// The timer fired or its cancellation completed.
    TimerReleased,
}

impl Teardown {
    fn from_parts(socket: bool, timer: bool) -> Self {
        match (socket, timer) {
            (false, false) => Teardown::Idle,
            (true, false) => Teardown::SocketPending,
            (false, true) => Teardown::TimerPending,
            (true, true) => Teardown::BothPending,
        }
    }

    pub fn socket_pending(self) -> bool {
        matches!(self, Teardown::SocketPending | Teardown::BothPending)
    }

    pub fn timer_pending(self) -> bool {
        matches!(self, Teardown::TimerPending | Teardown::BothPending)
    }

    pub fn is_idle(self) -> bool {
        self == Teardown::Idle
    }

    /// Applies one event. Registering a handle that is already live, or
    /// completing one that never was, is an invariant violation.
    pub fn on(self, event: TeardownEvent) -> Self {
        let (socket, timer) = (self.socket_pending(), self.timer_pending());
        match event {
            TeardownEvent::SocketRegistered => {
                crate::invariant!(!socket, "socket registered twice ({:?})", self);
                Self::from_parts(true, timer)
            }
            TeardownEvent::TimerArmed => {
                crate::invariant!(!timer, "timer armed twice ({:?})", self);
                Self::from_parts(socket, true)
            }
            TeardownEvent::SocketReleased => {
                crate::invariant!(socket, "socket release without registration ({:?})", self);
                Self::from_parts(false, timer)
            }
            TeardownEvent::TimerReleased => {
                crate::invariant!(timer, "timer release without arming ({:?})", self);
                Self::from_parts(socket, false)
            }
        }
    }
}

/// State of the per-connection timer as the timer subsystem sees it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimerState {
    /// Never armed, or done.
    #[default]
    Inert,
    /// Armed and on the timer queue.
    Armed,
    /// Deleted, waiting for the queue to drop it.
    Cancelling,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerSlot {
    state: TimerState,
}

impl TimerSlot {
    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TimerState::Armed
    }

    pub fn is_queued(&self) -> bool {
        matches!(self.state, TimerState::Armed | TimerState::Cancelling)
    }

    pub(crate) fn arm(&mut self) {
        self.state = TimerState::Armed;
    }

    pub(crate) fn cancel(&mut self) {
        if self.state == TimerState::Armed {
            self.state = TimerState::Cancelling;
        }
    }

    pub(crate) fn finish(&mut self) {
        self.state = TimerState::Inert;
    }
}
