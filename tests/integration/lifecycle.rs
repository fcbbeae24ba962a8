use crate::*;

use parley_peers::{Teardown, TimerState};

/// Client connects, registers and quits with nothing outstanding: the
/// connection goes back to the pool in the same call.
#[test]
fn test_quit_with_idle_connection() {
    let mut peers = core();
    let id = peers.make_client(None, Status::Unknown);
    peers.add_client_to_list(id);
    register(&mut peers, id, "alice");
    let conn = peers.connection_of(id).unwrap();

    peers.remove_client_from_list(id);

    assert!(peers.peer(id).is_none());
    assert!(peers.connection(conn).is_none());
    assert_eq!(peers.env().signoffs(), vec!["alice"]);
    assert_eq!(peers.list_info().connections.in_use, 0);
    assert_eq!(peers.parked(), 0);
    peers.verify();
}

/// Socket still registered at exit: the peer goes immediately, the
/// connection waits for the event layer.
#[test]
fn test_exit_with_socket_registered() {
    let mut peers = core();
    let (id, conn) = connect(&mut peers);
    register(&mut peers, id, "bob");

    peers.remove_client_from_list(id);

    assert!(peers.peer(id).is_none());
    assert!(!peers.iter().any(|(listed, _)| listed == id));
    assert!(peers.is_parked(conn));
    assert_eq!(peers.env().count(&Call::SocketCancel(conn)), 1);
    assert_eq!(
        peers.connection(conn).unwrap().teardown(),
        Teardown::SocketPending
    );

    peers.socket_released(conn);
    assert!(peers.connection(conn).is_none());
    assert_eq!(peers.parked(), 0);
}

/// Only the registration timer outstanding at exit: no socket cancel, and
/// the timer completion releases the connection.
#[test]
fn test_exit_with_only_timer_pending() {
    let mut peers = core();
    let id = peers.make_client(None, Status::Unknown);
    peers.add_client_to_list(id);
    let conn = peers.connection_of(id).unwrap();
    peers.timer_armed(conn);

    peers.remove_client_from_list(id);

    assert!(peers.peer(id).is_none());
    assert!(peers.is_parked(conn));
    assert_eq!(
        peers.connection(conn).unwrap().teardown(),
        Teardown::TimerPending
    );
    assert_eq!(
        peers.connection(conn).unwrap().timer().state(),
        TimerState::Cancelling
    );
    assert_eq!(peers.env().count(&Call::TimerCancel(conn)), 1);
    assert_eq!(peers.env().count(&Call::SocketCancel(conn)), 0);

    peers.timer_released(conn);
    assert!(peers.connection(conn).is_none());
    assert_eq!(peers.parked(), 0);
    peers.verify();
}

/// A connection created before any peer claims it, then dropped while its
/// socket is still registered, waits for the event layer like any other.
#[test]
fn test_unclaimed_connection_with_socket_registered() {
    let mut peers = core();
    let owned = peers.create_local_connection();
    let conn = owned.id();
    peers.socket_registered(conn);

    peers.free_connection(owned);
    assert!(peers.is_parked(conn));
    assert_eq!(peers.env().calls, vec![Call::SocketCancel(conn)]);

    peers.socket_released(conn);
    assert!(peers.connection(conn).is_none());
    assert_eq!(peers.list_info().connections.in_use, 0);
    assert_eq!(peers.parked(), 0);
}

/// Both handles outstanding, timer completes first.
#[test]
fn test_both_pending_timer_first() {
    let mut peers = core();
    let (id, conn) = connect(&mut peers);
    peers.timer_armed(conn);

    peers.remove_client_from_list(id);
    assert_eq!(
        peers.connection(conn).unwrap().teardown(),
        Teardown::BothPending
    );
    assert_eq!(
        peers.connection(conn).unwrap().timer().state(),
        TimerState::Cancelling
    );
    assert_eq!(peers.env().count(&Call::SocketCancel(conn)), 1);
    assert_eq!(peers.env().count(&Call::TimerCancel(conn)), 1);

    peers.timer_released(conn);
    assert!(peers.connection(conn).is_some());
    peers.socket_released(conn);
    assert!(peers.connection(conn).is_none());
}

/// Both handles outstanding, socket completes first.
#[test]
fn test_both_pending_socket_first() {
    let mut peers = core();
    let (id, conn) = connect(&mut peers);
    peers.timer_armed(conn);
    peers.remove_client_from_list(id);

    peers.socket_released(conn);
    assert_eq!(
        peers.connection(conn).unwrap().teardown(),
        Teardown::TimerPending
    );
    peers.timer_released(conn);
    assert!(peers.connection(conn).is_none());
    assert_eq!(peers.parked(), 0);
}

/// A timer that fired on its own while the peer was still around leaves
/// nothing to cancel at exit.
#[test]
fn test_timer_completed_before_exit() {
    let mut peers = core();
    let (id, conn) = connect(&mut peers);
    peers.timer_armed(conn);
    peers.timer_released(conn);

    peers.remove_client_from_list(id);
    assert_eq!(peers.env().count(&Call::TimerCancel(conn)), 0);
    assert_eq!(peers.env().count(&Call::SocketCancel(conn)), 1);
}

/// Only registered users leave a history entry, exactly once each.
#[test]
fn test_history_recorded_once_per_registered_user() {
    let mut peers = core();
    let (alice, _) = connect(&mut peers);
    register(&mut peers, alice, "alice");
    let (unregistered, _) = connect(&mut peers);
    peers.peer_mut(unregistered).unwrap().name = "ghost".into();

    peers.remove_client_from_list(unregistered);
    peers.remove_client_from_list(alice);

    assert_eq!(peers.env().signoffs(), vec!["alice"]);
    assert_eq!(
        peers
            .env()
            .count(&Call::UserReleased("alice.users.example.net".into())),
        1
    );
}

/// History is taken before the peer leaves the registry and before its
/// user record is released.
#[test]
fn test_exit_order() {
    let mut peers = core();
    let (id, conn) = connect(&mut peers);
    register(&mut peers, id, "carol");
    peers.peer_mut(id).unwrap().attach_auth(AuthRequest {
        started: 0,
        token: 42,
    });

    peers.remove_client_from_list(id);

    assert_eq!(
        peers.env().calls,
        vec![
            Call::Signoff("carol".into()),
            Call::UserReleased("carol.users.example.net".into()),
            Call::AuthDestroyed(42),
            Call::SocketCancel(conn),
        ]
    );
}

/// A slot coming back off the pool carries nothing from its previous
/// occupant.
#[test]
fn test_recycled_objects_start_clean() {
    let mut peers = core();
    let (first, first_conn) = connect(&mut peers);
    register(&mut peers, first, "dave");
    peers
        .connection_mut(first_conn)
        .unwrap()
        .recvq
        .extend_from_slice(b"PRIVMSG");
    peers.remove_client_from_list(first);
    peers.socket_released(first_conn);

    let second = peers.make_client(None, Status::Unknown);
    let peer = peers.peer(second).unwrap();
    assert_ne!(second, first);
    assert!(peer.name.is_empty());
    assert!(peer.user().is_none());
    assert!(peer.auth().is_none());
    assert!(peer.flags.is_empty());

    let conn = peers.connection(peers.connection_of(second).unwrap()).unwrap();
    assert!(conn.recvq.is_empty());
    assert!(conn.sendq.is_empty());
    assert_eq!(conn.teardown(), Teardown::Idle);
    assert_eq!(conn.timer().state(), TimerState::Inert);
    assert_eq!(conn.owner(), Some(second));
}

/// A stale handle no longer resolves once its slot has been reused.
#[test]
fn test_stale_handles_do_not_resolve() {
    let mut peers = core();
    let id = peers.make_client(None, Status::Unknown);
    let conn = peers.connection_of(id).unwrap();
    peers.free_client(id);

    let reused = peers.make_client(None, Status::Unknown);
    assert!(peers.peer(id).is_none());
    assert!(peers.connection(conn).is_none());
    assert!(peers.peer(reused).is_some());

    // Late completions for a released connection are ignored.
    peers.socket_released(conn);
    assert!(peers.peer(reused).is_some());
}

#[test]
#[should_panic(expected = "socket release without registration")]
fn test_spurious_completion_is_fatal() {
    let mut peers = core();
    let (_, conn) = connect(&mut peers);
    peers.socket_released(conn);
    peers.socket_released(conn);
}
