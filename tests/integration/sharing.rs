use crate::*;

use std::sync::Arc;

use parley_peers::{Listener, Teardown};

/// A server link and two users introduced over it.
fn linked_server(peers: &mut Peers<Recorder>) -> (PeerId, ConnId, [PeerId; 2]) {
    let (link, conn) = connect(peers);
    peers.peer_mut(link).unwrap().status = Status::Server;
    peers.make_server(link).by = "oper".into();

    let mut remote = [link; 2];
    for (slot, nick) in remote.iter_mut().zip(["erin", "frank"]) {
        let id = peers.make_client(Some(link), Status::User);
        peers.add_client_to_list(id);
        register(peers, id, nick);
        *slot = id;
    }
    (link, conn, remote)
}

#[test]
fn test_introduced_peers_share_the_link_connection() {
    let mut peers = core();
    let (link, conn, remote) = linked_server(&mut peers);

    for id in remote {
        let peer = peers.peer(id).unwrap();
        assert_eq!(peer.connection(), Some(conn));
        assert_eq!(peer.from(), Some(link));
        assert!(!peer.is_local());
    }
    assert_eq!(peers.connection(conn).unwrap().owner(), Some(link));
    assert_eq!(peers.list_info().connections.in_use, 1);
    peers.verify();
}

/// Remote users leaving never touch the shared connection.
#[test]
fn test_remote_exit_leaves_connection_alone() {
    let mut peers = core();
    let (link, conn, remote) = linked_server(&mut peers);

    for id in remote {
        peers.remove_client_from_list(id);
    }

    assert_eq!(peers.env().signoffs(), vec!["erin", "frank"]);
    assert_eq!(peers.env().count(&Call::SocketCancel(conn)), 0);
    let shared = peers.connection(conn).unwrap();
    assert_eq!(shared.owner(), Some(link));
    assert_eq!(shared.teardown(), Teardown::SocketPending);
    assert_eq!(peers.parked(), 0);
}

/// Users behind a link come off first; then the link itself, whose exit
/// releases the connection.
#[test]
fn test_netsplit_order() {
    let mut peers = core();
    let (link, conn, remote) = linked_server(&mut peers);

    for id in remote {
        peers.remove_client_from_list(id);
    }
    peers.remove_client_from_list(link);

    assert!(peers.is_parked(conn));
    assert_eq!(peers.env().count(&Call::SocketCancel(conn)), 1);
    assert_eq!(peers.list_info().servers.in_use, 0);

    peers.socket_released(conn);
    assert!(peers.connection(conn).is_none());
    assert_eq!(peers.iter().count(), 1);
    peers.verify();
}

/// The operator record hung off a server goes back through the user layer.
#[test]
fn test_server_operator_record_released() {
    let mut peers = core();
    let (link, _, remote) = linked_server(&mut peers);
    peers.make_server(link).user = Some(Box::new(UserExt {
        host: "oper.example.net".into(),
        ..UserExt::default()
    }));
    for id in remote {
        peers.remove_client_from_list(id);
    }

    peers.remove_client_from_list(link);
    assert_eq!(
        peers.env().count(&Call::UserReleased("oper.example.net".into())),
        1
    );
}

#[test]
fn test_server_record_defaults() {
    let mut peers = core();
    let (link, _) = connect(&mut peers);
    let serv = peers.make_server(link);
    assert_eq!(serv.last_error, "<>");
    assert_eq!(serv.lag, 60_000);
    assert!(serv.by.is_empty());
}

/// The listener lives as long as any connection accepted on it.
#[test]
fn test_listener_released_with_last_connection() {
    let mut peers = core();
    let listener = Arc::new(Listener {
        addr: "127.0.0.1:6667".parse().unwrap(),
    });

    let (a, a_conn) = connect(&mut peers);
    let (b, b_conn) = connect(&mut peers);
    for conn in [a_conn, b_conn] {
        peers
            .connection_mut(conn)
            .unwrap()
            .set_listener(listener.clone());
    }
    assert_eq!(Arc::strong_count(&listener), 3);

    peers.remove_client_from_list(a);
    // Parked connections still hold their reference.
    assert_eq!(Arc::strong_count(&listener), 3);
    peers.socket_released(a_conn);
    assert_eq!(Arc::strong_count(&listener), 2);

    peers.remove_client_from_list(b);
    peers.socket_released(b_conn);
    assert_eq!(Arc::strong_count(&listener), 1);
}

#[test]
#[should_panic(expected = "has no connection")]
fn test_introduction_through_local_server_is_fatal() {
    let mut peers = core();
    let me = peers.me();
    peers.make_client(Some(me), Status::User);
}
