use crate::*;

/// Many clients come and go with completions arriving in mixed order. The
/// registry stays consistent and every slot ends up back on its free stack.
#[test]
fn test_churn_returns_every_slot() {
    let mut peers = Peers::with_clock(&config(4), Recorder::default(), 0);
    let mut pending_sockets = Vec::new();
    let mut pending_timers = Vec::new();

    for round in 0..5 {
        let mut round_peers = Vec::new();
        for n in 0..6 {
            let (id, conn) = connect(&mut peers);
            if n % 2 == 0 {
                peers.timer_armed(conn);
                pending_timers.push(conn);
            }
            register(&mut peers, id, &format!("user{round}_{n}"));
            round_peers.push((id, conn));
        }
        peers.verify();

        for (id, conn) in round_peers {
            peers.remove_client_from_list(id);
            pending_sockets.push(conn);
        }
        peers.verify();

        // Timers first on even rounds, sockets first on odd ones.
        if round % 2 == 0 {
            pending_timers.drain(..).for_each(|conn| peers.timer_released(conn));
            pending_sockets.drain(..).for_each(|conn| peers.socket_released(conn));
        } else {
            pending_sockets.drain(..).for_each(|conn| peers.socket_released(conn));
            pending_timers.drain(..).for_each(|conn| peers.timer_released(conn));
        }
        assert_eq!(peers.parked(), 0);
    }

    let info = peers.list_info();
    assert_eq!(info.clients.in_use, 1);
    assert_eq!(info.connections.in_use, 0);
    assert_eq!(info.users.in_use, 0);
    // Growth past the prewarmed four happened once; slots were reused after.
    assert_eq!(info.pools.connections.allocated, 6);
    assert_eq!(info.pools.peers.allocated, 7);
    assert_eq!(peers.env().signoffs().len(), 30);
}

#[test]
fn test_list_info_report_shape() {
    let mut peers = core();
    let (id, _) = connect(&mut peers);
    register(&mut peers, id, "gina");

    let info = peers.list_info();
    let json = info.to_json();
    assert_eq!(json["clients"]["in_use"], 2);
    assert_eq!(json["users"]["in_use"], 1);
    assert!(json["total"]["bytes"].as_u64().unwrap() > 0);
    assert_eq!(json["parked"], serde_json::json!(0));
    assert_eq!(
        json["pools"]["connections"],
        serde_json::json!({ "allocated": 8, "in_use": 1, "free": 7 })
    );

    let text = info.to_string();
    assert!(text.contains("Clients: inuse: 2("));
    assert!(text.contains("Users: inuse: 1("));
    assert!(text.lines().last().unwrap().starts_with("Total: inuse"));
}
