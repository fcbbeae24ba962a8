use crate::*;

use parley_peers::{DLinkHead, LinkId, LinkList};

/// Invite-style singly linked list of peers, drawn from the core's pool.
#[test]
fn test_invite_list_through_link_pool() {
    let mut peers = core();
    let (a, _) = connect(&mut peers);
    let (b, _) = connect(&mut peers);
    let (c, _) = connect(&mut peers);

    let mut invites = LinkList::new();
    for id in [a, b, c] {
        invites.push(peers.links_mut(), id);
    }
    assert_eq!(peers.list_info().links.in_use, 3);

    assert!(invites.find_user_link(peers.links(), &b).is_some());
    assert_eq!(invites.remove(peers.links_mut(), &b), Some(b));
    assert!(invites.find_user_link(peers.links(), &b).is_none());
    assert_eq!(invites.remove(peers.links_mut(), &b), None);

    let order: Vec<PeerId> = invites.iter(peers.links()).copied().collect();
    assert_eq!(order, vec![c, a]);

    assert_eq!(invites.clear(peers.links_mut()), vec![c, a]);
    assert!(invites.is_empty());
    let info = peers.list_info();
    assert_eq!(info.links.in_use, 0);
    assert_eq!(info.pools.links.free, 3);
}

/// Channel-style member list: removal from the middle by cell.
#[test]
fn test_channel_members_through_dlinks() {
    let mut peers = core();
    let (a, _) = connect(&mut peers);
    let (b, _) = connect(&mut peers);
    let (c, _) = connect(&mut peers);

    let mut members = DLinkHead::new();
    let cell_a = peers.memberships_mut().add_dlink(&mut members, a);
    let cell_b = peers.memberships_mut().add_dlink(&mut members, b);
    let cell_c = peers.memberships_mut().add_dlink(&mut members, c);
    assert_eq!(peers.list_info().memberships.in_use, 3);

    assert_eq!(peers.memberships_mut().remove_dlink(&mut members, cell_b), b);
    let order: Vec<PeerId> = peers.memberships().iter(&members).copied().collect();
    assert_eq!(order, vec![c, a]);

    assert_eq!(peers.memberships_mut().remove_dlink(&mut members, cell_c), c);
    assert_eq!(peers.memberships_mut().remove_dlink(&mut members, cell_a), a);
    assert!(members.is_empty());
    assert_eq!(peers.list_info().memberships.in_use, 0);
}

#[test]
fn test_free_link_of_nothing_is_a_no_op() {
    let mut peers = core();
    assert_eq!(peers.links_mut().free_link(None::<LinkId>), None);
    assert_eq!(peers.list_info().links.in_use, 0);
}
