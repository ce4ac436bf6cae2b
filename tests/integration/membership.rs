use crate::*;

use roster_core::{Snapshot, Status};

#[tokio::test]
async fn two_nodes_converge() {
    let a = node(Some("10.0.0.5"), None);
    let b = node(Some("10.0.0.6"), Some("fe80::6"));

    gossip(&a, &b).await.unwrap();
    gossip(&b, &a).await.unwrap();

    let snap_a = a.snapshot().await;
    let snap_b = b.snapshot().await;
    assert_eq!(snap_a.peers.len(), 2);
    assert_eq!(snap_b.peers.len(), 2);

    // Same membership, discovery order differs.
    for p in &snap_a.peers {
        assert!(snap_b.peers.iter().any(|q| q.same_identity(p)), "{p:?} missing on b");
    }
    assert!(snap_a.is_consistent() && snap_b.is_consistent());
}

#[tokio::test]
async fn repeated_gossip_is_stable() {
    let a = node(Some("10.0.0.5"), None);
    let b = node(Some("10.0.0.6"), None);

    gossip(&a, &b).await.unwrap();
    let digest = b.digest().await;
    let len = b.len().await;

    for _ in 0..3 {
        gossip(&a, &b).await.unwrap();
    }
    assert_eq!(b.digest().await, digest);
    assert_eq!(b.len().await, len);
}

#[tokio::test]
async fn bootstrap_probe_then_address_completion() {
    let node = node(Some("10.0.0.5"), None);
    let snap = node.snapshot().await;
    assert_eq!(snap.peers, vec![peer(Some("10.0.0.5"), None)]);

    // A successful probe of 10.0.0.5:5984.
    let targets = node.pending_targets().await;
    assert_eq!(node.promote(&targets).await, 1);

    // A peer reports the same IPv4 with an IPv6 attached.
    let offer = Snapshot::new(vec![peer(Some("10.0.0.5"), Some("fe80::1"))]);
    let peers = receive(&wire::encode(&offer).unwrap()).unwrap();
    node.merge(&peers).await;

    let snap = node.snapshot().await;
    assert_eq!(snap.peers.len(), 1);
    assert_eq!(snap.peers[0].ipv6, Some("fe80::1".parse().unwrap()));
    assert_eq!(snap.peers[0].status, Status::Online);
}

#[tokio::test]
async fn inconsistent_snapshot_never_reaches_the_registry() {
    let node = node(Some("10.0.0.5"), None);
    let before = node.snapshot().await;

    let mut forged = Snapshot::new(vec![peer(Some("10.9.9.9"), None)]);
    forged.digest = before.digest;
    let datagram = wire::encode(&forged).unwrap();

    assert!(receive(&datagram).is_none());
    assert_eq!(node.snapshot().await, before);
}

#[tokio::test]
async fn online_status_survives_remote_pending_view() {
    let a = node(Some("10.0.0.5"), None);
    let targets = a.pending_targets().await;
    a.promote(&targets).await;

    // b still thinks a is pending.
    let b = node(Some("10.0.0.6"), None);
    b.merge(&[peer(Some("10.0.0.5"), None)]).await;
    gossip(&b, &a).await.unwrap();

    let snap = a.snapshot().await;
    let me = snap
        .peers
        .iter()
        .find(|p| p.ipv4 == Some("10.0.0.5".parse().unwrap()))
        .unwrap();
    assert_eq!(me.status, Status::Online);
}
