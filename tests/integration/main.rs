//! Roster integration tests.
//!
//! Tests in this file drive two or more in-process nodes through the wire
//! format and the reconciler, the same path a datagram takes between the
//! listener and the prober. No sockets are opened.

use roster_core::wire;
use roster_core::PeerEntry;
use roster_services::{InterfaceAddrs, Registry};

mod membership;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Default service port every node advertises.
pub const SERVICE_PORT: u16 = 5984;

/// A node bootstrapped from one interface.
pub fn node(ipv4: Option<&str>, ipv6: Option<&str>) -> Registry {
    Registry::bootstrap(
        &[InterfaceAddrs {
            name: "eth0".into(),
            ipv4: ipv4.map(|s| s.parse().unwrap()),
            ipv6: ipv6.map(|s| s.parse().unwrap()),
        }],
        SERVICE_PORT,
    )
}

pub fn peer(ipv4: Option<&str>, ipv6: Option<&str>) -> PeerEntry {
    PeerEntry::pending(
        ipv4.map(|s| s.parse().unwrap()),
        ipv6.map(|s| s.parse().unwrap()),
        SERVICE_PORT,
    )
    .unwrap()
}

/// What a listener does with a datagram: decode, check the digest, and
/// return the peers it would forward to the prober.
pub fn receive(datagram: &[u8]) -> Option<Vec<PeerEntry>> {
    let datagram = wire::decode(datagram).ok()?;
    datagram.is_consistent().then(|| datagram.peers())
}

/// Announce `from` and deliver the result to `to`.
pub async fn gossip(from: &Registry, to: &Registry) -> anyhow::Result<()> {
    let datagram = from.encode().await?;
    if let Some(peers) = receive(&datagram) {
        to.merge(&peers).await;
    }
    Ok(())
}
