//! Snapshot listener.
//!
//! Joins the configured multicast group and decodes every datagram as a
//! snapshot. Malformed framing and socket errors go to the error stream.
//! Snapshots whose digest does not match their records are dropped silently.
//! Within a consistent snapshot, records that cannot be interpreted are
//! skipped and the rest are forwarded.
//! Consistent snapshots are forwarded to the prober; when its queue is full
//! the listener waits, and further datagrams queue in the socket buffer.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};

use roster_core::{wire, PeerEntry};

use super::LinkScope;
use crate::error::{ErrorSink, TransportError};

/// Join `group` and run the receive loop until shutdown.
pub async fn listen_loop(
    group: SocketAddr,
    scope: LinkScope,
    max_datagram_size: usize,
    inbound: mpsc::Sender<Vec<PeerEntry>>,
    errors: ErrorSink,
    shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let socket = make_listener_socket(group, scope, max_datagram_size)
        .context("failed to create multicast listener socket")?;

    // Convert to tokio UdpSocket for async recv
    let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;

    tracing::info!(%group, "snapshot listener starting");

    listen_on(socket, max_datagram_size, inbound, errors, shutdown).await
}

/// Receive loop over an already bound socket.
pub async fn listen_on(
    socket: UdpSocket,
    max_datagram_size: usize,
    inbound: mpsc::Sender<Vec<PeerEntry>>,
    errors: ErrorSink,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let mut buf = vec![0u8; max_datagram_size];

    loop {
        let received = tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("snapshot listener shutting down");
                return Ok(());
            }
            r = socket.recv_from(&mut buf) => r,
        };

        let (len, from) = match received {
            Ok(r) => r,
            Err(e) => {
                errors.report(TransportError::Recv(e));
                continue;
            }
        };

        let datagram = match wire::decode(&buf[..len]) {
            Ok(d) => d,
            Err(source) => {
                errors.report(TransportError::Decode { from, source });
                continue;
            }
        };

        if !datagram.is_consistent() {
            tracing::trace!(%from, "digest mismatch, dropping snapshot");
            continue;
        }

        let peers = datagram.peers();
        tracing::trace!(
            %from,
            records = datagram.records.len(),
            peers = peers.len(),
            "snapshot received"
        );

        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("snapshot listener shutting down");
                return Ok(());
            }
            sent = inbound.send(peers) => {
                if sent.is_err() {
                    tracing::info!("prober gone, snapshot listener stopping");
                    return Ok(());
                }
            }
        }
    }
}

/// Create a UDP socket joined to `group`.
fn make_listener_socket(
    group: SocketAddr,
    scope: LinkScope,
    max_datagram_size: usize,
) -> Result<std::net::UdpSocket> {
    let domain = match group.ip() {
        IpAddr::V4(_) => Domain::IPV4,
        IpAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket
        .set_recv_buffer_size(max_datagram_size)
        .context("SO_RCVBUF")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    match group.ip() {
        IpAddr::V4(multicast) => {
            let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port());
            socket.bind(&bind_addr.into()).context("bind()")?;
            socket
                .join_multicast_v4(&multicast, &scope.ipv4_or_any())
                .context("IP_ADD_MEMBERSHIP")?;
        }
        IpAddr::V6(multicast) => {
            socket.set_only_v6(true).context("IPV6_V6ONLY")?;
            let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, group.port(), 0, 0);
            socket.bind(&bind_addr.into()).context("bind()")?;
            socket
                .join_multicast_v6(&multicast, scope.index)
                .context("IPV6_JOIN_GROUP")?;
        }
    }

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use roster_core::wire::MAX_DATAGRAM_SIZE;
    use roster_core::Snapshot;

    struct Harness {
        addr: SocketAddr,
        sender: UdpSocket,
        inbound: mpsc::Receiver<Vec<PeerEntry>>,
        errors: mpsc::Receiver<TransportError>,
        shutdown: broadcast::Sender<()>,
        task: tokio::task::JoinHandle<Result<()>>,
    }

    async fn start() -> Harness {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let (tx, inbound) = mpsc::channel(1);
        let (sink, errors) = ErrorSink::channel(8);
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(listen_on(socket, MAX_DATAGRAM_SIZE, tx, sink, shutdown_rx));
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        Harness { addr, sender, inbound, errors, shutdown, task }
    }

    fn snapshot() -> Snapshot {
        Snapshot::new(vec![
            PeerEntry::pending(Some("10.0.0.5".parse().unwrap()), None, 5984).unwrap(),
        ])
    }

    async fn next_batch(h: &mut Harness) -> Vec<PeerEntry> {
        tokio::time::timeout(Duration::from_secs(5), h.inbound.recv())
            .await
            .expect("no snapshot forwarded")
            .unwrap()
    }

    #[tokio::test]
    async fn forwards_consistent_snapshot() {
        let mut h = start().await;
        let snap = snapshot();
        h.sender.send_to(&wire::encode(&snap).unwrap(), h.addr).await.unwrap();

        assert_eq!(next_batch(&mut h).await, snap.peers);

        h.shutdown.send(()).unwrap();
        assert!(h.task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn digest_mismatch_is_dropped_without_error() {
        let mut h = start().await;

        let mut stale = snapshot();
        stale.digest = [0xee; 20];
        h.sender.send_to(&wire::encode(&stale).unwrap(), h.addr).await.unwrap();

        let good = Snapshot::new(vec![
            PeerEntry::pending(Some("10.0.0.6".parse().unwrap()), None, 5984).unwrap(),
        ]);
        h.sender.send_to(&wire::encode(&good).unwrap(), h.addr).await.unwrap();

        // The first thing forwarded is the good snapshot.
        assert_eq!(next_batch(&mut h).await, good.peers);
        assert!(h.errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn bad_entry_does_not_sink_the_batch() {
        let mut h = start().await;
        let good = PeerEntry::pending(Some("10.0.0.6".parse().unwrap()), None, 5984).unwrap();
        let empty = PeerEntry {
            ipv4: None,
            ipv6: None,
            port: 5984,
            status: roster_core::Status::Pending,
        };
        let snap = Snapshot::new(vec![good.clone(), empty]);
        h.sender.send_to(&wire::encode(&snap).unwrap(), h.addr).await.unwrap();

        let batch = next_batch(&mut h).await;
        assert_eq!(batch[0], good);
        assert!(h.errors.try_recv().is_err());

        // The reconciler drops the address-less entry.
        let registry = roster_services::Registry::from_peers(Vec::new());
        let outcome = registry.merge(&batch).await;
        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.dropped, 1);
        assert_eq!(registry.snapshot().await.peers, vec![good]);
    }

    #[tokio::test]
    async fn malformed_datagram_is_reported() {
        let mut h = start().await;
        h.sender.send_to(b"not a snapshot", h.addr).await.unwrap();

        let err = tokio::time::timeout(Duration::from_secs(5), h.errors.recv())
            .await
            .expect("no error reported")
            .unwrap();
        assert!(matches!(err, TransportError::Decode { .. }));

        // Loop keeps going after the error.
        let snap = snapshot();
        h.sender.send_to(&wire::encode(&snap).unwrap(), h.addr).await.unwrap();
        assert_eq!(next_batch(&mut h).await, snap.peers);
    }

    #[tokio::test]
    async fn stops_when_prober_is_gone() {
        let h = start().await;
        drop(h.inbound);
        h.sender.send_to(&wire::encode(&snapshot()).unwrap(), h.addr).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), h.task)
            .await
            .expect("listener did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
