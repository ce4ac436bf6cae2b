//! Registry announcement.
//!
//! Every interval, serializes the registry and sends it as one datagram to
//! the announce target: the listen group by default, or a fixed unicast
//! address when `network.announce_addr` is set. Failures are reported to
//! the error stream and the loop carries on.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use roster_services::Registry;

use super::LinkScope;
use crate::error::{ErrorSink, TransportError};

/// Send the registry to `target` on a regular interval until shutdown.
pub async fn announce_loop(
    registry: Registry,
    target: SocketAddr,
    scope: LinkScope,
    interval: Duration,
    errors: ErrorSink,
    shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let socket = make_announce_socket(target, scope)
        .context("failed to create announce socket")?;
    let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;

    tracing::info!(
        %target,
        interval_secs = interval.as_secs(),
        multicast = target.ip().is_multicast(),
        "announce starting"
    );

    announce_from(socket, registry, target, interval, errors, shutdown).await
}

/// Announce loop over an already bound socket.
pub async fn announce_from(
    socket: UdpSocket,
    registry: Registry,
    target: SocketAddr,
    interval: Duration,
    errors: ErrorSink,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("announce shutting down");
                return Ok(());
            }
            _ = ticker.tick() => {
                announce_once(&socket, &registry, target, &errors).await;
            }
        }
    }
}

/// Encode and send the registry once. Returns true if the datagram left.
pub async fn announce_once(
    socket: &UdpSocket,
    registry: &Registry,
    target: SocketAddr,
    errors: &ErrorSink,
) -> bool {
    let bytes = match registry.encode().await {
        Ok(b) => b,
        Err(e) => {
            errors.report(TransportError::Encode(e));
            return false;
        }
    };

    match socket.send_to(&bytes, target).await {
        Ok(n) => {
            tracing::trace!(bytes = n, %target, "snapshot announced");
            true
        }
        Err(source) => {
            errors.report(TransportError::Send {
                addr: target,
                source,
            });
            false
        }
    }
}

/// Create a UDP socket for sending to `target`. Multicast targets are
/// limited to the local link.
fn make_announce_socket(target: SocketAddr, scope: LinkScope) -> Result<std::net::UdpSocket> {
    let socket = match target.ip() {
        IpAddr::V4(_) => {
            let socket =
                Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;
            // TTL 1: do not route beyond this link
            socket.set_multicast_ttl_v4(1).context("IP_MULTICAST_TTL")?;
            if let Some(local) = scope.ipv4 {
                socket.set_multicast_if_v4(&local).context("IP_MULTICAST_IF")?;
            }
            let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
            socket.bind(&bind_addr.into()).context("bind()")?;
            socket
        }
        IpAddr::V6(_) => {
            let socket =
                Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;
            if scope.index != 0 {
                socket
                    .set_multicast_if_v6(scope.index)
                    .context("IPV6_MULTICAST_IF")?;
            }
            socket.set_multicast_hops_v6(1).context("IPV6_MULTICAST_HOPS")?;
            let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0);
            socket.bind(&bind_addr.into()).context("bind()")?;
            socket
        }
    };
    socket.set_nonblocking(true).context("set_nonblocking")?;

    Ok(socket.into())
}
