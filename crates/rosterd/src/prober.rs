//! Liveness prober: the single consumer of registry mutations.
//!
//! One task alternates between merging snapshots handed over by the
//! listener and, on every interval tick, probing each `Pending` peer with a
//! TCP connect. A successful connect promotes the peer to `Online`. Failed
//! probes leave the peer `Pending`; it is retried next tick.

use std::net::{IpAddr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;

use roster_core::config::TimingConfig;
use roster_core::PeerEntry;
use roster_services::{ProbeTarget, Registry};

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub interval: Duration,
    /// Per-connect bound.
    pub timeout: Duration,
    /// Probes in flight at once.
    pub concurrency: usize,
    /// Scope for link-local IPv6 targets. 0 = unscoped.
    pub scope_id: u32,
}

impl ProbeSettings {
    pub fn from_config(timing: &TimingConfig, scope_id: u32) -> Self {
        Self {
            interval: timing.probe_interval(),
            timeout: timing.probe_timeout(),
            concurrency: timing.probe_concurrency.max(1),
            scope_id,
        }
    }
}

pub struct Prober {
    registry: Registry,
    inbound: mpsc::Receiver<Vec<PeerEntry>>,
    settings: ProbeSettings,
    shutdown: broadcast::Receiver<()>,
}

impl Prober {
    pub fn new(
        registry: Registry,
        inbound: mpsc::Receiver<Vec<PeerEntry>>,
        settings: ProbeSettings,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            registry,
            inbound,
            settings,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.settings.interval.as_secs(),
            timeout_ms = self.settings.timeout.as_millis() as u64,
            concurrency = self.settings.concurrency,
            "prober starting"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("prober shutting down");
                    return Ok(());
                }

                batch = self.inbound.recv() => {
                    let Some(peers) = batch else {
                        tracing::info!("inbound queue closed, prober stopping");
                        return Ok(());
                    };
                    let outcome = self.registry.merge(&peers).await;
                    tracing::trace!(
                        offered = peers.len(),
                        skipped = outcome.skipped,
                        dropped = outcome.dropped,
                        "snapshot reconciled"
                    );
                }

                _ = interval.tick() => {
                    tokio::select! {
                        promoted = probe_round(&self.registry, &self.settings) => {
                            tracing::trace!(promoted, "probe round done");
                        }
                        _ = self.shutdown.recv() => {
                            tracing::info!("prober shutting down mid-round");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

/// Probe every pending peer once and promote the reachable ones.
/// Returns the number of promoted entries.
pub async fn probe_round(registry: &Registry, settings: &ProbeSettings) -> usize {
    let targets = registry.pending_targets().await;
    if targets.is_empty() {
        return 0;
    }

    let timeout = settings.timeout;
    let scope_id = settings.scope_id;
    let reachable: Vec<ProbeTarget> = stream::iter(targets)
        .map(|target| async move {
            let ok = probe(&target, timeout, scope_id).await;
            (target, ok)
        })
        .buffer_unordered(settings.concurrency.max(1))
        .filter_map(|(target, ok)| async move { ok.then_some(target) })
        .collect()
        .await;

    registry.promote(&reachable).await
}

/// One bounded connect attempt. The connection is dropped immediately.
pub async fn probe(target: &PeerEntry, timeout: Duration, scope_id: u32) -> bool {
    let Some(addr) = probe_addr(target, scope_id) else {
        return false;
    };

    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => {
            tracing::debug!(peer = %addr, "probe succeeded");
            true
        }
        Ok(Err(e)) => {
            tracing::trace!(peer = %addr, error = %e, "probe failed");
            false
        }
        Err(_) => {
            tracing::trace!(peer = %addr, "probe timed out");
            false
        }
    }
}

fn probe_addr(target: &PeerEntry, scope_id: u32) -> Option<SocketAddr> {
    Some(match target.preferred_addr()? {
        IpAddr::V4(v4) => SocketAddr::V4(SocketAddrV4::new(v4, target.port)),
        IpAddr::V6(v6) => {
            let link_local = v6.segments()[0] & 0xffc0 == 0xfe80;
            let scope = if link_local { scope_id } else { 0 };
            SocketAddr::V6(SocketAddrV6::new(v6, target.port, 0, scope))
        }
    })
}
