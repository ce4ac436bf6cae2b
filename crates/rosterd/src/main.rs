//! rosterd: Roster membership daemon.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;

use roster_core::config::RosterConfig;
use roster_core::PeerEntry;
use roster_services::Registry;

mod error;
mod iface;
mod membership;
mod prober;

use error::ErrorSink;
use membership::{announce, listener, LinkScope};
use prober::{ProbeSettings, Prober};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = RosterConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = RosterConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        RosterConfig::default()
    });

    if let Some(interface) = std::env::args().nth(1) {
        config.network.interface = interface;
    }
    let interface = (!config.network.interface.is_empty()).then(|| config.network.interface.clone());
    tracing::info!(interface = interface.as_deref().unwrap_or("*"), "rosterd starting");

    // Bootstrap: failures here are fatal
    let interface_index = match &interface {
        Some(name) => iface::if_index(name)?,
        None => 0,
    };
    let seeds = iface::local_addresses(interface.as_deref())?;
    let registry = Registry::bootstrap(&seeds, config.network.service_port);

    let scope = match &interface {
        Some(_) => LinkScope::pinned(interface_index, &seeds),
        None => LinkScope::default(),
    };
    if registry.is_empty().await {
        tracing::warn!("no local addresses found, starting with an empty registry");
    }
    tracing::info!(
        peers = registry.len().await,
        digest = hex::encode(registry.digest().await),
        "registry bootstrapped"
    );

    let group = SocketAddr::new(config.network.group, config.network.group_port);
    let announce_target = config.network.announce_target();
    tracing::info!(
        %group,
        interface_index = scope.index,
        interface_ipv4 = ?scope.ipv4,
        "multicast scope"
    );
    if !config.network.is_symmetric() {
        tracing::info!(%group, %announce_target, "announcing outside the listen group");
    }

    // Queues
    let (inbound_tx, inbound_rx) =
        mpsc::channel::<Vec<PeerEntry>>(config.queues.inbound_capacity.max(1));
    let (errors, mut error_rx) = ErrorSink::channel(config.queues.error_capacity);

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let prober_task = tokio::spawn(
        Prober::new(
            registry.clone(),
            inbound_rx,
            ProbeSettings::from_config(&config.timing, interface_index),
            shutdown_tx.subscribe(),
        )
        .run(),
    );

    let announce_task = {
        let registry = registry.clone();
        let errors = errors.clone();
        let interval = config.timing.announce_interval();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = announce::announce_loop(
                registry,
                announce_target,
                scope,
                interval,
                errors,
                shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "announce failed");
            }
        })
    };

    let listener_task = {
        let max_datagram_size = config.network.max_datagram_size;
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = listener::listen_loop(
                group,
                scope,
                max_datagram_size,
                inbound_tx,
                errors,
                shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "snapshot listener failed");
            }
        })
    };

    // Error stream: the operator's view of transport failures
    let error_drain = tokio::spawn(async move {
        while let Some(e) = error_rx.recv().await {
            tracing::warn!(error = %e, "transport error");
        }
    });

    let registry_printer = {
        let registry = registry.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                interval.tick().await;
                let snap = registry.snapshot().await;
                tracing::info!(
                    peers = snap.peers.len(),
                    digest = hex::encode(snap.digest),
                    "registry snapshot"
                );
                for p in &snap.peers {
                    tracing::debug!(
                        ipv4 = ?p.ipv4,
                        ipv6 = ?p.ipv6,
                        port = p.port,
                        status = ?p.status,
                        "  peer"
                    );
                }
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()  => tracing::info!("shutting down"),
        r = prober_task         => tracing::error!("prober exited: {:?}", r),
        r = announce_task       => tracing::error!("announce task exited: {:?}", r),
        r = listener_task       => tracing::error!("listener task exited: {:?}", r),
        r = error_drain         => tracing::error!("error drain exited: {:?}", r),
        r = registry_printer    => tracing::error!("registry printer exited: {:?}", r),
    }

    Ok(())
}
