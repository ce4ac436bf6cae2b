//! Peer registry: the node's view of the cluster.
//!
//! The peer sequence and its digest live behind one async mutex. Every
//! operation holds the lock for its whole duration and recomputes the digest
//! before releasing it, so any observer sees a consistent (peers, digest)
//! pair. The raw sequence is never handed out; callers get clones.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;

use roster_core::wire::{self, WireError};
use roster_core::{digest, Digest, PeerEntry, Snapshot, Status};

use crate::reconcile::{self, MergeOutcome};

/// First usable addresses found on one local interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddrs {
    pub name: String,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

/// A pending peer selected for a liveness probe.
pub type ProbeTarget = PeerEntry;

struct RegistryState {
    peers: Vec<PeerEntry>,
    digest: Digest,
}

impl RegistryState {
    fn refresh_digest(&mut self) {
        self.digest = digest(&self.peers);
    }
}

/// Shared handle to the registry. Cloning is cheap.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Mutex<RegistryState>>,
}

impl Registry {
    /// Build the initial registry: one `Pending` entry per interface that
    /// has at least one address, all on `port`.
    pub fn bootstrap(seeds: &[InterfaceAddrs], port: u16) -> Self {
        let peers = seeds
            .iter()
            .filter_map(|iface| PeerEntry::pending(iface.ipv4, iface.ipv6, port))
            .collect();
        Self::from_peers(peers)
    }

    /// Registry holding exactly `peers`, in order.
    pub fn from_peers(peers: Vec<PeerEntry>) -> Self {
        let mut state = RegistryState {
            peers,
            digest: [0u8; roster_core::digest::DIGEST_LEN],
        };
        state.refresh_digest();
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Fold a received peer sequence into the registry.
    pub async fn merge(&self, incoming: &[PeerEntry]) -> MergeOutcome {
        let mut state = self.inner.lock().await;
        let outcome = reconcile::merge(&mut state.peers, incoming);
        state.refresh_digest();

        if outcome.changed() {
            tracing::debug!(
                inserted = outcome.inserted,
                completed = outcome.completed,
                peers = state.peers.len(),
                digest = hex::encode(state.digest),
                "registry merged"
            );
        }
        outcome
    }

    /// Copies of every entry currently `Pending`.
    pub async fn pending_targets(&self) -> Vec<ProbeTarget> {
        self.inner
            .lock()
            .await
            .peers
            .iter()
            .filter(|p| p.status == Status::Pending)
            .cloned()
            .collect()
    }

    /// Mark each target that is still present and still `Pending` as
    /// `Online`. Targets are matched by address pair, so entries completed
    /// by a merge since the probe started are left for the next round.
    /// Returns the number of promoted entries.
    pub async fn promote(&self, targets: &[ProbeTarget]) -> usize {
        if targets.is_empty() {
            return 0;
        }

        let mut state = self.inner.lock().await;
        let mut promoted = 0;
        for peer in state.peers.iter_mut() {
            if targets.iter().any(|t| t.same_identity(peer))
                && peer.status.can_transition(Status::Online)
            {
                peer.status = Status::Online;
                promoted += 1;
            }
        }
        state.refresh_digest();

        if promoted > 0 {
            tracing::debug!(promoted, digest = hex::encode(state.digest), "peers online");
        }
        promoted
    }

    /// Consistent copy of the registry.
    pub async fn snapshot(&self) -> Snapshot {
        let state = self.inner.lock().await;
        Snapshot {
            peers: state.peers.clone(),
            digest: state.digest,
        }
    }

    /// Serialize the registry for announcement.
    pub async fn encode(&self) -> Result<Bytes, WireError> {
        let state = self.inner.lock().await;
        wire::encode(&Snapshot {
            peers: state.peers.clone(),
            digest: state.digest,
        })
    }

    pub async fn digest(&self) -> Digest {
        self.inner.lock().await.digest
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.peers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.peers.is_empty()
    }
}
