//! Reconciliation: folds a peer sequence received from the network into
//! the local one.
//!
//! Per incoming entry, in order:
//! 1. Unspecified addresses count as absent; entries left with none are dropped.
//! 2. If both incoming addresses are already known somewhere in the list
//!    (not necessarily on the same entry), skip.
//! 3. Every local entry sharing one address but differing on the other gets
//!    the incoming value written in (address completion).
//! 4. If no local entry matched in step 3, append a new `Pending` entry.
//!
//! Status is never modified here. The caller recomputes the digest.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use roster_core::PeerEntry;

/// What a merge did, per incoming entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// No usable address.
    pub dropped: usize,
    /// Already known.
    pub skipped: usize,
    /// Wrote a missing address into an existing entry.
    pub completed: usize,
    /// Appended as a new peer.
    pub inserted: usize,
}

impl MergeOutcome {
    /// Did the local sequence change?
    pub fn changed(&self) -> bool {
        self.completed + self.inserted > 0
    }
}

/// Merge `incoming` into `local`.
pub fn merge(local: &mut Vec<PeerEntry>, incoming: &[PeerEntry]) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    for entry in incoming {
        let ipv4 = entry.ipv4.filter(|a| !a.is_unspecified());
        let ipv6 = entry.ipv6.filter(|a| !a.is_unspecified());
        if ipv4.is_none() && ipv6.is_none() {
            outcome.dropped += 1;
            continue;
        }

        if contains_v4(local, ipv4) && contains_v6(local, ipv6) {
            outcome.skipped += 1;
            continue;
        }

        let (matched, wrote) = complete_addresses(local, ipv4, ipv6);
        if wrote {
            outcome.completed += 1;
            continue;
        }
        if matched {
            // Shares one address but offers nothing new.
            outcome.skipped += 1;
            continue;
        }

        if let Some(peer) = PeerEntry::pending(ipv4, ipv6, entry.port) {
            local.push(peer);
            outcome.inserted += 1;
        }
    }

    outcome
}

/// Is `ip` present in any address field of any entry? An absent address
/// is "present" when some entry also lacks its IPv4.
fn contains_v4(local: &[PeerEntry], ip: Option<Ipv4Addr>) -> bool {
    match ip {
        Some(v4) => local.iter().any(|p| p.has_addr(IpAddr::V4(v4))),
        None => local.iter().any(|p| p.ipv4.is_none()),
    }
}

fn contains_v6(local: &[PeerEntry], ip: Option<Ipv6Addr>) -> bool {
    match ip {
        Some(v6) => local.iter().any(|p| p.has_addr(IpAddr::V6(v6))),
        None => local.iter().any(|p| p.ipv6.is_none()),
    }
}

/// Step 3. Returns `(matched, wrote)`: whether any local entry shared one
/// family, and whether any address was actually written.
fn complete_addresses(
    local: &mut [PeerEntry],
    ipv4: Option<Ipv4Addr>,
    ipv6: Option<Ipv6Addr>,
) -> (bool, bool) {
    let mut matched = false;
    let mut wrote = false;

    for peer in local.iter_mut() {
        let v4_match = ipv4.is_some() && peer.ipv4 == ipv4;
        let v6_match = ipv6.is_some() && peer.ipv6 == ipv6;

        if v4_match && peer.ipv6 != ipv6 {
            matched = true;
            if ipv6.is_some() {
                peer.ipv6 = ipv6;
                wrote = true;
            }
        }
        if v6_match && peer.ipv4 != ipv4 {
            matched = true;
            if ipv4.is_some() {
                peer.ipv4 = ipv4;
                wrote = true;
            }
        }
    }

    (matched, wrote)
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_core::Status;

    fn peer(v4: Option<&str>, v6: Option<&str>) -> PeerEntry {
        PeerEntry::pending(v4.map(|s| s.parse().unwrap()), v6.map(|s| s.parse().unwrap()), 5984)
            .unwrap()
    }

    #[test]
    fn inserts_unknown_peer_as_pending() {
        let mut local = vec![peer(Some("10.0.0.5"), None)];
        let mut incoming = peer(Some("10.0.0.6"), None);
        incoming.status = Status::Online;
        incoming.port = 6000;

        let out = merge(&mut local, &[incoming]);

        assert_eq!(out.inserted, 1);
        assert_eq!(local.len(), 2);
        assert_eq!(local[1].status, Status::Pending);
        assert_eq!(local[1].port, 6000);
    }

    #[test]
    fn completes_missing_ipv6_in_place() {
        let mut local = vec![peer(Some("10.0.0.5"), None)];
        local[0].status = Status::Online;

        let out = merge(&mut local, &[peer(Some("10.0.0.5"), Some("fe80::1"))]);

        assert_eq!(out.completed, 1);
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].ipv6, Some("fe80::1".parse().unwrap()));
        assert_eq!(local[0].status, Status::Online);
    }

    #[test]
    fn completes_missing_ipv4_in_place() {
        let mut local = vec![peer(None, Some("fe80::1"))];
        merge(&mut local, &[peer(Some("10.0.0.5"), Some("fe80::1"))]);
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].ipv4, Some("10.0.0.5".parse().unwrap()));
    }

    #[test]
    fn completion_never_erases_a_known_address() {
        let mut local = vec![peer(Some("10.0.0.5"), Some("fe80::1"))];
        // Only v4 found; v6 absent is "not found" since every local entry has one.
        let out = merge(&mut local, &[peer(Some("10.0.0.5"), None)]);
        assert_eq!(out.completed, 0);
        assert_eq!(out.skipped, 1);
        assert_eq!(out.inserted, 0);
        assert!(!out.changed());
        assert_eq!(local, vec![peer(Some("10.0.0.5"), Some("fe80::1"))]);
    }

    #[test]
    fn completed_counts_only_real_writes() {
        let mut local = vec![
            peer(Some("10.0.0.5"), Some("fe80::1")),
            peer(Some("10.0.0.6"), None),
        ];
        let out = merge(
            &mut local,
            &[peer(Some("10.0.0.5"), None), peer(Some("10.0.0.6"), Some("fe80::6"))],
        );
        assert_eq!(out.completed, 1);
        assert_eq!(out.skipped, 1);
        assert!(out.changed());
        assert_eq!(local[1].ipv6, Some("fe80::6".parse().unwrap()));
    }

    #[test]
    fn known_pair_is_skipped() {
        let mut local = vec![peer(Some("10.0.0.5"), Some("fe80::1"))];
        let out = merge(&mut local, &[peer(Some("10.0.0.5"), Some("fe80::1"))]);
        assert_eq!(out.skipped, 1);
        assert!(!out.changed());
        assert_eq!(local.len(), 1);
    }

    #[test]
    fn containment_is_checked_across_entries() {
        // Both addresses are known, but on different entries.
        let mut local = vec![peer(Some("10.0.0.5"), None), peer(None, Some("fe80::9"))];
        let before = local.clone();
        let out = merge(&mut local, &[peer(Some("10.0.0.5"), Some("fe80::9"))]);
        assert_eq!(out.skipped, 1);
        assert_eq!(local, before);
    }

    #[test]
    fn unspecified_only_entries_are_dropped() {
        let mut local = Vec::new();
        let bogus = PeerEntry::pending(Some(Ipv4Addr::UNSPECIFIED), Some(Ipv6Addr::UNSPECIFIED), 1)
            .unwrap();
        let out = merge(&mut local, &[bogus]);
        assert_eq!(out.dropped, 1);
        assert!(local.is_empty());
    }

    #[test]
    fn unspecified_half_is_treated_as_absent() {
        let mut local = Vec::new();
        let half = PeerEntry::pending(Some("10.0.0.7".parse().unwrap()), Some(Ipv6Addr::UNSPECIFIED), 1)
            .unwrap();
        merge(&mut local, &[half]);
        assert_eq!(local, vec![PeerEntry::pending(Some("10.0.0.7".parse().unwrap()), None, 1).unwrap()]);
    }

    #[test]
    fn duplicate_entries_in_one_batch_insert_once() {
        let mut local = Vec::new();
        let p = peer(Some("10.0.0.8"), Some("fe80::8"));
        let out = merge(&mut local, &[p.clone(), p]);
        assert_eq!(out.inserted, 1);
        assert_eq!(out.skipped, 1);
        assert_eq!(local.len(), 1);
    }

    #[test]
    fn merge_never_changes_status() {
        let mut local = vec![peer(Some("10.0.0.5"), None), peer(Some("10.0.0.6"), None)];
        local[0].status = Status::Online;
        let mut offered = peer(Some("10.0.0.6"), Some("fe80::6"));
        offered.status = Status::Online;
        let mut downgraded = peer(Some("10.0.0.5"), Some("fe80::5"));
        downgraded.status = Status::Offline;

        merge(&mut local, &[offered, downgraded]);

        assert_eq!(local[0].status, Status::Online);
        assert_eq!(local[1].status, Status::Pending);
    }
}
