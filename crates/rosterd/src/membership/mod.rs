//! Snapshot transport.
//!
//! `announce` sends the local registry on an interval; `listener` receives
//! peers' snapshots from the multicast group and hands consistent ones to
//! the prober through a bounded queue.

use std::net::Ipv4Addr;

use roster_services::InterfaceAddrs;

pub mod announce;
pub mod listener;

/// The local interface multicast traffic is pinned to.
/// The default leaves the choice to the OS routing table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkScope {
    /// OS interface index, used for IPv6 groups. 0 = any.
    pub index: u32,
    /// An address of the interface, used for IPv4 groups.
    pub ipv4: Option<Ipv4Addr>,
}

impl LinkScope {
    /// Scope for a named interface: its index and the first IPv4 address
    /// among its seeds.
    pub fn pinned(index: u32, seeds: &[InterfaceAddrs]) -> Self {
        Self {
            index,
            ipv4: seeds.iter().find_map(|s| s.ipv4),
        }
    }

    pub fn ipv4_or_any(&self) -> Ipv4Addr {
        self.ipv4.unwrap_or(Ipv4Addr::UNSPECIFIED)
    }
}
