//! Peer entries and the status state machine.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Well-known service port every bootstrapped entry advertises.
pub const DEFAULT_SERVICE_PORT: u16 = 5984;

/// Liveness status of a peer.
///
/// Wire codes follow declaration order. Only `Pending → Online` is a legal
/// transition; `Offline` can be decoded from the wire but nothing local
/// produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    /// Reachability confirmed by a probe.
    Online = 0x00,
    /// Reserved. No transition leads here.
    Offline = 0x01,
    /// Learned but not yet confirmed. Initial state for every new peer.
    Pending = 0x02,
}

impl Status {
    /// Transition table. Anything not listed is rejected, including
    /// self-transitions.
    pub fn can_transition(self, to: Status) -> bool {
        matches!((self, to), (Status::Pending, Status::Online))
    }
}

impl TryFrom<u8> for Status {
    type Error = crate::wire::WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Status::Online),
            0x01 => Ok(Status::Offline),
            0x02 => Ok(Status::Pending),
            other => Err(crate::wire::WireError::UnknownStatus(other)),
        }
    }
}

impl From<Status> for u8 {
    fn from(s: Status) -> u8 {
        s as u8
    }
}

/// A known peer. Identity is the (ipv4, ipv6) pair; port and status are
/// attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerEntry {
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    pub port: u16,
    pub status: Status,
}

impl PeerEntry {
    /// Build an entry. Returns `None` when both addresses are absent.
    pub fn new(
        ipv4: Option<Ipv4Addr>,
        ipv6: Option<Ipv6Addr>,
        port: u16,
        status: Status,
    ) -> Option<Self> {
        if ipv4.is_none() && ipv6.is_none() {
            return None;
        }
        Some(Self { ipv4, ipv6, port, status })
    }

    /// A freshly learned peer.
    pub fn pending(ipv4: Option<Ipv4Addr>, ipv6: Option<Ipv6Addr>, port: u16) -> Option<Self> {
        Self::new(ipv4, ipv6, port, Status::Pending)
    }

    /// True if either address field equals `ip`.
    pub fn has_addr(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => self.ipv4 == Some(v4) || self.ipv6 == Some(v4.to_ipv6_mapped()),
            IpAddr::V6(v6) => self.ipv6 == Some(v6),
        }
    }

    /// Same address pair as `other`.
    pub fn same_identity(&self, other: &PeerEntry) -> bool {
        self.ipv4 == other.ipv4 && self.ipv6 == other.ipv6
    }

    /// Address used to reach the peer: IPv4 first, IPv6 otherwise.
    pub fn preferred_addr(&self) -> Option<IpAddr> {
        self.ipv4
            .map(IpAddr::V4)
            .or_else(|| self.ipv6.map(IpAddr::V6))
    }
}
