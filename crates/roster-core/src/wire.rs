//! Roster wire format: the snapshot datagram.
//!
//! A snapshot is one `SnapshotHeader` followed by `count` `WirePeer`
//! records. Both are #[repr(C, packed)] with zerocopy derives, so layout is
//! fixed and parsing allocates nothing but the record list. Multi-byte
//! integers are little endian and stored as byte arrays.
//!
//! Changing any record here is a breaking change; bump `WIRE_VERSION`.

use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, Bytes, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::digest::{digest, digest_fields, Digest, DigestFields};
use crate::peer::{PeerEntry, Status};

// ── Records ──────────────────────────────────────────────────────────────────

/// Leading record of every snapshot datagram.
///
/// Wire size: 28 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct SnapshotHeader {
    /// Always `WIRE_MAGIC`.
    pub magic: [u8; 4],
    /// Currently 0x01.
    pub version: u8,
    /// Reserved, must be zero.
    pub flags: u8,
    /// Number of `WirePeer` records that follow.
    pub count: [u8; 2],
    /// Sender's digest over the peer sequence.
    pub digest: Digest,
}

assert_eq_size!(SnapshotHeader, [u8; 28]);

/// One peer entry on the wire.
///
/// Wire size: 24 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct WirePeer {
    /// bit 0: ipv4 present, bit 1: ipv6 present, bits 2-7 reserved.
    pub presence: u8,
    /// `Status` code.
    pub status: u8,
    pub port: [u8; 2],
    pub ipv4: [u8; 4],
    pub ipv6: [u8; 16],
}

assert_eq_size!(WirePeer, [u8; 24]);

const HAS_IPV4: u8 = 0b01;
const HAS_IPV6: u8 = 0b10;

impl From<&PeerEntry> for WirePeer {
    fn from(p: &PeerEntry) -> Self {
        let mut presence = 0;
        if p.ipv4.is_some() {
            presence |= HAS_IPV4;
        }
        if p.ipv6.is_some() {
            presence |= HAS_IPV6;
        }
        WirePeer {
            presence,
            status: p.status.into(),
            port: p.port.to_le_bytes(),
            ipv4: p.ipv4.map(|a| a.octets()).unwrap_or_default(),
            ipv6: p.ipv6.map(|a| a.octets()).unwrap_or_default(),
        }
    }
}

impl WirePeer {
    /// The record's fields as its sender hashed them.
    pub fn digest_fields(&self) -> DigestFields {
        DigestFields {
            ipv4: (self.presence & HAS_IPV4 != 0).then_some(self.ipv4),
            ipv6: (self.presence & HAS_IPV6 != 0).then_some(self.ipv6),
            port: u16::from_le_bytes(self.port),
            status: self.status,
        }
    }

    /// Lenient conversion for merging. Records with reserved presence bits
    /// or an unknown status yield `None`. A record with no address is kept
    /// as an address-less entry; the reconciler drops it.
    pub fn to_entry(&self) -> Option<PeerEntry> {
        if self.presence & !(HAS_IPV4 | HAS_IPV6) != 0 {
            return None;
        }
        let status = Status::try_from(self.status).ok()?;
        let fields = self.digest_fields();
        Some(PeerEntry {
            ipv4: fields.ipv4.map(Ipv4Addr::from),
            ipv6: fields.ipv6.map(Ipv6Addr::from),
            port: fields.port,
            status,
        })
    }
}

// ── Snapshot ─────────────────────────────────────────────────────────────────

/// A registry as transmitted: the ordered peers and the sender's digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub peers: Vec<PeerEntry>,
    pub digest: Digest,
}

impl Snapshot {
    /// Build a snapshot whose digest matches its peers.
    pub fn new(peers: Vec<PeerEntry>) -> Self {
        let digest = digest(&peers);
        Self { peers, digest }
    }

    /// Does the embedded digest match the one recomputed from `peers`?
    pub fn is_consistent(&self) -> bool {
        self.digest == digest(&self.peers)
    }
}

/// Serialize a snapshot into a single datagram.
pub fn encode(snapshot: &Snapshot) -> Result<Bytes, WireError> {
    let count = snapshot.peers.len();
    if count > MAX_PEERS {
        return Err(WireError::TooManyPeers(count));
    }

    let header = SnapshotHeader {
        magic: WIRE_MAGIC,
        version: WIRE_VERSION,
        flags: 0,
        count: (count as u16).to_le_bytes(),
        digest: snapshot.digest,
    };

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + count * PEER_SIZE);
    buf.put_slice(header.as_bytes());
    for peer in &snapshot.peers {
        buf.put_slice(WirePeer::from(peer).as_bytes());
    }
    Ok(buf.freeze())
}

/// A parsed datagram: the sender's digest and its records, unfiltered.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub digest: Digest,
    pub records: Vec<WirePeer>,
}

impl Decoded {
    /// Does the embedded digest match the records as received?
    pub fn is_consistent(&self) -> bool {
        self.digest == digest_fields(self.records.iter().map(WirePeer::digest_fields))
    }

    /// Entries to hand to the reconciler, in order. Records that cannot be
    /// interpreted are skipped; see `WirePeer::to_entry`.
    pub fn peers(&self) -> Vec<PeerEntry> {
        self.records.iter().filter_map(WirePeer::to_entry).collect()
    }

    pub fn into_snapshot(self) -> Snapshot {
        Snapshot {
            peers: self.peers(),
            digest: self.digest,
        }
    }
}

/// Parse a datagram. Only the framing is validated here: a bad header or
/// length is an error, a bad record is not. Does not verify the digest;
/// see `Decoded::is_consistent`.
pub fn decode(buf: &[u8]) -> Result<Decoded, WireError> {
    if buf.len() < HEADER_SIZE {
        return Err(WireError::Truncated(buf.len()));
    }
    let (head, body) = buf.split_at(HEADER_SIZE);
    let header = SnapshotHeader::read_from(head).ok_or(WireError::Truncated(buf.len()))?;

    if header.magic != WIRE_MAGIC {
        return Err(WireError::BadMagic(header.magic));
    }
    if header.version != WIRE_VERSION {
        return Err(WireError::UnknownVersion(header.version));
    }
    if header.flags != 0 {
        return Err(WireError::ReservedFlagsSet(header.flags));
    }

    let count = u16::from_le_bytes(header.count) as usize;
    if body.len() != count * PEER_SIZE {
        return Err(WireError::LengthMismatch {
            count,
            body: body.len(),
        });
    }

    let records = body
        .chunks_exact(PEER_SIZE)
        .map(|chunk| WirePeer::read_from(chunk).ok_or(WireError::Truncated(chunk.len())))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Decoded {
        digest: header.digest,
        records,
    })
}

// ── Constants ─────────────────────────────────────────────────────────────────

pub const WIRE_MAGIC: [u8; 4] = *b"RSTR";

/// Current snapshot format version.
pub const WIRE_VERSION: u8 = 0x01;

pub const HEADER_SIZE: usize = std::mem::size_of::<SnapshotHeader>();
pub const PEER_SIZE: usize = std::mem::size_of::<WirePeer>();

/// Largest datagram a snapshot may occupy.
pub const MAX_DATAGRAM_SIZE: usize = 8192;

/// Most entries that fit in one datagram.
pub const MAX_PEERS: usize = (MAX_DATAGRAM_SIZE - HEADER_SIZE) / PEER_SIZE;

/// Default multicast group for snapshots.
pub const DEFAULT_GROUP: &str = "224.0.0.1";

/// Default UDP port for snapshots.
pub const DEFAULT_GROUP_PORT: u16 = 9999;

/// Announce and probe cadence in seconds.
pub const ANNOUNCE_INTERVAL_SECS: u64 = 5;
pub const PROBE_INTERVAL_SECS: u64 = 5;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("datagram of {0} bytes is truncated")]
    Truncated(usize),

    #[error("bad magic: {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("unknown snapshot version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("reserved flags are non-zero: 0x{0:02x}")]
    ReservedFlagsSet(u8),

    #[error("header announces {count} peers but body is {body} bytes")]
    LengthMismatch { count: usize, body: usize },

    #[error("unknown status byte: 0x{0:02x}")]
    UnknownStatus(u8),

    #[error("{0} peers exceed the datagram limit of {}", MAX_PEERS)]
    TooManyPeers(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
