//! Registry digest: a 20-byte fingerprint of an ordered peer sequence.
//!
//! Each field of each entry is fed to BLAKE3 in a fixed order and the XOF
//! output is truncated to 20 bytes. Absent addresses hash as a zero presence
//! byte followed by zeroed octets, so `None` and `0.0.0.0` never collide.

use crate::peer::PeerEntry;

/// Digest length in bytes. Part of the wire format.
pub const DIGEST_LEN: usize = 20;

pub type Digest = [u8; DIGEST_LEN];

const DOMAIN: &[u8] = b"roster.registry.v1";

/// The hashed view of one entry. Built from a `PeerEntry` or straight
/// from a wire record, so entries that cannot become a `PeerEntry` still
/// hash exactly as their sender hashed them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigestFields {
    pub ipv4: Option<[u8; 4]>,
    pub ipv6: Option<[u8; 16]>,
    pub port: u16,
    pub status: u8,
}

impl From<&PeerEntry> for DigestFields {
    fn from(p: &PeerEntry) -> Self {
        Self {
            ipv4: p.ipv4.map(|a| a.octets()),
            ipv6: p.ipv6.map(|a| a.octets()),
            port: p.port,
            status: p.status.into(),
        }
    }
}

/// Compute the digest of `peers`. Order-sensitive.
pub fn digest(peers: &[PeerEntry]) -> Digest {
    digest_fields(peers.iter().map(DigestFields::from))
}

/// Digest over pre-extracted fields, in iteration order.
pub fn digest_fields<I>(entries: I) -> Digest
where
    I: ExactSizeIterator<Item = DigestFields>,
{
    let mut hasher = blake3::Hasher::new();
    hasher.update(DOMAIN);
    hasher.update(&(entries.len() as u32).to_le_bytes());

    for entry in entries {
        match entry.ipv4 {
            Some(octets) => {
                hasher.update(&[1]);
                hasher.update(&octets);
            }
            None => {
                hasher.update(&[0]);
                hasher.update(&[0u8; 4]);
            }
        }
        match entry.ipv6 {
            Some(octets) => {
                hasher.update(&[1]);
                hasher.update(&octets);
            }
            None => {
                hasher.update(&[0]);
                hasher.update(&[0u8; 16]);
            }
        }
        hasher.update(&entry.port.to_le_bytes());
        hasher.update(&[entry.status]);
    }

    let mut out = [0u8; DIGEST_LEN];
    hasher.finalize_xof().fill(&mut out);
    out
}
