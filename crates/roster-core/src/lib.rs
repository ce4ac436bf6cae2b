//! roster-core: peer types, digest, wire format and configuration.
//! All other Roster crates depend on this one.

pub mod config;
pub mod digest;
pub mod peer;
pub mod wire;

pub use digest::{digest, Digest};
pub use peer::{PeerEntry, Status};
pub use wire::{Decoded, Snapshot, WireError};
