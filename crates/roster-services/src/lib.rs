//! roster-services: the membership state shared by the daemon's tasks.

pub mod reconcile;
pub mod registry;

pub use reconcile::MergeOutcome;
pub use registry::{InterfaceAddrs, ProbeTarget, Registry};
