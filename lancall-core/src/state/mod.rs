pub mod peer;

pub use peer::{AdoptOutcome, DiscoveryPhase, PeerId, PeerSession, RemotePeer};
