// Peerlink Core — Hybrid Peer Discovery
//
// Two discovery channels, one merged view: UDP beacons find peers on
// the same network segment, the relay registry finds everyone else,
// and the aggregator keeps a single continuously refreshed snapshot
// that the connection initiator dials from.

pub mod aggregator;
pub mod api;
pub mod connector;
pub mod global;
pub mod peer;
pub mod presence;
pub mod registry;

pub use aggregator::{Aggregator, MergedPeer, PeerSnapshot};
pub use connector::{Connector, ConnectorConfig, PeerConnection};
pub use global::{GlobalConfig, GlobalDiscovery};
pub use peer::{PeerRecord, PeerSource};
pub use presence::{Presence, PresenceConfig};
pub use registry::{PeerRegistry, RegistryConfig, RegistryError, RegistryHealth};
