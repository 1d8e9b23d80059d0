//! Credential/ICE provider
//!
//! Owns reflection/relay server descriptors, time-bounded relay credentials,
//! and the health cache. The hub and the negotiation engine only read
//! snapshots; descriptor generation happens here and nowhere else.

mod descriptor;
mod provider;

pub use descriptor::{HealthState, IceServerDescriptor, ServerKind};
pub use provider::{IceProvider, IceProviderStatus, ServerProber, TcpProber};
