//! Transport capability consumed by the aggregation core.
//!
//! The core never opens sockets. It sends packets to sets of identities and
//! receives inbound packets through a registered listener; everything else
//! (datagram transport, in-process routing for tests) lives behind these two
//! traits.

use std::sync::Arc;

use crypto::Scheme;

use crate::identity::Identity;
use crate::wire::Packet;

/// Receiver of inbound packets. Implementations must not block: packet
/// handling is expected to hand off to asynchronous processing.
pub trait PacketListener: Send + Sync {
    fn new_packet(&self, packet: Packet);
}

/// Outbound transport toward a set of identities.
///
/// Sends are best-effort: a failed send is the transport's problem and is
/// not retried by the core (the periodic tick resends naturally).
pub trait Network<S: Scheme>: Send + Sync {
    /// Send `packet` to every identity in `ids`.
    fn send(&self, ids: &[Identity<S::Public>], packet: &Packet);

    /// Register the single listener receiving inbound packets.
    fn register_listener(&self, listener: Arc<dyn PacketListener>);
}
