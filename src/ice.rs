//! ICE connection interface (consumed)
//!
//! One `IceConnection` belongs to exactly one `CallStream` and is only ever
//! mutated by that stream. The concrete implementation (a real ICE agent
//! talking to STUN/TURN) lives outside this crate; what's specified here is
//! the shape the core drives it through.

use std::net::IpAddr;

/// RTP and RTCP are registered as separate ICE components within the same
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IceComponentId {
    Rtp,
    Rtcp,
}

impl IceComponentId {
    pub fn as_u8(self) -> u8 {
        match self {
            IceComponentId::Rtp => 1,
            IceComponentId::Rtcp => 2,
        }
    }
}

/// Events an ICE connection raises, delivered back onto the signaling
/// context by the owning `CallStream`. `Call` subscribes to these per
/// stream: a `LocalCandidatesChanged` becomes an outbound `transport-info`,
/// a `Disconnected` triggers a local hangup.
#[derive(Debug, Clone)]
pub enum IceEvent {
    LocalCandidatesChanged,
    Disconnected,
    DatagramReceived {
        component: IceComponentId,
        bytes: Vec<u8>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum IceError {
    #[error("ICE connection is closed")]
    Closed,
    #[error("unknown component")]
    UnknownComponent,
}

/// Builds a fresh `IceConnection` for a newly created `CallStream`. The
/// concrete factory owns whatever STUN/TURN configuration and socket
/// resources a real ICE agent needs; the core only ever asks for "a new
/// connection per call", leaving connection setup entirely to the factory.
pub trait IceConnectionFactory: Send + Sync {
    fn create(&self) -> std::sync::Arc<dyn IceConnection>;

    /// System addresses a fresh connection should bind to before host
    /// candidate gathering begins. A concrete factory enumerates real
    /// network interfaces; test doubles return an empty list.
    fn local_addresses(&self) -> Vec<IpAddr> {
        Vec::new()
    }
}

/// What the core needs from one stream's ICE connection.
pub trait IceConnection: Send + Sync {
    fn add_component(&self, component: IceComponentId) -> Result<(), IceError>;

    fn set_remote_user(&self, user: &str);
    fn set_remote_password(&self, password: &str);
    fn add_remote_candidate(&self, candidate: &crate::jingle::IceCandidateDesc);

    /// Begins connectivity checks. Called only once at least one remote
    /// candidate has been supplied.
    fn connect_to_host(&self);

    fn close(&self);

    /// Binds this connection to the given local addresses ahead of
    /// candidate gathering.
    fn bind(&self, addresses: &[IpAddr]);

    fn set_ice_controlling(&self, controlling: bool);
    fn set_stun_server(&self, host: &str, port: u16);
    fn set_turn_server(&self, host: &str, port: u16, user: &str, password: &str);

    fn local_user(&self) -> String;
    fn local_password(&self) -> String;
    fn local_candidates(&self) -> Vec<crate::jingle::IceCandidateDesc>;

    fn is_connected(&self, component: IceComponentId) -> bool;
    fn send_datagram(&self, component: IceComponentId, bytes: &[u8]) -> Result<usize, IceError>;

    /// Subscribes to this connection's asynchronous events. Each call
    /// returns an independent receiver; the owning `CallStream`/`Call`
    /// subscribes once, at stream creation.
    fn subscribe(&self) -> tokio::sync::broadcast::Receiver<IceEvent>;
}
