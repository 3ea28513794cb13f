//! Stanza transport interface (consumed)
//!
//! The XMPP client itself lives outside this crate. What the core needs
//! from it is narrow: a way to send a Jingle IQ, and a stream of events
//! (inbound IQs, inbound presence, disconnection) delivered on the
//! signaling context. Modeled as a trait rather than a concrete
//! `tokio-tungstenite` client, so a websocket-backed implementation can sit
//! behind it and expose only a `broadcast::Sender<TransportEvent>` to its
//! own callers.

use crate::jingle::JingleIq;

/// An inbound `<presence/>` relevant to call lifecycle: only the
/// `unavailable` case drives behavior in this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceUnavailable {
    pub from: String,
}

/// Events the stanza transport delivers to the signaling context.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    IqReceived(JingleIq),
    /// An IQ result (ack) for a previously sent stanza id.
    IqResultReceived { stanza_id: String },
    PresenceReceived(PresenceUnavailable),
    Disconnected,
}

/// What the core needs from the stanza transport. A real implementation
/// wraps an XMPP client library; test doubles record sent stanzas in a
/// `Vec` and replay `TransportEvent`s on demand.
pub trait StanzaTransport: Send + Sync {
    /// Enqueues `iq` for delivery. Non-blocking: returns once the stanza
    /// has been handed off, not once it has been acknowledged.
    fn send(&self, iq: JingleIq) -> Result<(), TransportError>;

    /// Sends a plain IQ result (ack) for `stanza_id` to `to`. Always sent
    /// before the corresponding action is processed.
    fn send_iq_result(&self, to: &str, stanza_id: &str) -> Result<(), TransportError>;

    /// This endpoint's own address, used to populate the `from` of
    /// outbound stanzas and to reject self-dial in `CallManager::call`.
    fn own_jid(&self) -> String;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("stanza transport is gone")]
    Gone,
}
