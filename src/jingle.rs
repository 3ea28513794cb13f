//! Jingle stanza value types (XEP-0166/0167/0176)
//!
//! These are the abstract Rust values a real XML layer would parse inbound
//! IQs into and serialize outbound ones from. No XML parsing happens here;
//! the shape follows the same "one struct/enum per wire message" pattern
//! used elsewhere in this codebase for modeling signaling payloads, just
//! carrying Jingle's richer nested content/description/transport structure
//! instead of a flat JSON object.

use serde::{Deserialize, Serialize};

/// Media kind of a Jingle content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// Which side created a content element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Creator {
    Initiator,
    Responder,
}

/// Full vocabulary of `<reason/>` children a Jingle peer may report,
/// reproduced from the wider XEP-0166 reason vocabulary so the core can
/// receive and display any of them without lossy mapping. The core itself
/// only ever *produces* `FailedApplication`, `Gone`, and `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reason {
    AlreadyInUse,
    Busy,
    Cancel,
    ConnectivityError,
    Decline,
    Expired,
    FailedApplication,
    FailedTransport,
    GeneralError,
    Gone,
    IncompatibleParameters,
    MediaError,
    SecurityError,
    Success,
    Timeout,
    UnsupportedApplications,
    UnsupportedTransports,
    None,
}

/// One RTP payload type as offered or accepted on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadTypeDesc {
    pub id: u8,
    pub name: String,
    pub clockrate: u32,
    pub channels: u32,
}

/// `<description/>` of a Jingle content: media kind, SSRC, and offered
/// payload types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Description {
    pub media: MediaKind,
    pub ssrc: u32,
    pub payload_types: Vec<PayloadTypeDesc>,
}

/// A single ICE candidate as carried in a `<transport/>` element. Opaque
/// beyond the fields ICE negotiation itself needs; validated by the ICE
/// collaborator, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidateDesc {
    pub foundation: String,
    pub component: u16,
    pub protocol: String,
    pub priority: u32,
    pub ip: String,
    pub port: u16,
    pub candidate_type: String,
}

/// `<transport/>` of a Jingle content: ICE credentials plus zero or more
/// candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transport {
    pub ufrag: String,
    pub password: String,
    pub candidates: Vec<IceCandidateDesc>,
}

/// One `<content/>` element: the negotiable unit within a Jingle session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub creator: Creator,
    pub name: String,
    pub senders: String,
    pub description: Option<Description>,
    pub transport: Option<Transport>,
}

/// The `action` attribute of a Jingle IQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JingleAction {
    SessionInitiate,
    SessionAccept,
    SessionInfo,
    SessionTerminate,
    ContentAccept,
    ContentAdd,
    ContentReject,
    TransportInfo,
}

/// A complete inbound or outbound Jingle IQ payload (the `<jingle/>`
/// element plus the enclosing IQ's addressing and stanza id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JingleIq {
    pub stanza_id: String,
    pub from: String,
    pub to: String,
    pub action: JingleAction,
    pub sid: String,
    pub contents: Vec<Content>,
    pub reason: Option<Reason>,
}

impl JingleIq {
    pub fn content_named(&self, name: &str) -> Option<&Content> {
        self.contents.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_named_finds_matching_content() {
        let iq = JingleIq {
            stanza_id: "s1".into(),
            from: "a@example.com/res".into(),
            to: "b@example.com/res".into(),
            action: JingleAction::SessionInitiate,
            sid: "sid1".into(),
            contents: vec![Content {
                creator: Creator::Initiator,
                name: "microphone".into(),
                senders: "both".into(),
                description: None,
                transport: None,
            }],
            reason: None,
        };

        assert!(iq.content_named("microphone").is_some());
        assert!(iq.content_named("webcam").is_none());
    }
}
