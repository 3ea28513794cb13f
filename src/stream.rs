//! `CallStream`: one negotiated media content within a `Call`.
//!
//! Owns the local SSRC, the negotiated payload type list, and the ICE
//! connection for a single content (audio or video). Bridges ICE datagrams
//! to the media pipeline and publishes pad-ready events once an
//! encoder/decoder chain has been wired in response to negotiation.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::Rng;
use tokio::sync::broadcast;

use crate::codec::{negotiate, Codec, CodecRegistry, NegotiationResult};
use crate::ice::{IceComponentId, IceConnection};
use crate::jingle::{Content, Creator, Description, MediaKind, PayloadTypeDesc, Transport};
use crate::pipeline::{is_receive_pad_name, PadDirection, PadEvent};

#[derive(Debug, Clone)]
pub enum StreamEvent {
    PadReady(PadEvent),
}

/// One media content within a call: audio or video, with its own SSRC,
/// negotiated payload types, and ICE connection.
pub struct CallStream {
    id: u32,
    media: MediaKind,
    creator: Creator,
    name: String,
    local_ssrc: u32,
    ice: Arc<dyn IceConnection>,
    payload_types: parking_lot::RwLock<Vec<PayloadTypeDesc>>,
    negotiated_codec: parking_lot::RwLock<Option<Codec>>,
    encoder_installed: AtomicBool,
    decoder_installed: AtomicBool,
    events: broadcast::Sender<StreamEvent>,
}

impl CallStream {
    /// The connection is told which ICE role this endpoint plays and bound
    /// to the local addresses to gather host candidates from before either
    /// component is registered.
    pub fn new(
        id: u32,
        media: MediaKind,
        creator: Creator,
        name: impl Into<String>,
        ice: Arc<dyn IceConnection>,
        controlling: bool,
        bind_addresses: &[IpAddr],
    ) -> Self {
        let local_ssrc: u32 = rand::thread_rng().gen();
        ice.set_ice_controlling(controlling);
        ice.bind(bind_addresses);
        ice.add_component(IceComponentId::Rtp)
            .expect("fresh ICE connection always accepts its first component");
        ice.add_component(IceComponentId::Rtcp)
            .expect("fresh ICE connection always accepts its second component");

        let (events, _) = broadcast::channel(16);

        Self {
            id,
            media,
            creator,
            name: name.into(),
            local_ssrc,
            ice,
            payload_types: parking_lot::RwLock::new(Vec::new()),
            negotiated_codec: parking_lot::RwLock::new(None),
            encoder_installed: AtomicBool::new(false),
            decoder_installed: AtomicBool::new(false),
            events,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn media(&self) -> MediaKind {
        self.media
    }

    pub fn creator(&self) -> Creator {
        self.creator
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_ssrc(&self) -> u32 {
        self.local_ssrc
    }

    pub fn ice(&self) -> &Arc<dyn IceConnection> {
        &self.ice
    }

    pub fn payload_types(&self) -> Vec<PayloadTypeDesc> {
        self.payload_types.read().clone()
    }

    /// Populates the local content's payload type list with every codec
    /// this endpoint supports for the stream's media kind, before any
    /// negotiation has happened. Used when this stream is the offering
    /// side of `session-initiate` or `content-add`.
    pub fn offer_payload_types(&self, registry: &CodecRegistry) {
        let offered = registry
            .codecs_for(self.media)
            .iter()
            .map(Codec::as_payload_type_desc)
            .collect();
        *self.payload_types.write() = offered;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    /// Runs payload type negotiation against a remote offer for this
    /// stream's media kind, installing the encoder for the first matched
    /// codec. Returns `None` on negotiation failure (no common codec).
    pub fn negotiate(
        &self,
        registry: &CodecRegistry,
        remote_offer: &[PayloadTypeDesc],
    ) -> Option<NegotiationResult> {
        let result = negotiate(registry, self.media, remote_offer)?;
        *self.payload_types.write() = result.payload_types.clone();
        *self.negotiated_codec.write() = Some(result.encoder_candidate.clone());
        self.install_encoder(&result.encoder_candidate);
        Some(result)
    }

    fn install_encoder(&self, codec: &Codec) {
        if self
            .encoder_installed
            .swap(true, Ordering::SeqCst)
        {
            tracing::debug!(stream = self.id, "replacing existing encoder");
        }
        tracing::info!(stream = self.id, codec = codec.name, pt = codec.pt, "encoder installed");
        let _ = self.events.send(StreamEvent::PadReady(PadEvent {
            stream_id: self.id,
            direction: PadDirection::Send,
        }));
    }

    /// Installs a decoder lazily, on first inbound media for `codec`.
    /// No-op if already installed.
    pub fn ensure_decoder(&self, codec: &Codec) {
        if self.decoder_installed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(stream = self.id, codec = codec.name, pt = codec.pt, "decoder installed");
        let _ = self.events.send(StreamEvent::PadReady(PadEvent {
            stream_id: self.id,
            direction: PadDirection::Receive,
        }));
    }

    /// Builds this stream's local `<content/>` for an outbound stanza.
    pub fn local_content(&self) -> Content {
        Content {
            creator: self.creator,
            name: self.name.clone(),
            senders: "both".to_string(),
            description: Some(Description {
                media: self.media,
                ssrc: self.local_ssrc,
                payload_types: self.payload_types(),
            }),
            transport: Some(Transport {
                ufrag: self.ice.local_user(),
                password: self.ice.local_password(),
                candidates: self.ice.local_candidates(),
            }),
        }
    }

    /// Pushes remote ICE candidates into this stream's connection and
    /// starts connectivity checks if any were supplied.
    pub fn add_remote_transport(&self, transport: &Transport) {
        self.ice.set_remote_user(&transport.ufrag);
        self.ice.set_remote_password(&transport.password);
        for candidate in &transport.candidates {
            self.ice.add_remote_candidate(candidate);
        }
        if !transport.candidates.is_empty() {
            self.ice.connect_to_host();
        }
    }

    pub fn close(&self) {
        self.ice.close();
    }

    /// Entry point for the media-pipeline bridge: a newly-appeared pad name
    /// on this stream's bin. Installs the decoder the first time a
    /// conforming receive pad shows up; anything else is ignored.
    pub fn handle_pipeline_pad_added(&self, pad_name: &str) {
        if !is_receive_pad_name(pad_name) {
            return;
        }
        let Some(codec) = self.negotiated_codec.read().clone() else {
            return;
        };
        self.ensure_decoder(&codec);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ice::{IceError, IceEvent};
    use std::sync::Mutex;

    struct FakeIce {
        remote_user: Mutex<Option<String>>,
        connect_calls: Mutex<u32>,
        closed: Mutex<bool>,
        events: broadcast::Sender<IceEvent>,
    }

    impl Default for FakeIce {
        fn default() -> Self {
            let (events, _) = broadcast::channel(8);
            Self {
                remote_user: Mutex::new(None),
                connect_calls: Mutex::new(0),
                closed: Mutex::new(false),
                events,
            }
        }
    }

    impl IceConnection for FakeIce {
        fn add_component(&self, _component: IceComponentId) -> Result<(), IceError> {
            Ok(())
        }
        fn set_remote_user(&self, user: &str) {
            *self.remote_user.lock().unwrap() = Some(user.to_string());
        }
        fn set_remote_password(&self, _password: &str) {}
        fn add_remote_candidate(&self, _candidate: &crate::jingle::IceCandidateDesc) {}
        fn connect_to_host(&self) {
            *self.connect_calls.lock().unwrap() += 1;
        }
        fn close(&self) {
            *self.closed.lock().unwrap() = true;
        }
        fn bind(&self, _addresses: &[IpAddr]) {}
        fn set_ice_controlling(&self, _controlling: bool) {}
        fn set_stun_server(&self, _host: &str, _port: u16) {}
        fn set_turn_server(&self, _host: &str, _port: u16, _user: &str, _password: &str) {}
        fn local_user(&self) -> String {
            "local-ufrag".into()
        }
        fn local_password(&self) -> String {
            "local-pwd".into()
        }
        fn local_candidates(&self) -> Vec<crate::jingle::IceCandidateDesc> {
            vec![]
        }
        fn is_connected(&self, _component: IceComponentId) -> bool {
            false
        }
        fn send_datagram(&self, _component: IceComponentId, _bytes: &[u8]) -> Result<usize, IceError> {
            Ok(0)
        }
        fn subscribe(&self) -> broadcast::Receiver<IceEvent> {
            self.events.subscribe()
        }
    }

    #[test]
    fn negotiate_failure_returns_none_and_leaves_payload_types_empty() {
        let registry = CodecRegistry::unfiltered();
        let ice: Arc<dyn IceConnection> = Arc::new(FakeIce::default());
        let stream = CallStream::new(1, MediaKind::Video, Creator::Initiator, "webcam", ice, true, &[]);

        let offer = vec![PayloadTypeDesc {
            id: 50,
            name: "UNKNOWN".into(),
            clockrate: 1,
            channels: 1,
        }];

        assert!(stream.negotiate(&registry, &offer).is_none());
        assert!(stream.payload_types().is_empty());
    }

    #[test]
    fn negotiate_success_populates_payload_types_and_emits_pad_event() {
        let registry = CodecRegistry::unfiltered();
        let ice: Arc<dyn IceConnection> = Arc::new(FakeIce::default());
        let stream = CallStream::new(1, MediaKind::Audio, Creator::Initiator, "microphone", ice, true, &[]);
        let mut events = stream.subscribe();

        let offer = vec![PayloadTypeDesc {
            id: 97,
            name: "OPUS".into(),
            clockrate: 48000,
            channels: 2,
        }];

        let result = stream.negotiate(&registry, &offer);
        assert!(result.is_some());
        assert_eq!(stream.payload_types().len(), 1);
        assert!(matches!(
            events.try_recv().unwrap(),
            StreamEvent::PadReady(PadEvent {
                direction: PadDirection::Send,
                ..
            })
        ));
    }

    #[test]
    fn add_remote_transport_connects_only_when_candidates_present() {
        let ice = Arc::new(FakeIce::default());
        let stream = CallStream::new(1, MediaKind::Audio, Creator::Initiator, "microphone", ice.clone(), true, &[]);

        stream.add_remote_transport(&Transport {
            ufrag: "u".into(),
            password: "p".into(),
            candidates: vec![],
        });
        assert_eq!(*ice.connect_calls.lock().unwrap(), 0);

        stream.add_remote_transport(&Transport {
            ufrag: "u".into(),
            password: "p".into(),
            candidates: vec![crate::jingle::IceCandidateDesc {
                foundation: "1".into(),
                component: 1,
                protocol: "udp".into(),
                priority: 100,
                ip: "127.0.0.1".into(),
                port: 9000,
                candidate_type: "host".into(),
            }],
        });
        assert_eq!(*ice.connect_calls.lock().unwrap(), 1);
    }

    #[test]
    fn pipeline_pad_added_installs_decoder_only_for_conforming_receive_pad() {
        let registry = CodecRegistry::unfiltered();
        let ice: Arc<dyn IceConnection> = Arc::new(FakeIce::default());
        let stream = CallStream::new(1, MediaKind::Audio, Creator::Initiator, "microphone", ice, true, &[]);
        let mut events = stream.subscribe();

        let offer = vec![PayloadTypeDesc {
            id: 97,
            name: "OPUS".into(),
            clockrate: 48000,
            channels: 2,
        }];
        stream.negotiate(&registry, &offer).unwrap();
        // Drain the Send pad event from negotiation before checking for Receive.
        events.try_recv().unwrap();

        stream.handle_pipeline_pad_added("send_rtp_sink_1_97");
        assert!(events.try_recv().is_err());

        stream.handle_pipeline_pad_added("recv_rtp_src_1_97");
        assert!(matches!(
            events.try_recv().unwrap(),
            StreamEvent::PadReady(PadEvent {
                direction: PadDirection::Receive,
                ..
            })
        ));

        // Second conforming pad is a no-op: decoder already installed.
        stream.handle_pipeline_pad_added("recv_rtp_src_1_97");
        assert!(events.try_recv().is_err());
    }
}
