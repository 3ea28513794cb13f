//! `Call`: the session state machine for a single peer.
//!
//! Owns the session id, direction, the set of `CallStream`s negotiated for
//! this session, and the table of outstanding (un-acked) outbound
//! requests. Implements every Jingle action handler and the four-state
//! lifecycle (`Connecting` -> `Active` -> `Disconnecting` -> `Finished`).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::codec::CodecRegistry;
use crate::config::IceEnvironment;
use crate::ice::{IceConnectionFactory, IceEvent};
use crate::jingle::{Content, Creator, JingleAction, JingleIq, MediaKind, Reason};
use crate::stream::CallStream;
use crate::transport::StanzaTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    Incoming,
    Outgoing,
}

/// The four reachable states. There is no transition out of `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Connecting,
    Active,
    Disconnecting,
    Finished,
}

#[derive(Debug, Clone)]
pub enum CallEvent {
    Ringing,
    Connected,
    StateChanged(CallState),
    Finished { reason: Reason },
    StreamCreated(u32),
}

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("action not valid in current call state")]
    ProtocolMisuse,
    #[error("stanza transport unavailable: {0}")]
    Transport(#[from] crate::transport::TransportError),
}

struct PendingRequest {
    stanza_id: String,
    action: JingleAction,
}

/// One outstanding session, either dialed locally or created for an
/// inbound `session-initiate`.
pub struct Call {
    sid: String,
    direction: CallDirection,
    own_jid: String,
    peer_jid: String,
    state: RwLock<CallState>,
    streams: RwLock<Vec<Arc<CallStream>>>,
    pending: Mutex<Vec<PendingRequest>>,
    next_stream_id: AtomicU32,
    transport: Arc<dyn StanzaTransport>,
    ice_factory: Arc<dyn IceConnectionFactory>,
    registry: Arc<CodecRegistry>,
    ice_env: IceEnvironment,
    termination_timeout: Duration,
    events: broadcast::Sender<CallEvent>,
}

impl Call {
    #[allow(clippy::too_many_arguments)]
    fn new(
        sid: String,
        direction: CallDirection,
        own_jid: String,
        peer_jid: String,
        transport: Arc<dyn StanzaTransport>,
        ice_factory: Arc<dyn IceConnectionFactory>,
        registry: Arc<CodecRegistry>,
        ice_env: IceEnvironment,
        termination_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            sid,
            direction,
            own_jid,
            peer_jid,
            state: RwLock::new(CallState::Connecting),
            streams: RwLock::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            next_stream_id: AtomicU32::new(0),
            transport,
            ice_factory,
            registry,
            ice_env,
            termination_timeout,
            events,
        }
    }

    /// Creates an outgoing call with one audio stream (creator =
    /// initiator, name = `microphone`) and sends `session-initiate`.
    #[allow(clippy::too_many_arguments)]
    pub fn dial(
        peer_jid: impl Into<String>,
        transport: Arc<dyn StanzaTransport>,
        ice_factory: Arc<dyn IceConnectionFactory>,
        registry: Arc<CodecRegistry>,
        ice_env: IceEnvironment,
        termination_timeout: Duration,
    ) -> Arc<Self> {
        let sid = generate_sid();
        let own_jid = transport.own_jid();
        let call = Arc::new(Self::new(
            sid,
            CallDirection::Outgoing,
            own_jid,
            peer_jid.into(),
            transport,
            ice_factory,
            registry,
            ice_env,
            termination_timeout,
        ));

        let stream = call.create_stream(MediaKind::Audio, Creator::Initiator, "microphone");
        stream.offer_payload_types(&call.registry);
        let content = stream.local_content();
        let _ = call.send_request(JingleAction::SessionInitiate, vec![content], None);
        call
    }

    /// Builds an incoming call from the first content of a `session-initiate`
    /// and negotiates it immediately. Returns `None` on negotiation failure,
    /// in which case the caller must not register this call — it never
    /// becomes visible to the application.
    #[allow(clippy::too_many_arguments)]
    pub fn try_accept_initial(
        sid: String,
        own_jid: String,
        peer_jid: String,
        transport: Arc<dyn StanzaTransport>,
        ice_factory: Arc<dyn IceConnectionFactory>,
        registry: Arc<CodecRegistry>,
        ice_env: IceEnvironment,
        termination_timeout: Duration,
        initial_content: &Content,
    ) -> Option<Arc<Self>> {
        let call = Arc::new(Self::new(
            sid,
            CallDirection::Incoming,
            own_jid,
            peer_jid,
            transport,
            ice_factory,
            registry,
            ice_env,
            termination_timeout,
        ));

        let description = initial_content.description.as_ref()?;
        let stream = call.create_stream(description.media, Creator::Initiator, &initial_content.name);

        if stream.negotiate(&call.registry, &description.payload_types).is_none() {
            tracing::warn!(sid = %call.sid, "initial content negotiation failed");
            call.force_finish(Reason::FailedApplication);
            return None;
        }

        if let Some(transport) = &initial_content.transport {
            stream.add_remote_transport(transport);
        }

        Some(call)
    }

    /// Creates a new stream, wiring its ICE connection per the current
    /// STUN/TURN environment and the call's ICE-controlling role, and
    /// subscribes to its ICE events so local candidate changes become
    /// outbound `transport-info` stanzas and connection loss triggers a
    /// hangup. Used for the initial content and for every stream added
    /// later (`add_video`, inbound `content-add`).
    fn create_stream(self: &Arc<Self>, media: MediaKind, creator: Creator, name: &str) -> Arc<CallStream> {
        let id = self.next_stream_id.fetch_add(1, Ordering::SeqCst);
        let ice = self.ice_factory.create();
        let controlling = self.direction == CallDirection::Outgoing;
        let bind_addresses = self.ice_factory.local_addresses();
        let stream = Arc::new(CallStream::new(id, media, creator, name, ice, controlling, &bind_addresses));

        if let Some((host, port)) = &self.ice_env.stun_server {
            stream.ice().set_stun_server(host, *port);
        }
        if let Some(turn) = &self.ice_env.turn_server {
            stream
                .ice()
                .set_turn_server(&turn.host, turn.port, &turn.username, &turn.password);
        }

        self.streams.write().push(stream.clone());
        let _ = self.events.send(CallEvent::StreamCreated(id));
        self.spawn_ice_watcher(stream.clone());
        stream
    }

    /// Listens for this stream's ICE events for the lifetime of the call:
    /// a local candidate change becomes an outbound `transport-info`
    /// carrying the stream's (now updated) local content; a disconnect
    /// triggers a local hangup. Stops once the call reaches `Finished`.
    fn spawn_ice_watcher(self: &Arc<Self>, stream: Arc<CallStream>) {
        let call = self.clone();
        let mut ice_events = stream.ice().subscribe();
        tokio::spawn(async move {
            loop {
                match ice_events.recv().await {
                    Ok(IceEvent::LocalCandidatesChanged) => {
                        if call.state() == CallState::Finished {
                            break;
                        }
                        let content = stream.local_content();
                        let _ = call.send_request(JingleAction::TransportInfo, vec![content], None);
                    }
                    Ok(IceEvent::Disconnected) => {
                        let _ = call.hangup();
                        break;
                    }
                    Ok(IceEvent::DatagramReceived { .. }) => {
                        // RTP/RTCP datagram bridging to the media pipeline is
                        // the pipeline adapter's concern, not the signaling
                        // context's.
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn jid(&self) -> &str {
        &self.peer_jid
    }

    pub fn state(&self) -> CallState {
        *self.state.read()
    }

    pub fn streams(&self) -> Vec<Arc<CallStream>> {
        self.streams.read().clone()
    }

    pub fn stream_named(&self, name: &str) -> Option<Arc<CallStream>> {
        self.streams.read().iter().find(|s| s.name() == name).cloned()
    }

    pub fn stream_by_id(&self, id: u32) -> Option<Arc<CallStream>> {
        self.streams.read().iter().find(|s| s.id() == id).cloned()
    }

    /// Entry point for a media pipeline adapter reporting a new pad on one
    /// of this call's streams. Unknown stream ids are silently ignored —
    /// the pipeline may still be catching up with a stream that was just
    /// torn down.
    pub fn handle_pipeline_pad_added(&self, stream_id: u32, pad_name: &str) {
        if let Some(stream) = self.stream_by_id(stream_id) {
            stream.handle_pipeline_pad_added(pad_name);
        }
    }

    pub fn audio_stream(&self) -> Option<Arc<CallStream>> {
        self.streams.read().iter().find(|s| s.media() == MediaKind::Audio).cloned()
    }

    pub fn video_stream(&self) -> Option<Arc<CallStream>> {
        self.streams.read().iter().find(|s| s.media() == MediaKind::Video).cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    fn set_state(&self, new_state: CallState) {
        let changed = {
            let mut state = self.state.write();
            if *state == new_state {
                false
            } else {
                *state = new_state;
                true
            }
        };
        if changed {
            let _ = self.events.send(CallEvent::StateChanged(new_state));
        }
    }

    fn send_request(
        &self,
        action: JingleAction,
        contents: Vec<Content>,
        reason: Option<Reason>,
    ) -> Result<(), CallError> {
        let stanza_id = Uuid::new_v4().to_string();
        let iq = JingleIq {
            stanza_id: stanza_id.clone(),
            from: self.own_jid.clone(),
            to: self.peer_jid.clone(),
            action,
            sid: self.sid.clone(),
            contents,
            reason,
        };
        self.pending.lock().push(PendingRequest { stanza_id, action });
        self.transport.send(iq)?;
        Ok(())
    }

    /// Accepts an incoming call: sends `session-accept` with every current
    /// stream's local content and transitions to `Active`.
    pub fn accept(self: &Arc<Self>) -> Result<(), CallError> {
        if self.direction != CallDirection::Incoming || self.state() != CallState::Connecting {
            return Err(CallError::ProtocolMisuse);
        }
        let contents: Vec<Content> = self.streams.read().iter().map(|s| s.local_content()).collect();
        self.send_request(JingleAction::SessionAccept, contents, None)?;
        self.set_state(CallState::Active);
        let _ = self.events.send(CallEvent::Connected);
        Ok(())
    }

    /// Sends the `session-info` stanza the manager uses to tell the caller
    /// their invitation has been received and is ringing.
    pub fn send_ringing(&self) -> Result<(), CallError> {
        self.send_request(JingleAction::SessionInfo, vec![], None)
    }

    /// Local hangup: equivalent to `terminate` with no reason element.
    pub fn hangup(self: &Arc<Self>) -> Result<(), CallError> {
        self.terminate_locally(Reason::None)
    }

    fn terminate_locally(self: &Arc<Self>, reason: Reason) -> Result<(), CallError> {
        if matches!(self.state(), CallState::Disconnecting | CallState::Finished) {
            return Ok(());
        }
        let reason_elem = if reason == Reason::None { None } else { Some(reason) };
        self.send_request(JingleAction::SessionTerminate, vec![], reason_elem)?;
        self.set_state(CallState::Disconnecting);

        let watchdog_call = self.clone();
        let timeout = self.termination_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if watchdog_call.state() != CallState::Finished {
                tracing::warn!(sid = %watchdog_call.sid, "termination watchdog fired, forcing Finished");
                watchdog_call.force_finish(Reason::None);
            }
        });
        Ok(())
    }

    /// Adds a video stream to an active call. No-op if one already exists.
    pub fn add_video(self: &Arc<Self>) -> Result<(), CallError> {
        if self.state() != CallState::Active {
            return Err(CallError::ProtocolMisuse);
        }
        if self.video_stream().is_some() {
            return Ok(());
        }
        let creator = match self.direction {
            CallDirection::Outgoing => Creator::Initiator,
            CallDirection::Incoming => Creator::Responder,
        };
        let stream = self.create_stream(MediaKind::Video, creator, "webcam");
        stream.offer_payload_types(&self.registry);
        self.send_request(JingleAction::ContentAdd, vec![stream.local_content()], None)
    }

    /// Closes every stream's ICE connection and transitions to `Finished`.
    /// Idempotent: the `Finished` event fires exactly once.
    fn force_finish(&self, reason: Reason) {
        let already_finished = {
            let mut state = self.state.write();
            if *state == CallState::Finished {
                true
            } else {
                *state = CallState::Finished;
                false
            }
        };
        if already_finished {
            return;
        }
        for stream in self.streams.read().iter() {
            stream.close();
        }
        let _ = self.events.send(CallEvent::StateChanged(CallState::Finished));
        let _ = self.events.send(CallEvent::Finished { reason });
    }

    /// Removes the pending request matching `stanza_id`, if any. If the
    /// acked action was `session-terminate`, the call transitions to
    /// `Finished`.
    pub fn handle_ack(&self, stanza_id: &str) {
        let acked_action = {
            let mut pending = self.pending.lock();
            pending
                .iter()
                .position(|p| p.stanza_id == stanza_id)
                .map(|index| pending.remove(index).action)
        };
        if let Some(action) = acked_action {
            if action == JingleAction::SessionTerminate {
                self.force_finish(Reason::None);
            }
        }
    }

    /// Dispatches one already-acked inbound Jingle IQ to the appropriate
    /// action handler.
    pub fn handle_inbound(self: &Arc<Self>, iq: &JingleIq) {
        if self.state() == CallState::Finished {
            tracing::debug!(sid = %self.sid, action = ?iq.action, "dropping stanza on finished call");
            return;
        }
        match iq.action {
            JingleAction::SessionInitiate => {
                tracing::warn!(sid = %self.sid, "unexpected session-initiate on existing call");
            }
            JingleAction::SessionAccept => self.handle_session_accept(iq),
            JingleAction::SessionInfo => {
                let _ = self.events.send(CallEvent::Ringing);
            }
            JingleAction::SessionTerminate => {
                self.force_finish(iq.reason.unwrap_or(Reason::None));
            }
            JingleAction::ContentAccept => self.handle_content_accept(iq),
            JingleAction::ContentAdd => self.handle_content_add(iq),
            JingleAction::ContentReject => {
                if let Some(content) = iq.contents.first() {
                    self.streams.write().retain(|s| s.name() != content.name);
                }
            }
            JingleAction::TransportInfo => self.handle_transport_info(iq),
        }
    }

    fn handle_session_accept(self: &Arc<Self>, iq: &JingleIq) {
        if self.direction != CallDirection::Outgoing || self.state() != CallState::Connecting {
            tracing::warn!(sid = %self.sid, "session-accept ignored: wrong direction or state");
            return;
        }
        let mut all_ok = true;
        for content in &iq.contents {
            let Some(stream) = self.stream_named(&content.name) else {
                continue;
            };
            let Some(description) = &content.description else {
                all_ok = false;
                continue;
            };
            if stream.negotiate(&self.registry, &description.payload_types).is_none() {
                all_ok = false;
                continue;
            }
            if let Some(transport) = &content.transport {
                stream.add_remote_transport(transport);
            }
        }

        if all_ok {
            self.set_state(CallState::Active);
            let _ = self.events.send(CallEvent::Connected);
        } else {
            let _ = self.terminate_locally(Reason::FailedApplication);
        }
    }

    fn handle_content_accept(&self, iq: &JingleIq) {
        if self.state() != CallState::Active {
            return;
        }
        for content in &iq.contents {
            let Some(stream) = self.stream_named(&content.name) else { continue };
            let Some(description) = &content.description else { continue };
            if stream.negotiate(&self.registry, &description.payload_types).is_none() {
                tracing::warn!(sid = %self.sid, content = %content.name, "content-accept negotiation failed");
                continue;
            }
            if let Some(transport) = &content.transport {
                stream.add_remote_transport(transport);
            }
        }
    }

    fn handle_content_add(self: &Arc<Self>, iq: &JingleIq) {
        if self.state() != CallState::Active {
            return;
        }
        let Some(content) = iq.contents.first() else { return };
        if self.stream_named(&content.name).is_some() {
            return;
        }
        let Some(description) = &content.description else { return };

        let creator = match self.direction {
            CallDirection::Outgoing => Creator::Responder,
            CallDirection::Incoming => Creator::Initiator,
        };
        let stream = self.create_stream(description.media, creator, &content.name);

        if stream.negotiate(&self.registry, &description.payload_types).is_some() {
            if let Some(transport) = &content.transport {
                stream.add_remote_transport(transport);
            }
            let _ = self.send_request(
                JingleAction::ContentAccept,
                vec![stream.local_content()],
                None,
            );
        } else {
            self.streams.write().retain(|s| s.name() != content.name);
            let rejected = Content {
                creator: stream.creator(),
                name: stream.name().to_string(),
                senders: "both".to_string(),
                description: None,
                transport: None,
            };
            let _ = self.send_request(
                JingleAction::ContentReject,
                vec![rejected],
                Some(Reason::FailedApplication),
            );
        }
    }

    fn handle_transport_info(&self, iq: &JingleIq) {
        for content in &iq.contents {
            if let (Some(stream), Some(transport)) =
                (self.stream_named(&content.name), content.transport.as_ref())
            {
                stream.add_remote_transport(transport);
            }
        }
    }

    /// Called by the `CallManager` when the stanza transport disconnects or
    /// the peer's presence goes `unavailable`.
    pub fn terminate_for_transport_loss(self: &Arc<Self>) {
        self.force_finish(Reason::Gone);
    }

    /// The local content each stream currently carries, for callers that
    /// want to inspect the last-offered description without waiting on a
    /// `CallEvent`.
    pub fn local_contents(&self) -> Vec<Content> {
        self.streams.read().iter().map(|s| s.local_content()).collect()
    }
}

fn generate_sid() -> String {
    let raw = Uuid::new_v4().simple().to_string();
    raw[..16].to_string()
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("sid", &self.sid)
            .field("direction", &self.direction)
            .field("peer_jid", &self.peer_jid)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ice::{IceComponentId, IceConnection, IceError};
    use crate::jingle::{Description, IceCandidateDesc, PayloadTypeDesc};
    use std::sync::Mutex as StdMutex;

    struct FakeIce {
        events: broadcast::Sender<IceEvent>,
    }
    impl Default for FakeIce {
        fn default() -> Self {
            let (events, _) = broadcast::channel(8);
            Self { events }
        }
    }
    impl IceConnection for FakeIce {
        fn add_component(&self, _c: IceComponentId) -> Result<(), IceError> {
            Ok(())
        }
        fn set_remote_user(&self, _u: &str) {}
        fn set_remote_password(&self, _p: &str) {}
        fn add_remote_candidate(&self, _c: &IceCandidateDesc) {}
        fn connect_to_host(&self) {}
        fn close(&self) {}
        fn bind(&self, _addresses: &[std::net::IpAddr]) {}
        fn set_ice_controlling(&self, _c: bool) {}
        fn set_stun_server(&self, _h: &str, _p: u16) {}
        fn set_turn_server(&self, _h: &str, _p: u16, _u: &str, _pw: &str) {}
        fn local_user(&self) -> String {
            "u".into()
        }
        fn local_password(&self) -> String {
            "p".into()
        }
        fn local_candidates(&self) -> Vec<IceCandidateDesc> {
            vec![]
        }
        fn is_connected(&self, _c: IceComponentId) -> bool {
            true
        }
        fn send_datagram(&self, _c: IceComponentId, _b: &[u8]) -> Result<usize, IceError> {
            Ok(0)
        }
        fn subscribe(&self) -> broadcast::Receiver<IceEvent> {
            self.events.subscribe()
        }
    }

    struct FakeIceFactory;
    impl IceConnectionFactory for FakeIceFactory {
        fn create(&self) -> Arc<dyn IceConnection> {
            Arc::new(FakeIce::default())
        }
    }

    struct FakeTransport {
        own_jid: String,
        sent: StdMutex<Vec<JingleIq>>,
    }
    impl StanzaTransport for FakeTransport {
        fn send(&self, iq: JingleIq) -> Result<(), crate::transport::TransportError> {
            self.sent.lock().unwrap().push(iq);
            Ok(())
        }
        fn send_iq_result(&self, _to: &str, _stanza_id: &str) -> Result<(), crate::transport::TransportError> {
            Ok(())
        }
        fn own_jid(&self) -> String {
            self.own_jid.clone()
        }
    }

    fn registry() -> Arc<CodecRegistry> {
        Arc::new(CodecRegistry::unfiltered())
    }

    #[tokio::test]
    async fn dial_sends_session_initiate_with_one_audio_stream() {
        let transport = Arc::new(FakeTransport {
            own_jid: "a@example.com".into(),
            sent: StdMutex::new(vec![]),
        });
        let call = Call::dial(
            "b@example.com",
            transport.clone(),
            Arc::new(FakeIceFactory),
            registry(),
            IceEnvironment::default(),
            Duration::from_secs(5),
        );

        assert_eq!(call.streams().len(), 1);
        assert_eq!(call.state(), CallState::Connecting);
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].action, JingleAction::SessionInitiate);
    }

    #[tokio::test]
    async fn hangup_transitions_through_disconnecting_and_watchdog_forces_finished() {
        let transport = Arc::new(FakeTransport {
            own_jid: "a@example.com".into(),
            sent: StdMutex::new(vec![]),
        });
        let call = Call::dial(
            "b@example.com",
            transport,
            Arc::new(FakeIceFactory),
            registry(),
            IceEnvironment::default(),
            Duration::from_millis(20),
        );

        call.hangup().unwrap();
        assert_eq!(call.state(), CallState::Disconnecting);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(call.state(), CallState::Finished);
    }

    #[tokio::test]
    async fn add_video_rejected_when_not_active() {
        let transport = Arc::new(FakeTransport {
            own_jid: "a@example.com".into(),
            sent: StdMutex::new(vec![]),
        });
        let call = Call::dial(
            "b@example.com",
            transport,
            Arc::new(FakeIceFactory),
            registry(),
            IceEnvironment::default(),
            Duration::from_secs(5),
        );

        assert!(matches!(call.add_video(), Err(CallError::ProtocolMisuse)));
    }

    #[tokio::test]
    async fn try_accept_initial_fails_cleanly_on_codec_mismatch() {
        let transport = Arc::new(FakeTransport {
            own_jid: "b@example.com".into(),
            sent: StdMutex::new(vec![]),
        });
        let content = Content {
            creator: Creator::Initiator,
            name: "webcam".into(),
            senders: "both".into(),
            description: Some(Description {
                media: MediaKind::Video,
                ssrc: 1,
                payload_types: vec![PayloadTypeDesc {
                    id: 200,
                    name: "UNKNOWN".into(),
                    clockrate: 1,
                    channels: 1,
                }],
            }),
            transport: None,
        };

        let call = Call::try_accept_initial(
            "sid1".into(),
            "b@example.com".into(),
            "a@example.com".into(),
            transport,
            Arc::new(FakeIceFactory),
            registry(),
            IceEnvironment::default(),
            Duration::from_secs(5),
            &content,
        );
        assert!(call.is_none());
    }
}
