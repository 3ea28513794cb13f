//! `CallManager`: the multi-call registry.
//!
//! Dispatches inbound Jingle IQs and presence changes to the right `Call`
//! by session id, creates `Call`s for inbound `session-initiate`, exposes
//! the outgoing-call factory, and routes acknowledgements. Owns the
//! STUN/TURN configuration injected into every stream's ICE connection.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::call::Call;
use crate::codec::CodecRegistry;
use crate::config::{ManagerConfig, DISCO_FEATURES};
use crate::ice::IceConnectionFactory;
use crate::jingle::JingleAction;
use crate::pipeline::MediaPipeline;
use crate::transport::{PresenceUnavailable, StanzaTransport, TransportEvent};

#[derive(Debug, Clone)]
pub enum ManagerEvent {
    CallReceived(Arc<Call>),
    CallStarted(Arc<Call>),
}

/// Registry of every live `Call`, keyed by session id. Session ids are
/// random tokens drawn from a large enough space that cross-direction
/// collisions are not a practical concern, so lookup-by-sid alone is
/// sufficient for dispatch.
pub struct CallManager {
    transport: Arc<dyn StanzaTransport>,
    ice_factory: Arc<dyn IceConnectionFactory>,
    registry: Arc<CodecRegistry>,
    config: RwLock<ManagerConfig>,
    calls: RwLock<HashMap<String, Arc<Call>>>,
    events: broadcast::Sender<ManagerEvent>,
}

impl CallManager {
    pub fn new(
        transport: Arc<dyn StanzaTransport>,
        ice_factory: Arc<dyn IceConnectionFactory>,
        pipeline: &dyn MediaPipeline,
        config: ManagerConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(32);
        Arc::new(Self {
            transport,
            ice_factory,
            registry: Arc::new(CodecRegistry::new(pipeline)),
            config: RwLock::new(config),
            calls: RwLock::new(HashMap::new()),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    pub fn disco_features(&self) -> &'static [&'static str] {
        DISCO_FEATURES
    }

    pub fn set_stun_server(&self, host: impl Into<String>, port: u16) {
        self.config.write().stun_server = Some((host.into(), port));
    }

    pub fn set_turn_server(&self, host: impl Into<String>, port: u16) {
        let mut config = self.config.write();
        let turn = config.turn_server.get_or_insert_with(|| crate::config::TurnConfig {
            host: String::new(),
            port: 0,
            username: String::new(),
            password: String::new(),
        });
        turn.host = host.into();
        turn.port = port;
    }

    pub fn set_turn_user(&self, user: impl Into<String>) {
        let mut config = self.config.write();
        let turn = config.turn_server.get_or_insert_with(|| crate::config::TurnConfig {
            host: String::new(),
            port: 0,
            username: String::new(),
            password: String::new(),
        });
        turn.username = user.into();
    }

    pub fn set_turn_password(&self, password: impl Into<String>) {
        let mut config = self.config.write();
        let turn = config.turn_server.get_or_insert_with(|| crate::config::TurnConfig {
            host: String::new(),
            port: 0,
            username: String::new(),
            password: String::new(),
        });
        turn.password = password.into();
    }

    /// Places an outgoing call. Rejects an empty `peer_jid` or a self-dial.
    pub fn call(self: &Arc<Self>, peer_jid: &str) -> Option<Arc<Call>> {
        if peer_jid.is_empty() || peer_jid == self.transport.own_jid() {
            tracing::warn!(peer_jid, "rejecting call: empty or self-dial");
            return None;
        }

        if self.registry.codecs_for(crate::jingle::MediaKind::Audio).is_empty() {
            tracing::warn!(peer_jid, "rejecting call: no audio codecs available from media pipeline");
            return None;
        }

        let (ice_env, termination_timeout) = {
            let config = self.config.read();
            (config.ice_environment(), config.termination_timeout)
        };
        let call = Call::dial(
            peer_jid,
            self.transport.clone(),
            self.ice_factory.clone(),
            self.registry.clone(),
            ice_env,
            termination_timeout,
        );
        self.calls.write().insert(call.sid().to_string(), call.clone());
        let _ = self.events.send(ManagerEvent::CallStarted(call.clone()));
        Some(call)
    }

    /// Feeds one event from the stanza transport into the manager.
    pub fn handle_transport_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::IqReceived(iq) => self.handle_iq(iq),
            TransportEvent::IqResultReceived { stanza_id } => self.route_ack(&stanza_id),
            TransportEvent::PresenceReceived(presence) => self.handle_presence(presence),
            TransportEvent::Disconnected => self.terminate_all_gone(),
        }
    }

    fn route_ack(&self, stanza_id: &str) {
        for call in self.calls.read().values() {
            call.handle_ack(stanza_id);
        }
    }

    fn handle_presence(&self, presence: PresenceUnavailable) {
        for call in self.calls.read().values() {
            if call.jid() == presence.from {
                call.terminate_for_transport_loss();
            }
        }
    }

    fn terminate_all_gone(&self) {
        for call in self.calls.read().values() {
            call.terminate_for_transport_loss();
        }
    }

    fn handle_iq(self: &Arc<Self>, iq: crate::jingle::JingleIq) {
        let _ = self.transport.send_iq_result(&iq.from, &iq.stanza_id);

        if iq.action == JingleAction::SessionInitiate {
            self.handle_session_initiate(iq);
            return;
        }

        let call = self.calls.read().get(&iq.sid).cloned();
        match call {
            Some(call) => call.handle_inbound(&iq),
            None => tracing::warn!(sid = %iq.sid, action = ?iq.action, "unknown session, dropping"),
        }
    }

    fn handle_session_initiate(self: &Arc<Self>, iq: crate::jingle::JingleIq) {
        if self.calls.read().contains_key(&iq.sid) {
            tracing::warn!(sid = %iq.sid, "duplicate session-initiate for existing session, dropping");
            return;
        }

        let Some(content) = iq.contents.first() else {
            tracing::warn!(sid = %iq.sid, "session-initiate with no content, dropping");
            return;
        };

        let (ice_env, termination_timeout) = {
            let config = self.config.read();
            (config.ice_environment(), config.termination_timeout)
        };
        let call = Call::try_accept_initial(
            iq.sid.clone(),
            self.transport.own_jid(),
            iq.from.clone(),
            self.transport.clone(),
            self.ice_factory.clone(),
            self.registry.clone(),
            ice_env,
            termination_timeout,
            content,
        );

        let Some(call) = call else {
            // Negotiation failed: the call already tore itself down and is
            // never registered or surfaced to the application.
            return;
        };

        self.calls.write().insert(call.sid().to_string(), call.clone());
        let _ = call.send_ringing();
        let _ = self.events.send(ManagerEvent::CallReceived(call));
    }
}
