//! Runtime configuration
//!
//! Bundles everything a `CallManager` needs to know before it can create a
//! `CallStream`'s ICE connection: STUN/TURN endpoints, the termination
//! watchdog timeout, and the feature strings advertised for service
//! discovery. Built once and injected, rather than read from ambient
//! globals.

use std::time::Duration;

/// TURN relay credentials, set independently of the STUN host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// STUN/TURN and timing configuration shared by every call a `CallManager`
/// creates.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub stun_server: Option<(String, u16)>,
    pub turn_server: Option<TurnConfig>,
    /// How long a call may sit in `Disconnecting` before being forced to
    /// `Finished`.
    pub termination_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            stun_server: None,
            turn_server: None,
            termination_timeout: Duration::from_secs(5),
        }
    }
}

impl ManagerConfig {
    /// Overrides STUN/TURN settings from the environment, mirroring the
    /// `SIGNALING_URL`-style override pattern: unset variables leave the
    /// existing value untouched.
    pub fn apply_env_overrides(mut self) -> Self {
        if let (Ok(host), Ok(port)) = (
            std::env::var("JINGLE_STUN_HOST"),
            std::env::var("JINGLE_STUN_PORT"),
        ) {
            if let Ok(port) = port.parse() {
                self.stun_server = Some((host, port));
            }
        }

        if let (Ok(host), Ok(port), Ok(user), Ok(pass)) = (
            std::env::var("JINGLE_TURN_HOST"),
            std::env::var("JINGLE_TURN_PORT"),
            std::env::var("JINGLE_TURN_USER"),
            std::env::var("JINGLE_TURN_PASS"),
        ) {
            if let Ok(port) = port.parse() {
                self.turn_server = Some(TurnConfig {
                    host,
                    port,
                    username: user,
                    password: pass,
                });
            }
        }

        self
    }
}

/// Snapshot of STUN/TURN settings a `Call` applies to every `CallStream`'s
/// ICE connection it creates — including ones created after the call
/// itself was constructed, via `add_video()` or an inbound `content-add`.
/// Taken once from the manager's `ManagerConfig` at call-creation time.
#[derive(Debug, Clone, Default)]
pub struct IceEnvironment {
    pub stun_server: Option<(String, u16)>,
    pub turn_server: Option<TurnConfig>,
}

impl ManagerConfig {
    pub fn ice_environment(&self) -> IceEnvironment {
        IceEnvironment {
            stun_server: self.stun_server.clone(),
            turn_server: self.turn_server.clone(),
        }
    }
}

/// Service-discovery feature strings advertised by a `CallManager`.
pub const DISCO_FEATURES: &[&str] = &[
    "urn:xmpp:jingle:1",
    "urn:xmpp:jingle:apps:rtp:1",
    "urn:xmpp:jingle:apps:rtp:audio",
    "urn:xmpp:jingle:apps:rtp:video",
    "urn:xmpp:jingle:transports:ice-udp:1",
];
