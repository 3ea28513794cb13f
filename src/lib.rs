//! Jingle Call Session Core
//!
//! Negotiates, maintains, and tears down peer-to-peer voice/video sessions
//! over an XMPP-style stanza substrate, following the Jingle family of
//! specifications (XEP-0166/0167/0176). The stanza transport, the ICE
//! connectivity agent, and the media pipeline are external collaborators
//! consumed through the traits in [`transport`], [`ice`], and [`pipeline`].

pub mod call;
pub mod codec;
pub mod config;
pub mod ice;
pub mod jingle;
pub mod manager;
pub mod pipeline;
pub mod stream;
pub mod transport;

pub use call::{Call, CallDirection, CallError, CallEvent, CallState};
pub use codec::CodecRegistry;
pub use config::{IceEnvironment, ManagerConfig};
pub use manager::{CallManager, ManagerEvent};
pub use stream::CallStream;

/// Initializes structured logging from `RUST_LOG`, defaulting to `info`
/// for this crate when the variable is unset.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("jingle_call_core=info"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
