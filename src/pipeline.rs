//! Media pipeline interface (consumed)
//!
//! The encoder/decoder/payloader graph itself is built and driven by a
//! third-party streaming framework outside this crate. What the core needs
//! is the ability to probe for an element by name at `CodecRegistry`
//! construction time, and to be told when a stream's send/receive pads
//! become available so the application can wire audio/video sinks.

/// Which direction a pipeline pad event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadDirection {
    Send,
    Receive,
}

/// Raised by a `CallStream` once its encoder (`Send`) or decoder
/// (`Receive`) chain has been wired to a ghost pad the application can
/// attach to.
#[derive(Debug, Clone)]
pub struct PadEvent {
    pub stream_id: u32,
    pub direction: PadDirection,
}

/// What the core needs from the media pipeline.
pub trait MediaPipeline: Send + Sync {
    /// True if the named element (encoder, decoder, payloader, or
    /// depayloader identifier from the codec table) can be instantiated.
    fn has_element(&self, name: &str) -> bool;
}

/// Recognizes a receive-pad name of the form
/// `recv_rtp_src_<session>_<payload-type>`.
///
/// All three prefix tokens — `recv`, `rtp`, `src` — must be present; a name
/// satisfying only one or two of them is not a receive pad. (An earlier
/// draft of this matcher used `||` here, which misclassified send-pad
/// names sharing just one token as receive pads.)
pub fn is_receive_pad_name(name: &str) -> bool {
    let tokens: Vec<&str> = name.split('_').collect();
    tokens.len() >= 3 && tokens[0] == "recv" && tokens[1] == "rtp" && tokens[2] == "src"
}
