//! Codec registry and RTP payload type negotiation.
//!
//! Declares the built-in codec catalogue and the matching rule used to
//! reconcile a remote party's offered payload types against the local
//! catalogue for one `CallStream`.

use crate::jingle::{MediaKind, PayloadTypeDesc};
use crate::pipeline::MediaPipeline;

/// Value carried by an encoder property: most are strings (gstreamer-style
/// property values), a few are numeric.
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderPropertyValue {
    Str(&'static str),
    Int(i64),
}

/// One entry in the codec registry: an RTP payload type plus the pipeline
/// element identifiers needed to build an encoder/decoder chain for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Codec {
    pub media: MediaKind,
    pub pt: u8,
    pub name: &'static str,
    pub clockrate: u32,
    pub channels: u32,
    pub payloader: &'static str,
    pub depayloader: &'static str,
    pub encoder: &'static str,
    pub decoder: &'static str,
    pub encoder_properties: Vec<(&'static str, EncoderPropertyValue)>,
}

impl Codec {
    pub fn is_dynamic(&self) -> bool {
        self.pt >= 96
    }

    pub fn as_payload_type_desc(&self) -> PayloadTypeDesc {
        PayloadTypeDesc {
            id: self.pt,
            name: self.name.to_string(),
            clockrate: self.clockrate,
            channels: self.channels,
        }
    }
}

fn builtin_video_codecs() -> Vec<Codec> {
    vec![
        Codec {
            media: MediaKind::Video,
            pt: 101,
            name: "H265",
            clockrate: 90000,
            channels: 1,
            payloader: "rtph265pay",
            depayloader: "rtph265depay",
            encoder: "x265enc",
            decoder: "avdec_h265",
            encoder_properties: vec![
                ("tune", EncoderPropertyValue::Str("zerolatency")),
                ("speed-preset", EncoderPropertyValue::Str("ultrafast")),
                ("bitrate", EncoderPropertyValue::Int(512)),
            ],
        },
        Codec {
            media: MediaKind::Video,
            pt: 99,
            name: "H264",
            clockrate: 90000,
            channels: 1,
            payloader: "rtph264pay",
            depayloader: "rtph264depay",
            encoder: "x264enc",
            decoder: "avdec_h264",
            encoder_properties: vec![
                ("tune", EncoderPropertyValue::Str("zerolatency")),
                ("speed-preset", EncoderPropertyValue::Str("ultrafast")),
                ("bitrate", EncoderPropertyValue::Int(512)),
            ],
        },
        Codec {
            media: MediaKind::Video,
            pt: 98,
            name: "VP8",
            clockrate: 90000,
            channels: 1,
            payloader: "rtpvp8pay",
            depayloader: "rtpvp8depay",
            encoder: "vp8enc",
            decoder: "vp8dec",
            encoder_properties: vec![
                ("deadline", EncoderPropertyValue::Int(1)),
                ("target-bitrate", EncoderPropertyValue::Int(512000)),
            ],
        },
    ]
}

fn builtin_audio_codecs() -> Vec<Codec> {
    vec![
        Codec {
            media: MediaKind::Audio,
            pt: 97,
            name: "OPUS",
            clockrate: 48000,
            channels: 2,
            payloader: "rtpopuspay",
            depayloader: "rtpopusdepay",
            encoder: "opusenc",
            decoder: "opusdec",
            encoder_properties: vec![],
        },
        Codec {
            media: MediaKind::Audio,
            pt: 97,
            name: "OPUS",
            clockrate: 48000,
            channels: 1,
            payloader: "rtpopuspay",
            depayloader: "rtpopusdepay",
            encoder: "opusenc",
            decoder: "opusdec",
            encoder_properties: vec![],
        },
        Codec {
            media: MediaKind::Audio,
            pt: 96,
            name: "SPEEX",
            clockrate: 48000,
            channels: 1,
            payloader: "rtpspeexpay",
            depayloader: "rtpspeexdepay",
            encoder: "speexenc",
            decoder: "speexdec",
            encoder_properties: vec![],
        },
        Codec {
            media: MediaKind::Audio,
            pt: 96,
            name: "SPEEX",
            clockrate: 44100,
            channels: 1,
            payloader: "rtpspeexpay",
            depayloader: "rtpspeexdepay",
            encoder: "speexenc",
            decoder: "speexdec",
            encoder_properties: vec![],
        },
        Codec {
            media: MediaKind::Audio,
            pt: 8,
            name: "PCMA",
            clockrate: 8000,
            channels: 1,
            payloader: "rtppcmapay",
            depayloader: "rtppcmadepay",
            encoder: "alawenc",
            decoder: "alawdec",
            encoder_properties: vec![],
        },
        Codec {
            media: MediaKind::Audio,
            pt: 0,
            name: "PCMU",
            clockrate: 8000,
            channels: 1,
            payloader: "rtppcmupay",
            depayloader: "rtppcmudepay",
            encoder: "mulawenc",
            decoder: "mulawdec",
            encoder_properties: vec![],
        },
    ]
}

/// The process-lifetime catalogue of codecs this endpoint can use,
/// filtered once at construction against the media pipeline's available
/// elements.
pub struct CodecRegistry {
    video: Vec<Codec>,
    audio: Vec<Codec>,
}

impl CodecRegistry {
    /// Builds the registry, dropping any codec whose encoder, decoder,
    /// payloader, or depayloader element is unavailable in `pipeline`.
    pub fn new(pipeline: &dyn MediaPipeline) -> Self {
        let filter = |codecs: Vec<Codec>| -> Vec<Codec> {
            codecs
                .into_iter()
                .filter(|c| {
                    let have_all = pipeline.has_element(c.payloader)
                        && pipeline.has_element(c.depayloader)
                        && pipeline.has_element(c.encoder)
                        && pipeline.has_element(c.decoder);
                    if !have_all {
                        tracing::debug!(codec = c.name, pt = c.pt, "codec unavailable, dropping");
                    }
                    have_all
                })
                .collect()
        };

        Self {
            video: filter(builtin_video_codecs()),
            audio: filter(builtin_audio_codecs()),
        }
    }

    /// Registry with no pipeline filtering applied, for tests that don't
    /// need a real `MediaPipeline`.
    #[cfg(test)]
    pub fn unfiltered() -> Self {
        Self {
            video: builtin_video_codecs(),
            audio: builtin_audio_codecs(),
        }
    }

    pub fn codecs_for(&self, media: MediaKind) -> &[Codec] {
        match media {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
        }
    }
}

/// Outcome of negotiating one stream's payload types against a remote
/// offer.
#[derive(Debug, Clone)]
pub struct NegotiationResult {
    /// Matched payload types, in remote-offer order, with dynamic ids
    /// rewritten onto the local codec where applicable.
    pub payload_types: Vec<PayloadTypeDesc>,
    /// The first matched codec; installed as the stream's encoder.
    pub encoder_candidate: Codec,
}

/// Matches `remote_offer` against the locally supported codecs for
/// `media`, applying the dynamic/static payload type matching rule:
/// dynamic remote ids (>=96) match by (name, clockrate, channels) and
/// adopt the remote id; static remote ids (<96) match by
/// (pt, clockrate, channels) and keep the local name.
///
/// Returns `None` if nothing matched — the caller treats this as
/// negotiation failure.
pub fn negotiate(
    registry: &CodecRegistry,
    media: MediaKind,
    remote_offer: &[PayloadTypeDesc],
) -> Option<NegotiationResult> {
    let local = registry.codecs_for(media);
    let mut matched = Vec::new();
    let mut encoder_candidate = None;

    for remote in remote_offer {
        let found = if remote.id >= 96 {
            local.iter().find(|c| {
                c.name.eq_ignore_ascii_case(&remote.name)
                    && c.clockrate == remote.clockrate
                    && c.channels == remote.channels
            })
        } else {
            local.iter().find(|c| {
                c.pt == remote.id && c.clockrate == remote.clockrate && c.channels == remote.channels
            })
        };

        if let Some(codec) = found {
            let desc = if remote.id >= 96 {
                PayloadTypeDesc {
                    id: remote.id,
                    name: codec.name.to_string(),
                    clockrate: codec.clockrate,
                    channels: codec.channels,
                }
            } else {
                codec.as_payload_type_desc()
            };

            if encoder_candidate.is_none() {
                encoder_candidate = Some(codec.clone());
            }
            matched.push(desc);
        }
    }

    encoder_candidate.map(|encoder_candidate| NegotiationResult {
        payload_types: matched,
        encoder_candidate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_pt_adopts_remote_id() {
        let registry = CodecRegistry::unfiltered();
        let offer = vec![PayloadTypeDesc {
            id: 97,
            name: "OPUS".into(),
            clockrate: 48000,
            channels: 2,
        }];

        let result = negotiate(&registry, MediaKind::Audio, &offer).unwrap();
        assert_eq!(result.payload_types.len(), 1);
        assert_eq!(result.payload_types[0].id, 97);
        assert_eq!(result.encoder_candidate.name, "OPUS");
    }

    #[test]
    fn dynamic_pt_rewrite_when_local_id_differs() {
        let registry = CodecRegistry::unfiltered();
        // Remote offers Opus mono at pt=103, a number our local catalogue
        // does not use (ours is registered at 97). Matching is by
        // name/clockrate/channels, and the result must carry the remote id.
        let offer = vec![PayloadTypeDesc {
            id: 103,
            name: "OPUS".into(),
            clockrate: 48000,
            channels: 1,
        }];

        let result = negotiate(&registry, MediaKind::Audio, &offer).unwrap();
        assert_eq!(result.payload_types[0].id, 103);
        assert_eq!(result.payload_types[0].name, "OPUS");
    }

    #[test]
    fn static_pt_keeps_local_name() {
        let registry = CodecRegistry::unfiltered();
        let offer = vec![PayloadTypeDesc {
            id: 0,
            name: "pcmu-vendor-name".into(),
            clockrate: 8000,
            channels: 1,
        }];

        let result = negotiate(&registry, MediaKind::Audio, &offer).unwrap();
        assert_eq!(result.payload_types[0].name, "PCMU");
    }

    #[test]
    fn no_common_codec_returns_none() {
        let registry = CodecRegistry::unfiltered();
        let offer = vec![PayloadTypeDesc {
            id: 99,
            name: "H264".into(),
            clockrate: 90000,
            channels: 1,
        }];

        assert!(negotiate(&registry, MediaKind::Audio, &offer).is_none());
    }

    #[test]
    fn first_match_becomes_encoder_candidate() {
        let registry = CodecRegistry::unfiltered();
        let offer = vec![
            PayloadTypeDesc {
                id: 8,
                name: "PCMA".into(),
                clockrate: 8000,
                channels: 1,
            },
            PayloadTypeDesc {
                id: 0,
                name: "PCMU".into(),
                clockrate: 8000,
                channels: 1,
            },
        ];

        let result = negotiate(&registry, MediaKind::Audio, &offer).unwrap();
        assert_eq!(result.encoder_candidate.name, "PCMA");
        assert_eq!(result.payload_types.len(), 2);
    }
}
