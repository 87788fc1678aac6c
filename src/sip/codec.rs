//! Outbound audio codec preference
//!
//! The media layer negotiates codecs in its own order. The softphone prefers one codec
//! (G.711 μ-law by default) and moves it to the front of the outbound parameter set once a
//! session is established. The policy is best-effort: a missing codec leaves the set alone.

use serde::{Deserialize, Serialize};

/// Well-known audio codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioCodec {
    /// G.711 μ-law (US standard) - Payload type 0
    Pcmu,
    /// G.711 A-law (EU standard) - Payload type 8
    Pcma,
    /// G.722 wideband - Payload type 9
    G722,
    /// Opus (dynamic payload type)
    Opus,
}

impl AudioCodec {
    /// Static RTP payload type, if the codec has one
    pub fn payload_type(&self) -> Option<u8> {
        match self {
            AudioCodec::Pcmu => Some(0),
            AudioCodec::Pcma => Some(8),
            AudioCodec::G722 => Some(9),
            AudioCodec::Opus => None,
        }
    }

    /// Codec name for SDP
    pub fn sdp_name(&self) -> &'static str {
        match self {
            AudioCodec::Pcmu => "PCMU",
            AudioCodec::Pcma => "PCMA",
            AudioCodec::G722 => "G722",
            AudioCodec::Opus => "opus",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "PCMU" | "ULAW" => Some(AudioCodec::Pcmu),
            "PCMA" | "ALAW" => Some(AudioCodec::Pcma),
            "G722" => Some(AudioCodec::G722),
            "OPUS" => Some(AudioCodec::Opus),
            _ => None,
        }
    }
}

/// Declarative override of the outbound codec order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecPreference {
    /// Codec name as it appears in the MIME type (e.g., "PCMU" for "audio/PCMU")
    pub name: String,
    /// Payload type used when the entry carries no recognizable name
    #[serde(default)]
    pub payload_type: Option<u8>,
}

impl CodecPreference {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            payload_type: None,
        }
    }

    /// Whether a negotiated entry carries the preferred codec name
    pub fn matches_name(&self, codec: &CodecParameters) -> bool {
        let subtype = codec
            .mime_type
            .rsplit('/')
            .next()
            .unwrap_or(codec.mime_type.as_str());

        !self.name.is_empty() && subtype.eq_ignore_ascii_case(&self.name)
    }

    /// Whether a negotiated entry carries the fallback payload type
    pub fn matches_payload_type(&self, codec: &CodecParameters) -> bool {
        matches!(
            (self.payload_type, codec.payload_type),
            (Some(wanted), Some(actual)) if wanted == actual
        )
    }

    /// Move the preferred codec to the front, keeping the rest in order.
    ///
    /// Entries are matched by name; the payload type is consulted only when no entry
    /// carries the name. Returns `None` when nothing needs to change: the preferred codec
    /// is absent or already first.
    pub fn reorder(&self, params: &AudioParameters) -> Option<AudioParameters> {
        let index = params
            .codecs
            .iter()
            .position(|c| self.matches_name(c))
            .or_else(|| params.codecs.iter().position(|c| self.matches_payload_type(c)))?;
        if index == 0 {
            return None;
        }

        let mut reordered = params.clone();
        let preferred = reordered.codecs.remove(index);
        reordered.codecs.insert(0, preferred);
        Some(reordered)
    }
}

impl From<AudioCodec> for CodecPreference {
    fn from(codec: AudioCodec) -> Self {
        Self {
            name: codec.sdp_name().to_string(),
            payload_type: codec.payload_type(),
        }
    }
}

/// One negotiated codec entry of an outbound media direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecParameters {
    /// MIME type (e.g., "audio/PCMU")
    pub mime_type: String,
    pub payload_type: Option<u8>,
    pub clock_rate: u32,
    #[serde(default)]
    pub channels: Option<u8>,
    #[serde(default)]
    pub sdp_fmtp_line: Option<String>,
}

impl CodecParameters {
    pub fn new(mime_type: &str, payload_type: Option<u8>, clock_rate: u32) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            payload_type,
            clock_rate,
            channels: None,
            sdp_fmtp_line: None,
        }
    }
}

/// Outbound audio parameter set, in priority order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioParameters {
    pub codecs: Vec<CodecParameters>,
}
