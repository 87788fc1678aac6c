//! User Agent Configuration
//!
//! Identity and transport settings for registering the softphone with a SIP registrar.

use serde::{Deserialize, Serialize};

use super::codec::{AudioCodec, CodecPreference};
use super::SipError;

/// Default registration lease in seconds
pub const DEFAULT_REGISTER_EXPIRES: u32 = 600;

/// STUN/TURN server handed to the media gateway when a peer session is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: None,
            credential: None,
        }
    }
}

/// Tone timing for outbound DTMF
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtmfOptions {
    /// Tone duration in milliseconds
    pub duration_ms: u32,
    /// Pause between consecutive tones in milliseconds
    pub inter_tone_gap_ms: u32,
}

impl Default for DtmfOptions {
    fn default() -> Self {
        Self {
            duration_ms: 100,
            inter_tone_gap_ms: 70,
        }
    }
}

/// Softphone user agent configuration
///
/// Immutable once handed to the engine; replacing it tears the active agent down first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAgentConfig {
    /// SIP domain (e.g., "example.com")
    pub domain: String,

    /// Signaling endpoint (e.g., "wss://sbc.example.com/ws")
    pub ws_uri: String,

    /// Authorization identity / extension (e.g., "1001")
    pub authorization_user: String,

    /// SIP password
    #[serde(default)]
    pub password: String,

    /// Display name sent with outbound requests
    #[serde(default)]
    pub display_name: Option<String>,

    /// Registration expiry in seconds
    #[serde(default = "default_register_expires")]
    pub register_expires: u32,

    /// Verbose signaling traces
    #[serde(default)]
    pub debug: bool,

    /// Check microphone access before registering
    #[serde(default = "default_true")]
    pub media_preflight: bool,

    /// Outbound codec to move to the front once media is negotiable
    #[serde(default = "default_codec_preference")]
    pub codec_preference: Option<CodecPreference>,

    /// ICE servers for peer sessions
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServer>,

    /// Outbound DTMF timing
    #[serde(default)]
    pub dtmf: DtmfOptions,

    /// User agent string
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_register_expires() -> u32 {
    DEFAULT_REGISTER_EXPIRES
}

fn default_true() -> bool {
    true
}

fn default_codec_preference() -> Option<CodecPreference> {
    Some(CodecPreference::from(AudioCodec::Pcmu))
}

fn default_ice_servers() -> Vec<IceServer> {
    vec![IceServer::stun("stun:stun.l.google.com:19302")]
}

fn default_user_agent() -> String {
    "VoIP-CRM/1.0 (Rust)".to_string()
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            ws_uri: String::new(),
            authorization_user: String::new(),
            password: String::new(),
            display_name: None,
            register_expires: DEFAULT_REGISTER_EXPIRES,
            debug: false,
            media_preflight: true,
            codec_preference: default_codec_preference(),
            ice_servers: default_ice_servers(),
            dtmf: DtmfOptions::default(),
            user_agent: default_user_agent(),
        }
    }
}

impl UserAgentConfig {
    pub fn new(domain: &str, ws_uri: &str, authorization_user: &str, password: &str) -> Self {
        Self {
            domain: domain.to_string(),
            ws_uri: ws_uri.to_string(),
            authorization_user: authorization_user.to_string(),
            password: password.to_string(),
            ..Self::default()
        }
    }

    /// Parse a stored softphone profile
    pub fn from_json(json: &str) -> Result<Self, SipError> {
        serde_json::from_str(json).map_err(|e| SipError::InvalidConfig(e.to_string()))
    }

    /// Create config from environment variables (loads `.env` when present)
    pub fn from_env() -> Option<Self> {
        dotenvy::dotenv().ok();

        let domain = std::env::var("SOFTPHONE_DOMAIN").ok()?;
        let ws_uri = std::env::var("SOFTPHONE_WS_URI").ok()?;
        let authorization_user = std::env::var("SOFTPHONE_USER").ok()?;
        let password = std::env::var("SOFTPHONE_PASSWORD").ok()?;

        let mut config = Self::new(&domain, &ws_uri, &authorization_user, &password);

        config.display_name = std::env::var("SOFTPHONE_DISPLAY_NAME").ok();
        config.register_expires = std::env::var("SOFTPHONE_REGISTER_EXPIRES")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_REGISTER_EXPIRES);
        config.debug = matches!(
            std::env::var("SOFTPHONE_DEBUG")
                .unwrap_or_default()
                .to_lowercase()
                .as_str(),
            "1" | "true" | "yes"
        );

        if let Ok(codec) = std::env::var("SOFTPHONE_CODEC") {
            config.codec_preference = match codec.to_uppercase().as_str() {
                "" | "NONE" => None,
                name => Some(
                    AudioCodec::from_name(name)
                        .map(CodecPreference::from)
                        .unwrap_or_else(|| CodecPreference::named(name)),
                ),
            };
        }

        if let Ok(stun) = std::env::var("SOFTPHONE_STUN") {
            config.ice_servers = stun
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(IceServer::stun)
                .collect();
        }

        Some(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), SipError> {
        if self.ws_uri.trim().is_empty() {
            return Err(SipError::InvalidConfig("Transport endpoint is required".to_string()));
        }
        if self.authorization_user.trim().is_empty() {
            return Err(SipError::InvalidConfig("Authorization identity is required".to_string()));
        }
        if !(self.ws_uri.starts_with("ws://") || self.ws_uri.starts_with("wss://")) {
            return Err(SipError::InvalidConfig(format!(
                "Transport endpoint must be a ws:// or wss:// URI: {}",
                self.ws_uri
            )));
        }
        if self.domain.trim().is_empty() {
            return Err(SipError::InvalidConfig("SIP domain is required".to_string()));
        }
        if self.register_expires == 0 {
            return Err(SipError::InvalidConfig("Registration expiry must be positive".to_string()));
        }
        Ok(())
    }

    /// Get the SIP URI for registration
    pub fn registrar_uri(&self) -> String {
        format!("sip:{}", self.domain)
    }

    /// Get the address of record
    pub fn aor(&self) -> String {
        format!("sip:{}@{}", self.authorization_user, self.domain)
    }

    /// Build the request URI for a dialed destination
    pub fn target_uri(&self, destination: &str) -> Result<String, SipError> {
        let trimmed = destination.trim();

        let uri = if trimmed.starts_with("sip:") || trimmed.starts_with("sips:") {
            trimmed.to_string()
        } else {
            let cleaned: String = trimmed
                .chars()
                .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
                .collect();
            if cleaned.is_empty() {
                return Err(SipError::InvalidDestination(destination.to_string()));
            }
            if cleaned.contains('@') {
                format!("sip:{}", cleaned)
            } else {
                format!("sip:{}@{}", cleaned, self.domain)
            }
        };

        ftth_rsipstack::rsip::Uri::try_from(uri.clone())
            .map_err(|e| SipError::InvalidDestination(format!("{}: {:?}", destination, e)))?;

        Ok(uri)
    }
}
