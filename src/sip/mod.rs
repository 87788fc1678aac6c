//! SIP signaling engine for the CRM softphone
//!
//! This module drives a browser-style softphone from Rust:
//! - Registration with a SIP registrar over a message-oriented transport
//! - A single outbound or inbound call session with hold, mute and DTMF
//! - Outbound codec-preference policy applied once media is negotiable
//! - A typed notification stream for UI layers
//!
//! Wire encoding and media plumbing are delegated to the injected
//! [`TransportAdapter`] and [`MediaGateway`] implementations.

mod config;
mod codec;
mod registration;
mod call;
mod events;
mod transport;
mod media;
mod user_agent;


pub use config::{DtmfOptions, IceServer, UserAgentConfig};
pub use codec::{AudioCodec, AudioParameters, CodecParameters, CodecPreference};
pub use registration::RegistrationState;
pub use call::{CallDirection, CallSnapshot, CallState};
pub use events::{Notification, NotificationKind, Subscription};
pub use transport::{ConnectionHandle, SignalingRequest, TransportAdapter, TransportError, TransportEvent};
pub use media::{LocalStream, MediaError, MediaEvent, MediaGateway, PeerHandle, RemoteStreamId};
pub use user_agent::{EngineInput, SignalingEngine};

use thiserror::Error;

/// SIP-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SipError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("User agent not configured")]
    NotConfigured,

    #[error("Not registered")]
    NotRegistered,

    #[error("No incoming session")]
    NoIncomingSession,

    #[error("No active call")]
    NoActiveCall,

    #[error("Media access denied: {0}")]
    MediaAccessDenied(String),

    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Call failed: {0}")]
    CallFailed(String),

    #[error("Call cancelled before media was attached")]
    CallCancelled,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    #[error("Invalid DTMF symbol: {0:?}")]
    InvalidDtmf(char),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Media error: {0}")]
    Media(String),
}

impl From<TransportError> for SipError {
    fn from(err: TransportError) -> Self {
        SipError::Transport(err.to_string())
    }
}

impl From<MediaError> for SipError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::AccessDenied(reason) => SipError::MediaAccessDenied(reason),
            other => SipError::Media(other.to_string()),
        }
    }
}
