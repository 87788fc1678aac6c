//! Transport adapter contract
//!
//! The adapter owns the signaling socket (SIP over WebSocket in the browser softphone) and
//! the wire grammar. The engine speaks to it in requests and hears back events; it never
//! sees bytes. Lease refresh and response timeouts are the adapter's job.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Not connected")]
    NotConnected,
}

/// Open signaling channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub endpoint: String,
}

impl ConnectionHandle {
    pub fn new(endpoint: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            endpoint: endpoint.to_string(),
        }
    }
}

/// Outbound signaling request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingRequest {
    /// REGISTER with the configured lease
    Register {
        aor: String,
        registrar: String,
        expires: u32,
        authorization_user: String,
        password: String,
        display_name: Option<String>,
        user_agent: String,
    },
    /// REGISTER with a zero lease
    Unregister,
    /// New outbound session
    Invite {
        session_id: Uuid,
        target: String,
        display_name: Option<String>,
    },
    /// Accept an inbound session
    Answer { session_id: Uuid },
    /// Abandon an outbound session before it was answered
    Cancel { session_id: Uuid },
    /// End an established session
    Bye { session_id: Uuid },
    /// Refuse an inbound session
    Reject { session_id: Uuid, status: u16 },
    /// Put the remote party on hold
    Hold { session_id: Uuid },
    /// Resume from hold
    Unhold { session_id: Uuid },
    /// Send a DTMF tone
    Dtmf {
        session_id: Uuid,
        digit: char,
        duration_ms: u32,
        inter_tone_gap_ms: u32,
    },
}

impl SignalingRequest {
    /// Short method-like name for logs
    pub fn name(&self) -> &'static str {
        match self {
            SignalingRequest::Register { .. } => "REGISTER",
            SignalingRequest::Unregister => "UNREGISTER",
            SignalingRequest::Invite { .. } => "INVITE",
            SignalingRequest::Answer { .. } => "ANSWER",
            SignalingRequest::Cancel { .. } => "CANCEL",
            SignalingRequest::Bye { .. } => "BYE",
            SignalingRequest::Reject { .. } => "REJECT",
            SignalingRequest::Hold { .. } => "HOLD",
            SignalingRequest::Unhold { .. } => "UNHOLD",
            SignalingRequest::Dtmf { .. } => "DTMF",
        }
    }
}

/// Inbound transport and signaling events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Signaling channel is up
    Connected,
    /// Signaling channel dropped
    Disconnected { reason: String },
    /// Registrar acknowledged the REGISTER (initial or refresh)
    Registered,
    /// Registrar rejected the REGISTER
    RegistrationFailed { cause: String },
    /// Lease refresh failed
    ReRegistrationFailed { cause: String },
    /// Binding removed by the registrar
    Unregistered,
    /// New inbound session offer
    IncomingSession {
        session_id: Uuid,
        remote_uri: String,
        display_name: Option<String>,
    },
    /// Provisional response (e.g., 180 Ringing)
    Progress { session_id: Uuid },
    /// Final 2xx sent or received
    Accepted { session_id: Uuid },
    /// ACK exchanged, dialog confirmed
    Confirmed { session_id: Uuid },
    /// Session ended normally
    Ended { session_id: Uuid, cause: String },
    /// Session failed
    Failed { session_id: Uuid, cause: String },
    /// Remote party sent a DTMF tone
    DtmfReceived { session_id: Uuid, digit: char },
}

#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Open the signaling channel
    async fn open(&self, endpoint: &str) -> Result<ConnectionHandle, TransportError>;

    /// Send a signaling request
    async fn send(&self, request: SignalingRequest) -> Result<(), TransportError>;

    /// Close the signaling channel
    async fn close(&self);
}
