//! SIP Call Management
//!
//! The single call session the softphone may own, and the state machine it moves through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::media::{LocalStream, PeerHandle, RemoteStreamId};
use super::SipError;

/// Call direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    /// Outbound call (we initiated)
    Outbound,
    /// Inbound call (we received)
    Inbound,
}

/// Call state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CallState {
    /// No call
    #[default]
    Idle,
    /// Session is being set up
    Connecting,
    /// Remote party is ringing, or we are ringing
    Progressing,
    /// Call is connected and active
    Established,
    /// Call is on hold
    Hold,
    /// Call is being terminated
    Terminating,
    /// Call has ended
    Terminated,
}

impl CallState {
    /// States in which hold and mute are meaningful
    pub fn is_active(&self) -> bool {
        matches!(self, CallState::Established | CallState::Hold)
    }

    pub fn can_transition_to(&self, next: CallState) -> bool {
        use CallState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Progressing)
                | (Connecting, Established)
                | (Progressing, Connecting)
                | (Progressing, Established)
                | (Established, Hold)
                | (Hold, Established)
                | (Connecting | Progressing | Established | Hold, Terminating)
                | (Terminating, Terminated)
                | (Terminated, Idle)
        )
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallState::Idle => write!(f, "Idle"),
            CallState::Connecting => write!(f, "Connecting"),
            CallState::Progressing => write!(f, "Progressing"),
            CallState::Established => write!(f, "Established"),
            CallState::Hold => write!(f, "Hold"),
            CallState::Terminating => write!(f, "Terminating"),
            CallState::Terminated => write!(f, "Terminated"),
        }
    }
}

/// The active (or most recently active) call
#[derive(Debug)]
pub(crate) struct CallSession {
    /// Session identifier shared with the transport
    pub id: Uuid,
    /// Call direction
    pub direction: CallDirection,
    /// Remote party URI
    pub remote_uri: String,
    /// Remote display name
    pub display_name: Option<String>,
    /// Owned capture stream; `None` once released
    pub local_stream: Option<LocalStream>,
    /// Remote stream lookup handle
    pub remote_stream: Option<RemoteStreamId>,
    /// Peer media session
    pub peer: Option<PeerHandle>,
    pub on_hold: bool,
    pub muted: bool,
    /// Inbound call is between answer() and confirmation
    pub answering: bool,
    /// Inbound call has been accepted on the wire
    pub answer_sent: bool,
    /// A request for this session is on the wire
    pub signaling_started: bool,
    /// Codec preference already applied
    pub codec_applied: bool,
    /// Fired when the session is torn down while a command is suspended
    pub cancel: CancellationToken,
    /// Fired once an in-flight local audio acquisition has settled
    pub acquisition: Option<CancellationToken>,
    pub started_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl CallSession {
    /// Create a new outbound call
    pub fn new_outbound(remote_uri: String) -> Self {
        Self::new(Uuid::new_v4(), CallDirection::Outbound, remote_uri, None)
    }

    /// Create a new inbound call
    pub fn new_inbound(id: Uuid, remote_uri: String, display_name: Option<String>) -> Self {
        let mut session = Self::new(id, CallDirection::Inbound, remote_uri, display_name);
        session.signaling_started = true;
        session
    }

    fn new(
        id: Uuid,
        direction: CallDirection,
        remote_uri: String,
        display_name: Option<String>,
    ) -> Self {
        Self {
            id,
            direction,
            remote_uri,
            display_name,
            local_stream: None,
            remote_stream: None,
            peer: None,
            on_hold: false,
            muted: false,
            answering: false,
            answer_sent: false,
            signaling_started: false,
            codec_applied: false,
            cancel: CancellationToken::new(),
            acquisition: None,
            started_at: Utc::now(),
            connected_at: None,
        }
    }

    /// User part of the remote URI (the dialed or calling number)
    pub fn remote_number(&self) -> String {
        let without_scheme = self
            .remote_uri
            .trim_start_matches("sips:")
            .trim_start_matches("sip:");
        without_scheme
            .split('@')
            .next()
            .unwrap_or(without_scheme)
            .to_string()
    }

    fn snapshot(&self, state: CallState) -> CallSnapshot {
        let duration_seconds = self
            .connected_at
            .map(|at| (Utc::now() - at).num_seconds().max(0) as u64)
            .unwrap_or(0);

        CallSnapshot {
            id: self.id,
            direction: self.direction,
            state,
            remote_uri: self.remote_uri.clone(),
            remote_number: self.remote_number(),
            display_name: self.display_name.clone(),
            on_hold: self.on_hold,
            muted: self.muted,
            local_stream: self.local_stream.as_ref().map(LocalStream::id),
            remote_stream: self.remote_stream,
            started_at: self.started_at,
            connected_at: self.connected_at,
            duration_seconds,
        }
    }
}

/// Read-only view of the current call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSnapshot {
    pub id: Uuid,
    pub direction: CallDirection,
    pub state: CallState,
    pub remote_uri: String,
    pub remote_number: String,
    pub display_name: Option<String>,
    pub on_hold: bool,
    pub muted: bool,
    /// Local capture stream, `None` when released or not yet acquired
    pub local_stream: Option<Uuid>,
    pub remote_stream: Option<RemoteStreamId>,
    pub started_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub duration_seconds: u64,
}

/// Call state plus the at-most-one session
#[derive(Debug, Default)]
pub(crate) struct CallMachine {
    state: CallState,
    session: Option<CallSession>,
}

impl CallMachine {
    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&CallSession> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut CallSession> {
        self.session.as_mut()
    }

    /// The session, if it is the one identified by `id`
    pub fn current(&mut self, id: Uuid) -> Option<&mut CallSession> {
        self.session.as_mut().filter(|s| s.id == id)
    }

    pub fn is_current(&self, id: Uuid) -> bool {
        self.session.as_ref().map(|s| s.id == id).unwrap_or(false)
    }

    pub fn snapshot(&self) -> Option<CallSnapshot> {
        self.session.as_ref().map(|s| s.snapshot(self.state))
    }

    /// Adopt a new session: Idle -> Connecting
    pub fn start(&mut self, session: CallSession) -> Result<CallState, SipError> {
        if self.session.is_some() {
            return Err(SipError::InvalidState("A call session already exists".to_string()));
        }
        let previous = self.transition(CallState::Connecting)?;
        self.session = Some(session);
        Ok(previous)
    }

    /// Apply a transition, returning the previous state
    pub fn transition(&mut self, next: CallState) -> Result<CallState, SipError> {
        if !self.state.can_transition_to(next) {
            return Err(SipError::InvalidState(format!(
                "Cannot move call from {} to {}",
                self.state, next
            )));
        }
        let previous = std::mem::replace(&mut self.state, next);
        if next == CallState::Established {
            if let Some(session) = self.session.as_mut() {
                session.connected_at.get_or_insert_with(Utc::now);
            }
        }
        Ok(previous)
    }

    /// Detach the session for teardown
    pub fn take_session(&mut self) -> Option<CallSession> {
        self.session.take()
    }
}

/// Validate a DTMF symbol, normalizing A-D to upper case
pub(crate) fn validate_dtmf(digit: char) -> Result<char, SipError> {
    let digit = digit.to_ascii_uppercase();
    match digit {
        '0'..='9' | '*' | '#' | 'A'..='D' => Ok(digit),
        _ => Err(SipError::InvalidDtmf(digit)),
    }
}
