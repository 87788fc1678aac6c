//! Softphone view state
//!
//! A plain value folded from the engine's notification stream. UI layers keep one
//! per softphone and re-render from its flags and labels.

use uuid::Uuid;

use crate::sip::{CallState, Notification, RegistrationState, RemoteStreamId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhoneState {
    pub registration: RegistrationState,
    pub is_connecting: bool,
    pub is_connected: bool,
    pub call_state: CallState,
    pub session_id: Option<Uuid>,
    /// An inbound call is waiting to be answered
    pub is_ringing: bool,
    pub incoming_caller: Option<String>,
    pub caller_number: Option<String>,
    pub is_muted: bool,
    pub is_on_hold: bool,
    pub remote_stream: Option<RemoteStreamId>,
    pub received_digits: String,
    pub last_error: Option<String>,
}

impl PhoneState {
    /// Fold one notification into the view
    pub fn apply(&mut self, notification: &Notification) {
        match notification {
            Notification::RegistrationStateChanged { current, .. } => {
                self.registration = *current;
                self.is_connecting = *current == RegistrationState::Registering;
                self.is_connected = *current == RegistrationState::Registered;
                if self.is_connected {
                    self.last_error = None;
                }
            }
            Notification::RegistrationFailed { cause } => {
                self.last_error = Some(cause.clone());
            }
            Notification::CallStateChanged {
                session_id,
                current,
                ..
            } => {
                self.call_state = *current;
                if *current != CallState::Progressing {
                    self.is_ringing = false;
                }
                match current {
                    CallState::Idle => self.end_call(),
                    CallState::Connecting if self.session_id != Some(*session_id) => {
                        self.end_call();
                        self.session_id = Some(*session_id);
                    }
                    CallState::Established => self.is_on_hold = false,
                    CallState::Hold => self.is_on_hold = true,
                    _ => {}
                }
            }
            Notification::IncomingCall {
                session_id,
                display_name,
                number,
            } => {
                self.session_id = Some(*session_id);
                self.is_ringing = true;
                self.incoming_caller = Some(display_name.clone().unwrap_or_else(|| number.clone()));
                self.caller_number = Some(number.clone());
            }
            Notification::RemoteStream { stream, .. } => {
                self.remote_stream = Some(*stream);
            }
            Notification::Mute { muted, .. } => {
                self.is_muted = *muted;
            }
            Notification::DtmfReceived { digit, .. } => {
                self.received_digits.push(*digit);
            }
            Notification::CallFailed { cause, .. } => {
                self.last_error = Some(cause.clone());
            }
        }
    }

    pub fn is_in_call(&self) -> bool {
        !matches!(
            self.call_state,
            CallState::Idle | CallState::Terminated
        )
    }

    /// Headline for the phone widget
    pub fn status_label(&self) -> &'static str {
        if self.is_in_call() {
            return match self.call_state {
                CallState::Connecting => "Connecting...",
                CallState::Progressing if self.is_ringing => "Incoming Call",
                CallState::Progressing => "Ringing...",
                CallState::Established => "Connected",
                CallState::Hold => "On Hold",
                _ => "Call Ended",
            };
        }

        match self.registration {
            RegistrationState::Unregistered => "Offline",
            RegistrationState::Registering => "Connecting...",
            RegistrationState::Registered => "Ready",
            RegistrationState::Failed => "Registration Failed",
        }
    }

    fn end_call(&mut self) {
        self.session_id = None;
        self.is_ringing = false;
        self.incoming_caller = None;
        self.caller_number = None;
        self.is_muted = false;
        self.is_on_hold = false;
        self.remote_stream = None;
        self.received_digits.clear();
    }
}
