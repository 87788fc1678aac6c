//! VoIP CRM Softphone
//!
//! SIP registration and call-session engine for the CRM's agent softphone.
//! The engine is transport- and media-agnostic: a WebSocket SIP stack and a
//! browser or native audio stack plug in through the adapter traits in [`sip`].

pub mod logging;
pub mod sip;
pub mod state;

pub use sip::{
    CallDirection, CallSnapshot, CallState, Notification, NotificationKind, RegistrationState,
    SignalingEngine, SipError, Subscription, UserAgentConfig,
};
pub use state::PhoneState;
