//! Registration state machine
//!
//! Tracks the user agent's presence with the registrar. Transitions come from transport
//! lifecycle events or an explicit unregister; lease renewal belongs to the transport.

use serde::{Deserialize, Serialize};

use super::SipError;

/// Registration state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RegistrationState {
    /// Not registered
    #[default]
    Unregistered,
    /// REGISTER sent, awaiting the registrar
    Registering,
    /// Registered and ready for calls
    Registered,
    /// Registration failed
    Failed,
}

impl std::fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationState::Unregistered => write!(f, "Unregistered"),
            RegistrationState::Registering => write!(f, "Registering"),
            RegistrationState::Registered => write!(f, "Registered"),
            RegistrationState::Failed => write!(f, "Failed"),
        }
    }
}

/// Registration lifecycle for one engine
#[derive(Debug, Default)]
pub(crate) struct RegistrationMachine {
    state: RegistrationState,
}

impl RegistrationMachine {
    pub fn state(&self) -> RegistrationState {
        self.state
    }

    pub fn is_registered(&self) -> bool {
        self.state == RegistrationState::Registered
    }

    /// Check that a new attempt may start
    pub fn check_can_register(&self) -> Result<(), SipError> {
        match self.state {
            RegistrationState::Unregistered | RegistrationState::Failed => Ok(()),
            other => Err(SipError::InvalidState(format!(
                "Cannot register while {}",
                other
            ))),
        }
    }

    /// Unregistered/Failed -> Registering
    pub fn begin(&mut self) -> Result<RegistrationState, SipError> {
        self.check_can_register()?;
        Ok(self.set(RegistrationState::Registering))
    }

    /// Registrar acknowledged. Refreshes while registered are not transitions.
    pub fn on_registered(&mut self) -> Option<RegistrationState> {
        match self.state {
            RegistrationState::Registering => Some(self.set(RegistrationState::Registered)),
            _ => None,
        }
    }

    /// Rejection, re-registration failure or transport loss
    pub fn on_failed(&mut self) -> Option<RegistrationState> {
        match self.state {
            RegistrationState::Registering | RegistrationState::Registered => {
                Some(self.set(RegistrationState::Failed))
            }
            _ => None,
        }
    }

    /// Registrar dropped the binding without our asking
    pub fn on_unregistered(&mut self) -> Option<RegistrationState> {
        match self.state {
            RegistrationState::Registered => Some(self.set(RegistrationState::Unregistered)),
            _ => None,
        }
    }

    /// Explicit unregister always lands in Unregistered
    pub fn reset(&mut self) -> Option<RegistrationState> {
        if self.state == RegistrationState::Unregistered {
            return None;
        }
        Some(self.set(RegistrationState::Unregistered))
    }

    /// Set the state, returning the previous one
    fn set(&mut self, state: RegistrationState) -> RegistrationState {
        std::mem::replace(&mut self.state, state)
    }
}
