//! Client lifetime state machine using rust-fsm.
//!
//! Tracks whether the client currently holds an authenticated session, driven
//! by the auth events the client publishes.
//!
//! ```text
//! ┌───────────────────┐  SignedIn / SessionRestored / TokenRefreshed  ┌───────────────────┐
//! │  Unauthenticated  │ ────────────────────────────────────────────► │   Authenticated   │
//! │     (initial)     │ ◄──────────────────────────────────────────── │                   │
//! └───────────────────┘          SignedOut / SessionCleared           └───────────────────┘
//! ```
//!
//! `SessionCleared` has no event: it follows the silent local clear that
//! starts every sign-in flow.

use crate::events::AuthChangeEvent;
use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub client_machine(Unauthenticated)

    Unauthenticated => {
        SignedIn => Authenticated,
        SessionRestored => Authenticated,
        TokenRefreshed => Authenticated,
        PasswordRecovery => Authenticated,
        SignedOut => Unauthenticated,
        SessionCleared => Unauthenticated
    },
    Authenticated => {
        SignedIn => Authenticated,
        SessionRestored => Authenticated,
        TokenRefreshed => Authenticated,
        UserUpdated => Authenticated,
        PasswordRecovery => Authenticated,
        SignedOut => Unauthenticated,
        SessionCleared => Unauthenticated
    }
}

pub use client_machine::Input as ClientMachineInput;
pub use client_machine::State as ClientMachineState;
pub use client_machine::StateMachine as ClientMachine;

/// Whether the client holds a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    Unauthenticated,
    Authenticated,
}

impl ClientState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, ClientState::Authenticated)
    }
}

impl From<&ClientMachineState> for ClientState {
    fn from(state: &ClientMachineState) -> Self {
        match state {
            ClientMachineState::Unauthenticated => ClientState::Unauthenticated,
            ClientMachineState::Authenticated => ClientState::Authenticated,
        }
    }
}

/// Machine input for a published event. `INITIAL_SESSION` is per-listener
/// and does not drive the machine.
pub fn input_for(event: AuthChangeEvent) -> Option<ClientMachineInput> {
    match event {
        AuthChangeEvent::InitialSession => None,
        AuthChangeEvent::SignedIn => Some(ClientMachineInput::SignedIn),
        AuthChangeEvent::SignedOut => Some(ClientMachineInput::SignedOut),
        AuthChangeEvent::TokenRefreshed => Some(ClientMachineInput::TokenRefreshed),
        AuthChangeEvent::UserUpdated => Some(ClientMachineInput::UserUpdated),
        AuthChangeEvent::PasswordRecovery => Some(ClientMachineInput::PasswordRecovery),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_unauthenticated() {
        let machine = ClientMachine::new();
        assert_eq!(*machine.state(), ClientMachineState::Unauthenticated);
        assert!(!ClientState::from(machine.state()).is_authenticated());
    }

    #[test]
    fn test_sign_in_and_out() {
        let mut machine = ClientMachine::new();

        machine.consume(&ClientMachineInput::SignedIn).unwrap();
        assert_eq!(*machine.state(), ClientMachineState::Authenticated);

        machine.consume(&ClientMachineInput::TokenRefreshed).unwrap();
        machine.consume(&ClientMachineInput::UserUpdated).unwrap();
        assert_eq!(*machine.state(), ClientMachineState::Authenticated);

        machine.consume(&ClientMachineInput::SignedOut).unwrap();
        assert_eq!(*machine.state(), ClientMachineState::Unauthenticated);
    }

    #[test]
    fn test_restored_session_authenticates() {
        let mut machine = ClientMachine::new();
        machine.consume(&ClientMachineInput::SessionRestored).unwrap();
        assert_eq!(
            ClientState::from(machine.state()),
            ClientState::Authenticated
        );
    }

    #[test]
    fn test_user_update_requires_session() {
        let mut machine = ClientMachine::new();
        assert!(machine.consume(&ClientMachineInput::UserUpdated).is_err());
        assert_eq!(*machine.state(), ClientMachineState::Unauthenticated);
    }

    #[test]
    fn test_sign_out_when_unauthenticated_is_allowed() {
        let mut machine = ClientMachine::new();
        machine.consume(&ClientMachineInput::SignedOut).unwrap();
        assert_eq!(*machine.state(), ClientMachineState::Unauthenticated);
    }

    #[test]
    fn test_silent_clear_unauthenticates() {
        let mut machine = ClientMachine::new();
        machine.consume(&ClientMachineInput::SignedIn).unwrap();
        machine.consume(&ClientMachineInput::SessionCleared).unwrap();
        assert_eq!(*machine.state(), ClientMachineState::Unauthenticated);

        machine.consume(&ClientMachineInput::SessionCleared).unwrap();
        assert_eq!(*machine.state(), ClientMachineState::Unauthenticated);
    }

    #[test]
    fn test_event_inputs() {
        assert_eq!(input_for(AuthChangeEvent::InitialSession), None);
        assert_eq!(
            input_for(AuthChangeEvent::SignedOut),
            Some(ClientMachineInput::SignedOut)
        );
    }

    #[test]
    fn test_client_state_serialization() {
        let json = serde_json::to_string(&ClientState::Authenticated).unwrap();
        assert_eq!(json, "\"authenticated\"");
    }
}
