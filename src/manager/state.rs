//! Connection attempt state machine
//!
//! One `get_connection_with` call walks these states. The only backward edge is
//! `AuthFailed -> Authenticating`, and [`ConnectAttempt`] allows it once.

use crate::error::{DbcError, Result};

/// Connection attempt state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    /// Nothing done yet
    Start,

    /// Establishing the tunnel
    TunnelConnecting,

    /// Looking up the driver implementation
    DriverResolving,

    /// Picking the password for the next open
    Authenticating,

    /// Driver open in progress
    Opening,

    /// The server rejected the credentials
    AuthFailed,

    /// Running the caller's init callback
    InitCallback,

    /// Connection handed back
    Ready,

    /// Terminal failure
    Failed,
}

impl ConnectState {
    /// Check if transition is valid
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        use ConnectState::*;

        matches!(
            (self, next),
            (Start, TunnelConnecting)
                | (Start, DriverResolving)
                | (TunnelConnecting, DriverResolving)
                | (DriverResolving, Authenticating)
                | (Authenticating, Opening)
                | (Opening, AuthFailed)
                | (Opening, InitCallback)
                | (Opening, Ready)
                | (AuthFailed, Authenticating)
                | (InitCallback, Ready)
        ) || (next == Failed && !self.is_terminal())
    }

    /// `Ready` and `Failed` end the attempt
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

impl std::fmt::Display for ConnectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::TunnelConnecting => write!(f, "tunnel_connecting"),
            Self::DriverResolving => write!(f, "driver_resolving"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Opening => write!(f, "opening"),
            Self::AuthFailed => write!(f, "auth_failed"),
            Self::InitCallback => write!(f, "init_callback"),
            Self::Ready => write!(f, "ready"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// State of one connection attempt, including the retry budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectAttempt {
    state: ConnectState,
    retried: bool,
}

impl Default for ConnectAttempt {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectAttempt {
    #[must_use]
    pub const fn new() -> Self {
        Self { state: ConnectState::Start, retried: false }
    }

    #[must_use]
    pub const fn state(&self) -> ConnectState {
        self.state
    }

    /// Whether the authentication retry is still available
    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.state == ConnectState::AuthFailed && !self.retried
    }

    /// Transition to new state
    pub fn transition(&mut self, next: ConnectState) -> Result<()> {
        let retry = self.state == ConnectState::AuthFailed && next == ConnectState::Authenticating;
        if !self.state.can_transition_to(next) || (retry && self.retried) {
            return Err(DbcError::InvalidState {
                expected: format!("valid transition from {}", self.state),
                actual: next.to_string(),
            });
        }
        if retry {
            self.retried = true;
        }
        self.state = next;
        Ok(())
    }

    /// Move to `Failed` unless the attempt already ended
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = ConnectState::Failed;
        }
    }
}
