//! Connection state machine.
//!
//! ```text
//! Created ──register──▶ Registered ──bind user──▶ Identified
//!    │                      │                         │
//!    └──────────────────────┴────────────┬────────────┘
//!                                        ▼
//!                                     Closing ──deregistered──▶ Closed
//! ```
//!
//! Only the connection task drives these transitions.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Created,
    Registered,
    Identified,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal connection transition {from} -> {to}")]
pub struct LifecycleError {
    pub from: ConnState,
    pub to: ConnState,
}

impl ConnState {
    pub fn can_transition(self, to: ConnState) -> bool {
        use ConnState::*;
        matches!(
            (self, to),
            (Created, Registered)
                | (Registered, Identified)
                | (Created | Registered | Identified, Closing)
                | (Closing, Closed)
        )
    }

    pub fn advance(self, to: ConnState) -> Result<ConnState, LifecycleError> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(LifecycleError { from: self, to })
        }
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnState::Created => "created",
            ConnState::Registered => "registered",
            ConnState::Identified => "identified",
            ConnState::Closing => "closing",
            ConnState::Closed => "closed",
        };
        f.write_str(name)
    }
}
