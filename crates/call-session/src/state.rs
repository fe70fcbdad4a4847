use std::fmt;

use crate::event::Identity;

/// Observable state of a call session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallState {
    Idle,
    /// Outbound offer published (or being prepared), waiting for an answer.
    Calling { target: Identity, label: String },
    /// No call in progress and `pending` inbound offers waiting on the user.
    RingingLocal { pending: usize },
    /// Descriptions are being exchanged with `peer`.
    Negotiating { peer: Identity },
    Active { peer: Identity },
}

impl CallState {
    pub fn name(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Calling { .. } => "calling",
            CallState::RingingLocal { .. } => "ringing",
            CallState::Negotiating { .. } => "negotiating",
            CallState::Active { .. } => "active",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, CallState::Idle)
    }

    /// A call is being placed or is connected; new calls are refused.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            CallState::Calling { .. } | CallState::Negotiating { .. } | CallState::Active { .. }
        )
    }

    pub fn peer(&self) -> Option<&Identity> {
        match self {
            CallState::Calling { target, .. } => Some(target),
            CallState::Negotiating { peer } | CallState::Active { peer } => Some(peer),
            CallState::Idle | CallState::RingingLocal { .. } => None,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Idle => f.write_str("idle"),
            CallState::Calling { label, .. } => write!(f, "calling {label}"),
            CallState::RingingLocal { pending } => write!(f, "ringing ({pending} pending)"),
            CallState::Negotiating { peer } => write!(f, "negotiating with {peer}"),
            CallState::Active { peer } => write!(f, "in call with {peer}"),
        }
    }
}
