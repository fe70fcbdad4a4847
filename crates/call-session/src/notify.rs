use std::fmt;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::CallError;
use crate::event::Identity;
use crate::media::MediaTrack;
use crate::registry::PendingOffer;
use crate::state::CallState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// User-facing notification raised by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Calling { label: String },
    IncomingCall { from: String },
    CallConnected { peer: Identity },
    CallCancelledByCaller { from: Identity },
    CallCancelled,
    CallRejected { by: Identity },
    CallDeclined { caller: String },
    RemoteHangup { by: Identity },
    CallEnded,
    ConnectionInterrupted,
    ConnectionFailed,
    Failure(CallError),
}

impl Notice {
    pub fn level(&self) -> NoticeLevel {
        match self {
            Notice::Calling { .. } | Notice::IncomingCall { .. } | Notice::CallEnded => NoticeLevel::Info,
            Notice::CallConnected { .. } => NoticeLevel::Success,
            Notice::CallCancelledByCaller { .. }
            | Notice::CallCancelled
            | Notice::CallRejected { .. }
            | Notice::CallDeclined { .. }
            | Notice::RemoteHangup { .. }
            | Notice::ConnectionInterrupted => NoticeLevel::Warning,
            Notice::ConnectionFailed | Notice::Failure(_) => NoticeLevel::Error,
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Calling { label } => write!(f, "Calling {label}..."),
            Notice::IncomingCall { from } => write!(f, "Incoming call from {from}"),
            Notice::CallConnected { peer } => write!(f, "Connected to {peer}"),
            Notice::CallCancelledByCaller { .. } => f.write_str("Call cancelled by caller."),
            Notice::CallCancelled => f.write_str("Call cancelled."),
            Notice::CallRejected { .. } => f.write_str("The other user declined the call."),
            Notice::CallDeclined { caller } => write!(f, "Declined call from {caller}."),
            Notice::RemoteHangup { .. } => f.write_str("The other user ended the call."),
            Notice::CallEnded => f.write_str("Call ended."),
            Notice::ConnectionInterrupted => f.write_str("Connection interrupted."),
            Notice::ConnectionFailed => f.write_str("Connection failed."),
            Notice::Failure(err) => write!(f, "{err}"),
        }
    }
}

/// Receives everything a UI layer needs to render a session. Callbacks run
/// on the session's task and must not block.
pub trait CallObserver: Send + Sync {
    fn on_state_changed(&self, _state: &CallState) {}
    fn on_incoming_calls_changed(&self, _pending: &[PendingOffer]) {}
    fn on_notice(&self, _notice: &Notice) {}
    fn on_remote_track(&self, _track: &Arc<dyn MediaTrack>) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl CallObserver for NullObserver {}

/// Logs every callback; useful for headless runs.
#[derive(Debug, Clone)]
pub struct TracingObserver {
    label: String,
}

impl TracingObserver {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

impl CallObserver for TracingObserver {
    fn on_state_changed(&self, state: &CallState) {
        info!(target = "call.observer", who = %self.label, state = %state, "state changed");
    }

    fn on_incoming_calls_changed(&self, pending: &[PendingOffer]) {
        info!(
            target = "call.observer",
            who = %self.label,
            pending = pending.len(),
            "incoming calls changed"
        );
    }

    fn on_notice(&self, notice: &Notice) {
        match notice.level() {
            NoticeLevel::Info | NoticeLevel::Success => {
                info!(target = "call.observer", who = %self.label, "{notice}")
            }
            NoticeLevel::Warning => warn!(target = "call.observer", who = %self.label, "{notice}"),
            NoticeLevel::Error => error!(target = "call.observer", who = %self.label, "{notice}"),
        }
    }

    fn on_remote_track(&self, track: &Arc<dyn MediaTrack>) {
        info!(
            target = "call.observer",
            who = %self.label,
            track = track.id(),
            kind = %track.kind(),
            "remote track attached"
        );
    }
}
