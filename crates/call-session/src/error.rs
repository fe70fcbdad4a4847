use thiserror::Error;

use crate::event::{Identity, SignalKind};
use crate::state::CallState;

/// Failures reported by a [`crate::PeerLink`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerLinkError {
    #[error("peer connection closed")]
    Closed,
    #[error("invalid session description: {0}")]
    InvalidDescription(String),
    #[error("invalid ice candidate: {0}")]
    InvalidCandidate(String),
    #[error("peer connection error: {0}")]
    Backend(String),
}

/// Failures reported by a [`crate::MediaSource`] or a track.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("device unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("failed to publish {event}: {reason}")]
    SignalPublish { event: SignalKind, reason: String },
    #[error("could not acquire local media: {0}")]
    MediaAcquisition(#[from] MediaError),
    #[error("failed to apply remote description: {0}")]
    DescriptionApply(PeerLinkError),
    #[error("failed to apply ice candidate: {0}")]
    CandidateApply(PeerLinkError),
    #[error("a call is already in progress ({state})")]
    DuplicateCall { state: CallState },
    #[error("negotiation failed: {0}")]
    Negotiation(PeerLinkError),
    #[error("could not create peer connection: {0}")]
    PeerLink(PeerLinkError),
    #[error("no pending call from {sender} matches that offer")]
    UnknownOffer { sender: Identity },
    #[error("there is no outgoing call to cancel")]
    NotCalling,
    #[error("call setup was superseded")]
    SetupAborted,
    #[error("malformed signal payload: {0}")]
    Codec(String),
}

impl CallError {
    /// Whether the error ends the call attempt it occurred in.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CallError::MediaAcquisition(_)
                | CallError::DescriptionApply(_)
                | CallError::Negotiation(_)
                | CallError::PeerLink(_)
        )
    }

    /// Whether the error should reach the user as a notice.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, CallError::SetupAborted | CallError::Codec(_))
    }
}
