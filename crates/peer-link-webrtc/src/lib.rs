//! [`call_session::PeerLink`] backed by the `webrtc` crate.
//!
//! Local tracks are produced by [`SyntheticMediaSource`], which registers
//! each track's RTP writer in a [`TrackTable`] shared with the
//! [`WebRtcPeerLinkFactory`]; a link looks tracks up there by id when the
//! session attaches them.

mod convert;
mod link;
mod source;
mod track;

use thiserror::Error;

pub use link::{WebRtcPeerLink, WebRtcPeerLinkFactory};
pub use source::SyntheticMediaSource;
pub use track::{TrackTable, WebRtcLocalTrack, WebRtcRemoteTrack};

#[derive(Debug, Error)]
pub enum WebRtcError {
    #[error("webrtc setup failed: {0}")]
    Setup(#[from] webrtc::Error),
}
