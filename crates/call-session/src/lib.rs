//! Signaling-session manager for two-party peer-to-peer calls.
//!
//! [`CallSession`] turns an unordered, at-least-once stream of signaling
//! events into a correctly sequenced offer/answer handshake over a
//! [`PeerLink`], buffering ICE candidates that arrive early and tearing the
//! link down on every exit path. [`CallDriver`] binds a session to a
//! [`signal_bus::SignalBus`] channel.

pub mod config;
pub mod driver;
pub mod error;
pub mod event;
pub mod ice_queue;
pub mod media;
pub mod mock;
pub mod notify;
pub mod peer;
pub mod registry;
pub mod session;
pub mod state;

pub use config::{IceServer, SessionConfig};
pub use driver::CallDriver;
pub use error::{CallError, MediaError, PeerLinkError};
pub use event::{Identity, IceCandidate, SdpType, SessionDescription, SignalBody, SignalEvent, SignalKind};
pub use ice_queue::{DrainReport, IceCandidateQueue};
pub use media::{LocalMedia, MediaConstraints, MediaKind, MediaSource, MediaTrack, RemoteMedia};
pub use notify::{CallObserver, Notice, NoticeLevel, NullObserver, TracingObserver};
pub use peer::{ConnectionState, LinkEvent, LinkId, PeerEvent, PeerEventSink, PeerLink, PeerLinkFactory};
pub use registry::{IncomingCallRegistry, OfferKey, PendingOffer};
pub use session::{CallSession, LocalIdentity};
pub use state::CallState;
