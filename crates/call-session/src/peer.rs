use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::IceServer;
use crate::error::PeerLinkError;
use crate::event::{IceCandidate, SessionDescription};
use crate::media::MediaTrack;

/// Monotonic id the session assigns to each link it opens, so events from a
/// link that has since been torn down can be told apart.
pub type LinkId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone)]
pub enum PeerEvent {
    LocalCandidate(IceCandidate),
    RemoteTrack(Arc<dyn MediaTrack>),
    ConnectionStateChanged(ConnectionState),
}

#[derive(Debug, Clone)]
pub struct LinkEvent {
    pub link_id: LinkId,
    pub event: PeerEvent,
}

/// Handle a [`PeerLink`] uses to report asynchronous events back to the
/// session that owns it.
#[derive(Clone)]
pub struct PeerEventSink {
    link_id: LinkId,
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl PeerEventSink {
    pub fn new(link_id: LinkId, tx: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self { link_id, tx }
    }

    pub fn link_id(&self) -> LinkId {
        self.link_id
    }

    /// Returns false once the owning session has gone away.
    pub fn emit(&self, event: PeerEvent) -> bool {
        self.tx
            .send(LinkEvent {
                link_id: self.link_id,
                event,
            })
            .is_ok()
    }
}

impl fmt::Debug for PeerEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerEventSink")
            .field("link_id", &self.link_id)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// One peer-to-peer media connection.
#[async_trait]
pub trait PeerLink: Send + Sync {
    async fn add_local_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), PeerLinkError>;
    async fn create_offer(&self) -> Result<SessionDescription, PeerLinkError>;
    async fn create_answer(&self) -> Result<SessionDescription, PeerLinkError>;
    async fn set_local_description(&self, description: SessionDescription) -> Result<(), PeerLinkError>;
    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), PeerLinkError>;
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), PeerLinkError>;
    /// Idempotent.
    async fn close(&self) -> Result<(), PeerLinkError>;
}

#[async_trait]
pub trait PeerLinkFactory: Send + Sync {
    async fn create(
        &self,
        ice_servers: &[IceServer],
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerLink>, PeerLinkError>;
}
