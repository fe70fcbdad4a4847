use std::sync::Arc;

use async_trait::async_trait;
use call_session::{
    IceCandidate, IceServer, MediaTrack, PeerEvent, PeerEventSink, PeerLink, PeerLinkError, PeerLinkFactory,
    SessionDescription,
};
use tracing::{debug, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::WebRtcError;
use crate::convert;
use crate::track::{TrackTable, WebRtcRemoteTrack};

/// Builds one [`WebRtcPeerLink`] per call from a shared webrtc API instance.
pub struct WebRtcPeerLinkFactory {
    api: API,
    tracks: TrackTable,
}

impl WebRtcPeerLinkFactory {
    pub fn new(tracks: TrackTable) -> Result<Self, WebRtcError> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api, tracks })
    }
}

#[async_trait]
impl PeerLinkFactory for WebRtcPeerLinkFactory {
    async fn create(
        &self,
        ice_servers: &[IceServer],
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerLink>, PeerLinkError> {
        let config = RTCConfiguration {
            ice_servers: ice_servers.iter().map(convert::ice_server).collect(),
            ..Default::default()
        };
        let connection = self
            .api
            .new_peer_connection(config)
            .await
            .map_err(|err| PeerLinkError::Backend(err.to_string()))?;
        let link = WebRtcPeerLink::new(Arc::new(connection), events, self.tracks.clone());
        Ok(Arc::new(link))
    }
}

pub struct WebRtcPeerLink {
    connection: Arc<RTCPeerConnection>,
    tracks: TrackTable,
    link_id: u64,
}

impl WebRtcPeerLink {
    fn new(connection: Arc<RTCPeerConnection>, events: PeerEventSink, tracks: TrackTable) -> Self {
        let link_id = events.link_id();
        Self::install_handlers(&connection, events);
        debug!(target = "call.webrtc", link_id, "peer connection created");
        Self {
            connection,
            tracks,
            link_id,
        }
    }

    fn install_handlers(connection: &RTCPeerConnection, events: PeerEventSink) {
        let sink = events.clone();
        connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = sink.clone();
            Box::pin(async move {
                // `None` marks the end of gathering.
                let Some(candidate) = candidate else {
                    trace!(target = "call.webrtc", link_id = sink.link_id(), "ice gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        sink.emit(PeerEvent::LocalCandidate(convert::from_rtc_candidate(init)));
                    }
                    Err(err) => warn!(target = "call.webrtc", error = %err, "could not serialize local candidate"),
                }
            })
        }));

        let sink = events.clone();
        connection.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
                let sink = sink.clone();
                Box::pin(async move {
                    let remote: Arc<dyn MediaTrack> = WebRtcRemoteTrack::spawn(track);
                    debug!(target = "call.webrtc", link_id = sink.link_id(), track = remote.id(), "remote track");
                    sink.emit(PeerEvent::RemoteTrack(remote));
                })
            },
        ));

        let sink = events;
        connection.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let sink = sink.clone();
            Box::pin(async move {
                debug!(target = "call.webrtc", link_id = sink.link_id(), %state, "peer connection state");
                sink.emit(PeerEvent::ConnectionStateChanged(convert::connection_state(state)));
            })
        }));
    }
}

#[async_trait]
impl PeerLink for WebRtcPeerLink {
    async fn add_local_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), PeerLinkError> {
        let sample = self
            .tracks
            .get(track.id())
            .ok_or_else(|| PeerLinkError::Backend(format!("track {} has no rtp writer", track.id())))?;
        let local: Arc<dyn TrackLocal + Send + Sync> = sample;
        let sender = self
            .connection
            .add_track(local)
            .await
            .map_err(|err| convert::link_error(err, PeerLinkError::Backend))?;

        // RTCP has to be read for interceptors (NACK, reports) to work.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerLinkError> {
        let offer = self
            .connection
            .create_offer(None)
            .await
            .map_err(|err| convert::link_error(err, PeerLinkError::Backend))?;
        convert::from_rtc_description(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerLinkError> {
        let answer = self
            .connection
            .create_answer(None)
            .await
            .map_err(|err| convert::link_error(err, PeerLinkError::Backend))?;
        convert::from_rtc_description(answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), PeerLinkError> {
        let description = convert::to_rtc_description(description)?;
        self.connection
            .set_local_description(description)
            .await
            .map_err(|err| convert::link_error(err, PeerLinkError::InvalidDescription))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), PeerLinkError> {
        let description = convert::to_rtc_description(description)?;
        self.connection
            .set_remote_description(description)
            .await
            .map_err(|err| convert::link_error(err, PeerLinkError::InvalidDescription))
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), PeerLinkError> {
        self.connection
            .add_ice_candidate(convert::to_rtc_candidate(candidate))
            .await
            .map_err(|err| convert::link_error(err, PeerLinkError::InvalidCandidate))
    }

    async fn close(&self) -> Result<(), PeerLinkError> {
        debug!(target = "call.webrtc", link_id = self.link_id, "closing peer connection");
        self.connection
            .close()
            .await
            .map_err(|err| PeerLinkError::Backend(err.to_string()))
    }
}
