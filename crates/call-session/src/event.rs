use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CallError;

/// Opaque per-client identity, allocated by whoever authenticates the user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Negotiation blob exchanged as an offer or answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>, sdp_mid: Option<String>, sdp_mline_index: Option<u16>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid,
            sdp_mline_index,
            username_fragment: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    CallRequest,
    Offer,
    Answer,
    IceCandidate,
    CallCancelled,
    CallRejected,
    CallEnded,
}

impl SignalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::CallRequest => "call-request",
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice-candidate",
            SignalKind::CallCancelled => "call-cancelled",
            SignalKind::CallRejected => "call-rejected",
            SignalKind::CallEnded => "call-ended",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific part of a signaling event; the `type` tag sits alongside
/// the common sender/receiver fields on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalBody {
    CallRequest {
        offer: SessionDescription,
        #[serde(rename = "senderUsername")]
        sender_username: String,
        #[serde(rename = "receiverUsername", default, skip_serializing_if = "Option::is_none")]
        receiver_username: Option<String>,
    },
    Offer {
        offer: SessionDescription,
        #[serde(rename = "senderUsername", default, skip_serializing_if = "Option::is_none")]
        sender_username: Option<String>,
    },
    Answer {
        answer: SessionDescription,
    },
    IceCandidate {
        candidate: IceCandidate,
    },
    CallCancelled {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offer: Option<SessionDescription>,
    },
    CallRejected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offer: Option<SessionDescription>,
    },
    CallEnded,
}

impl SignalBody {
    pub fn kind(&self) -> SignalKind {
        match self {
            SignalBody::CallRequest { .. } => SignalKind::CallRequest,
            SignalBody::Offer { .. } => SignalKind::Offer,
            SignalBody::Answer { .. } => SignalKind::Answer,
            SignalBody::IceCandidate { .. } => SignalKind::IceCandidate,
            SignalBody::CallCancelled { .. } => SignalKind::CallCancelled,
            SignalBody::CallRejected { .. } => SignalKind::CallRejected,
            SignalBody::CallEnded => SignalKind::CallEnded,
        }
    }
}

/// One signaling message as carried over the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    #[serde(rename = "senderId")]
    pub sender_id: Identity,
    #[serde(rename = "receiverId", default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<Identity>,
    #[serde(flatten)]
    pub body: SignalBody,
}

impl SignalEvent {
    pub fn new(sender_id: Identity, receiver_id: Option<Identity>, body: SignalBody) -> Self {
        Self {
            sender_id,
            receiver_id,
            body,
        }
    }

    pub fn kind(&self) -> SignalKind {
        self.body.kind()
    }

    pub fn is_from(&self, identity: &Identity) -> bool {
        self.sender_id == *identity
    }

    /// True for broadcasts and for events addressed to `identity`.
    pub fn reaches(&self, identity: &Identity) -> bool {
        self.receiver_id.as_ref().is_none_or(|receiver| receiver == identity)
    }

    /// True only when the event names `identity` as its receiver.
    pub fn is_addressed_to(&self, identity: &Identity) -> bool {
        self.receiver_id.as_ref() == Some(identity)
    }

    pub fn encode(&self) -> Result<Bytes, CallError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|err| CallError::Codec(err.to_string()))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, CallError> {
        serde_json::from_slice(payload).map_err(|err| CallError::Codec(err.to_string()))
    }
}
