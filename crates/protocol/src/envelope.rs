use serde::{Deserialize, Serialize};

use crate::ProtocolError;
use crate::constants::SignalType;
use crate::types::{IceCandidate, PeerRole, SessionDescription};

/// Envelope for all relay communication.
///
/// The relay routes by `room` and forwards `offer`, `answer` and
/// `ice-candidate` envelopes verbatim to the other member, so every field
/// except `type` is optional on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub signal: SignalType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_initiator: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<IceCandidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Envelope {
    /// Creates an envelope carrying only its type.
    pub fn new(signal: SignalType) -> Self {
        Self {
            signal,
            room: None,
            is_initiator: None,
            peer_count: None,
            offer: None,
            answer: None,
            candidate: None,
            message: None,
        }
    }

    pub fn join(room: impl Into<String>) -> Self {
        Self {
            room: Some(room.into()),
            ..Self::new(SignalType::Join)
        }
    }

    pub fn offer(room: impl Into<String>, offer: SessionDescription) -> Self {
        Self {
            room: Some(room.into()),
            offer: Some(offer),
            ..Self::new(SignalType::Offer)
        }
    }

    pub fn answer(room: impl Into<String>, answer: SessionDescription) -> Self {
        Self {
            room: Some(room.into()),
            answer: Some(answer),
            ..Self::new(SignalType::Answer)
        }
    }

    pub fn candidate(room: impl Into<String>, candidate: IceCandidate) -> Self {
        Self {
            room: Some(room.into()),
            candidate: Some(candidate),
            ..Self::new(SignalType::IceCandidate)
        }
    }

    /// Parses a text frame received from the relay.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Role carried by a `joined` envelope.
    pub fn role(&self) -> Result<PeerRole, ProtocolError> {
        self.is_initiator
            .map(PeerRole::from_initiator_flag)
            .ok_or(ProtocolError::MissingField {
                signal: self.signal.as_str(),
                field: "isInitiator",
            })
    }

    /// The session description carried by an `offer` or `answer`.
    pub fn description(&self) -> Result<&SessionDescription, ProtocolError> {
        let (slot, field) = match self.signal {
            SignalType::Answer => (self.answer.as_ref(), "answer"),
            _ => (self.offer.as_ref(), "offer"),
        };
        slot.ok_or(ProtocolError::MissingField {
            signal: self.signal.as_str(),
            field,
        })
    }
}
