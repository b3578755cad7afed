//! JSON-RPC shaped wire messages exchanged with the SFU over the signaling socket.
//!
//! Outbound messages are built through [`ClientMessage`] constructors so the
//! `method` and `params` of a frame always agree. Inbound frames are decoded once
//! into an [`InboundEnvelope`] (see [`envelope`]).

pub mod envelope;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

pub use envelope::{InboundEnvelope, ReplyOutcome, RpcError, decode_envelope};

const JSONRPC_VERSION: &str = "2.0";

/// Media line every locally discovered candidate is published against.
pub const PUBLISHER_TARGET: u32 = 0;

/// Correlation identifier embedded in requests and echoed by replies.
///
/// Zero is never issued; on the wire it is indistinguishable from "no id".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new(raw: u64) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("envelope id {0:?} is not an unsigned integer")]
    InvalidId(String),
    #[error("{method} payload is missing")]
    MissingPayload { method: String },
    #[error("expected {expected} description, got {actual}")]
    UnexpectedSdpType {
        expected: RTCSdpType,
        actual: RTCSdpType,
    },
    #[error("failed to encode {method} message: {source}")]
    Encode {
        method: &'static str,
        source: serde_json::Error,
    },
}

/// A locally gathered candidate, published in full as the engine produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalCandidate {
    pub target: u32,
    pub candidate: RTCIceCandidate,
}

impl LocalCandidate {
    pub fn publisher(candidate: RTCIceCandidate) -> Self {
        Self {
            target: PUBLISHER_TARGET,
            candidate,
        }
    }
}

/// A candidate trickled by the server, in init form and sometimes without
/// `sdpMid`/`sdpMLineIndex`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CandidateDescriptor {
    pub target: u32,
    pub candidate: RTCIceCandidateInit,
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinParams {
    pub sid: String,
    pub offer: RTCSessionDescription,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerParams {
    pub sid: String,
    pub answer: RTCSessionDescription,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMethod {
    Join,
    Answer,
    Trickle,
}

impl ClientMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientMethod::Join => "join",
            ClientMethod::Answer => "answer",
            ClientMethod::Trickle => "trickle",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ClientParams {
    Join(JoinParams),
    Answer(AnswerParams),
    Trickle(LocalCandidate),
}

/// A frame sent from this client to the SFU.
#[derive(Debug, Clone, Serialize)]
pub struct ClientMessage {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<RequestId>,
    method: ClientMethod,
    params: ClientParams,
}

impl ClientMessage {
    pub fn join(id: RequestId, sid: impl Into<String>, offer: RTCSessionDescription) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: Some(id),
            method: ClientMethod::Join,
            params: ClientParams::Join(JoinParams {
                sid: sid.into(),
                offer,
            }),
        }
    }

    /// The reply to a server offer travels as a fresh request with its own id.
    pub fn answer(id: RequestId, sid: impl Into<String>, answer: RTCSessionDescription) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: Some(id),
            method: ClientMethod::Answer,
            params: ClientParams::Answer(AnswerParams {
                sid: sid.into(),
                answer,
            }),
        }
    }

    pub fn trickle(candidate: LocalCandidate) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method: ClientMethod::Trickle,
            params: ClientParams::Trickle(candidate),
        }
    }

    pub fn id(&self) -> Option<RequestId> {
        self.id
    }

    pub fn method(&self) -> ClientMethod {
        self.method
    }

    pub fn params(&self) -> &ClientParams {
        &self.params
    }

    pub fn to_text(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|source| ProtocolError::Encode {
            method: self.method.as_str(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn description(kind: &str, sdp: &str) -> RTCSessionDescription {
        serde_json::from_value(json!({ "type": kind, "sdp": sdp })).unwrap()
    }

    #[test]
    fn request_id_rejects_zero() {
        assert!(RequestId::new(0).is_none());
        assert_eq!(RequestId::new(42).map(RequestId::get), Some(42));
    }

    #[test]
    fn join_carries_id_sid_and_offer() {
        let id = RequestId::new(7).unwrap();
        let text = ClientMessage::join(id, "test room", description("offer", "O1"))
            .to_text()
            .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({
                "jsonrpc": "2.0",
                "id": 7,
                "method": "join",
                "params": {
                    "sid": "test room",
                    "offer": { "type": "offer", "sdp": "O1" }
                }
            })
        );
    }

    #[test]
    fn answer_is_sent_as_a_request() {
        let id = RequestId::new(99).unwrap();
        let message = ClientMessage::answer(id, "room", description("answer", "A2"));
        assert_eq!(message.method(), ClientMethod::Answer);
        let value: Value = serde_json::from_str(&message.to_text().unwrap()).unwrap();
        assert_eq!(value["id"], json!(99));
        assert_eq!(value["params"]["sid"], json!("room"));
        assert_eq!(value["params"]["answer"]["type"], json!("answer"));
    }

    #[test]
    fn trickle_has_no_id_and_targets_publisher() {
        let message = ClientMessage::trickle(LocalCandidate::publisher(RTCIceCandidate {
            foundation: "1".into(),
            priority: 2122260223,
            address: "10.0.0.2".into(),
            port: 50000,
            component: 1,
            ..Default::default()
        }));
        let value: Value = serde_json::from_str(&message.to_text().unwrap()).unwrap();
        assert!(value.get("id").is_none());
        assert_eq!(value["method"], json!("trickle"));
        assert_eq!(value["params"]["target"], json!(0));

        let candidate = &value["params"]["candidate"];
        assert_eq!(candidate["foundation"], json!("1"));
        assert_eq!(candidate["priority"], json!(2122260223u32));
        assert_eq!(candidate["address"], json!("10.0.0.2"));
        assert_eq!(candidate["port"], json!(50000));
        assert_eq!(candidate["component"], json!(1));
        assert!(candidate.get("sdpMid").is_none());
    }
}
