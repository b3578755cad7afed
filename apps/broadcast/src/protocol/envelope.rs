use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::{CandidateDescriptor, ProtocolError, RequestId};

/// JSON-RPC error object carried by a failed reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    Result(Value),
    Error(RpcError),
}

/// An inbound frame, shaped by which of `id` and `method` are present.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEnvelope {
    /// `id` without `method`.
    Reply { id: RequestId, outcome: ReplyOutcome },
    /// Both `id` and `method`.
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    /// `method` without `id`.
    Notification { method: String, params: Value },
    /// Neither.
    Unrecognized,
}

impl InboundEnvelope {
    pub fn id(&self) -> Option<RequestId> {
        match self {
            InboundEnvelope::Reply { id, .. } | InboundEnvelope::Request { id, .. } => Some(*id),
            _ => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            InboundEnvelope::Request { method, .. }
            | InboundEnvelope::Notification { method, .. } => Some(method),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireId {
    Number(u64),
    Text(String),
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    id: Option<WireId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

fn normalize_id(id: Option<WireId>) -> Result<Option<RequestId>, ProtocolError> {
    match id {
        None => Ok(None),
        Some(WireId::Number(raw)) => Ok(RequestId::new(raw)),
        Some(WireId::Text(text)) => text
            .trim()
            .parse::<u64>()
            .map(RequestId::new)
            .map_err(|_| ProtocolError::InvalidId(text)),
    }
}

/// Decodes one text frame. Only the envelope shape is checked here; payloads
/// are decoded later by whichever handler the envelope is routed to.
pub fn decode_envelope(text: &str) -> Result<InboundEnvelope, ProtocolError> {
    let raw: RawEnvelope = serde_json::from_str(text)?;
    let id = normalize_id(raw.id)?;
    let method = raw.method.filter(|method| !method.is_empty());
    let params = raw.params.unwrap_or(Value::Null);

    Ok(match (id, method) {
        (Some(id), Some(method)) => InboundEnvelope::Request { id, method, params },
        (Some(id), None) => {
            let outcome = match raw.error {
                Some(error) => ReplyOutcome::Error(error),
                None => ReplyOutcome::Result(raw.result.unwrap_or(Value::Null)),
            };
            InboundEnvelope::Reply { id, outcome }
        }
        (None, Some(method)) => InboundEnvelope::Notification { method, params },
        (None, None) => InboundEnvelope::Unrecognized,
    })
}

/// Reads a session description payload of any type.
pub fn decode_session_description(
    method: &str,
    payload: &Value,
) -> Result<RTCSessionDescription, ProtocolError> {
    if payload.is_null() {
        return Err(ProtocolError::MissingPayload {
            method: method.to_string(),
        });
    }
    Ok(RTCSessionDescription::deserialize(payload)?)
}

/// Reads a session description payload and checks it has the expected type.
pub fn decode_description(
    method: &str,
    payload: &Value,
    expected: RTCSdpType,
) -> Result<RTCSessionDescription, ProtocolError> {
    let description = decode_session_description(method, payload)?;
    if description.sdp_type != expected {
        return Err(ProtocolError::UnexpectedSdpType {
            expected,
            actual: description.sdp_type,
        });
    }
    Ok(description)
}

pub fn decode_candidate(method: &str, payload: &Value) -> Result<CandidateDescriptor, ProtocolError> {
    if payload.is_null() {
        return Err(ProtocolError::MissingPayload {
            method: method.to_string(),
        });
    }
    Ok(CandidateDescriptor::deserialize(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reply_is_id_without_method() {
        let envelope = decode_envelope(r#"{"id": 11, "result": {"type": "answer", "sdp": "A1"}}"#)
            .unwrap();
        let InboundEnvelope::Reply { id, outcome } = envelope else {
            panic!("expected reply, got {envelope:?}");
        };
        assert_eq!(id.get(), 11);
        assert_eq!(
            outcome,
            ReplyOutcome::Result(json!({"type": "answer", "sdp": "A1"}))
        );
    }

    #[test]
    fn error_reply_keeps_rpc_error() {
        let envelope =
            decode_envelope(r#"{"jsonrpc":"2.0","id":"5","error":{"code":-32000,"message":"no room"}}"#)
                .unwrap();
        match envelope {
            InboundEnvelope::Reply {
                outcome: ReplyOutcome::Error(error),
                id,
            } => {
                assert_eq!(id.get(), 5);
                assert_eq!(error.code, -32000);
                assert_eq!(error.to_string(), "no room (code -32000)");
            }
            other => panic!("unexpected envelope {other:?}"),
        }
    }

    #[test]
    fn request_has_both_id_and_method() {
        let envelope =
            decode_envelope(r#"{"id": 77, "method": "offer", "params": {"type": "offer", "sdp": "O2"}}"#)
                .unwrap();
        assert_eq!(envelope.id().map(RequestId::get), Some(77));
        assert_eq!(envelope.method(), Some("offer"));
    }

    #[test]
    fn zero_id_counts_as_absent() {
        let envelope = decode_envelope(r#"{"id": 0, "method": "offer", "params": {}}"#).unwrap();
        assert!(matches!(envelope, InboundEnvelope::Notification { .. }));
    }

    #[test]
    fn empty_object_is_unrecognized() {
        assert_eq!(decode_envelope("{}").unwrap(), InboundEnvelope::Unrecognized);
    }

    #[test]
    fn non_numeric_id_is_a_decode_fault() {
        let err = decode_envelope(r#"{"id": "abc", "result": null}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidId(ref id) if id == "abc"));
    }

    #[test]
    fn garbage_is_a_decode_fault() {
        assert!(matches!(
            decode_envelope("not json").unwrap_err(),
            ProtocolError::Json(_)
        ));
    }

    #[test]
    fn description_type_is_checked() {
        let payload = json!({"type": "offer", "sdp": "O1"});
        let err = decode_description("join", &payload, RTCSdpType::Answer).unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedSdpType { .. }));
        let offer = decode_description("offer", &payload, RTCSdpType::Offer).unwrap();
        assert_eq!(offer.sdp, "O1");
    }

    #[test]
    fn untyped_description_needs_a_decodable_payload() {
        let payload = json!({"type": "offer", "sdp": "O1"});
        let offer = decode_session_description("join", &payload).unwrap();
        assert_eq!(offer.sdp_type, RTCSdpType::Offer);

        assert!(matches!(
            decode_session_description("join", &Value::Null).unwrap_err(),
            ProtocolError::MissingPayload { .. }
        ));
        assert!(matches!(
            decode_session_description("join", &json!("not a description")).unwrap_err(),
            ProtocolError::Json(_)
        ));
    }

    #[test]
    fn inbound_candidate_tolerates_missing_media_fields() {
        let payload = json!({"target": 1, "candidate": {"candidate": "candidate:C1"}});
        let descriptor = decode_candidate("trickle", &payload).unwrap();
        assert_eq!(descriptor.target, 1);
        assert_eq!(descriptor.candidate.candidate, "candidate:C1");
        assert_eq!(descriptor.candidate.sdp_mid, None);
    }
}
