//! In-memory engine that records every call made by the signaling core.
//!
//! Used by the unit and integration tests to observe negotiation without a
//! real peer connection; candidates and state changes are injected by hand.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::track::track_local::TrackLocal;

use super::{ConnectionStateHandler, EngineError, LocalCandidateHandler, NegotiationEngine};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    AddSendTrack { track_id: String },
    CreateOffer,
    CreateAnswer,
    SetLocalDescription { kind: RTCSdpType, sdp: String },
    SetRemoteDescription { kind: RTCSdpType, sdp: String },
    AddIceCandidate(RTCIceCandidateInit),
    Close,
}

#[derive(Default)]
pub struct RecordingEngine {
    calls: Mutex<Vec<EngineCall>>,
    local: Mutex<Option<RTCSessionDescription>>,
    generated: Mutex<u32>,
    failing: Mutex<HashSet<&'static str>>,
    candidate_handler: Mutex<Option<Arc<LocalCandidateHandler>>>,
    state_handler: Mutex<Option<Arc<ConnectionStateHandler>>>,
}

pub fn description(kind: RTCSdpType, sdp: impl Into<String>) -> RTCSessionDescription {
    let mut description = RTCSessionDescription::default();
    description.sdp_type = kind;
    description.sdp = sdp.into();
    description
}

impl RecordingEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes the named operation (e.g. `"set_remote_description"`) fail from now on.
    pub fn fail_on(&self, operation: &'static str) {
        self.failing.lock().insert(operation);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&EngineCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| matches(call)).count()
    }

    /// Simulates the engine discovering a local candidate. Returns false when
    /// no handler is registered yet.
    pub fn discover_candidate(&self, candidate: RTCIceCandidate) -> bool {
        let handler = self.candidate_handler.lock().clone();
        match handler {
            Some(handler) => {
                handler(candidate);
                true
            }
            None => false,
        }
    }

    pub fn change_connection_state(&self, state: RTCIceConnectionState) -> bool {
        let handler = self.state_handler.lock().clone();
        match handler {
            Some(handler) => {
                handler(state);
                true
            }
            None => false,
        }
    }

    fn record(&self, operation: &'static str, call: EngineCall) -> Result<(), EngineError> {
        self.calls.lock().push(call);
        if self.failing.lock().contains(operation) {
            return Err(EngineError::Rejected(operation.to_string()));
        }
        Ok(())
    }

    fn next_description(&self, kind: RTCSdpType) -> RTCSessionDescription {
        let mut generated = self.generated.lock();
        *generated += 1;
        description(kind, format!("{kind}-{}", *generated))
    }
}

#[async_trait]
impl NegotiationEngine for RecordingEngine {
    async fn add_send_track(
        &self,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Result<(), EngineError> {
        self.record(
            "add_send_track",
            EngineCall::AddSendTrack {
                track_id: track.id().to_string(),
            },
        )
    }

    async fn create_offer(&self) -> Result<RTCSessionDescription, EngineError> {
        self.record("create_offer", EngineCall::CreateOffer)?;
        Ok(self.next_description(RTCSdpType::Offer))
    }

    async fn create_answer(&self) -> Result<RTCSessionDescription, EngineError> {
        self.record("create_answer", EngineCall::CreateAnswer)?;
        Ok(self.next_description(RTCSdpType::Answer))
    }

    async fn set_local_description(
        &self,
        description: RTCSessionDescription,
    ) -> Result<(), EngineError> {
        self.record(
            "set_local_description",
            EngineCall::SetLocalDescription {
                kind: description.sdp_type,
                sdp: description.sdp.clone(),
            },
        )?;
        *self.local.lock() = Some(description);
        Ok(())
    }

    async fn local_description(&self) -> Option<RTCSessionDescription> {
        self.local.lock().clone()
    }

    async fn set_remote_description(
        &self,
        description: RTCSessionDescription,
    ) -> Result<(), EngineError> {
        self.record(
            "set_remote_description",
            EngineCall::SetRemoteDescription {
                kind: description.sdp_type,
                sdp: description.sdp,
            },
        )
    }

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<(), EngineError> {
        self.record("add_ice_candidate", EngineCall::AddIceCandidate(candidate))
    }

    fn on_local_candidate(&self, handler: LocalCandidateHandler) {
        *self.candidate_handler.lock() = Some(Arc::new(handler));
    }

    fn on_connection_state_change(&self, handler: ConnectionStateHandler) {
        *self.state_handler.lock() = Some(Arc::new(handler));
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.record("close", EngineCall::Close)
    }
}
