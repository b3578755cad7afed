//! Seam between the signaling core and the media negotiation engine.
//!
//! The core never touches a peer connection directly; it drives an
//! [`NegotiationEngine`] and reacts to the callbacks registered on it.

pub mod recording;
pub mod rtc;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::track::track_local::TrackLocal;

pub use recording::{EngineCall, RecordingEngine};
pub use rtc::{EngineConfig, WebRtcEngine};

/// Invoked once per locally gathered candidate, in discovery order.
pub type LocalCandidateHandler = Box<dyn Fn(RTCIceCandidate) + Send + Sync>;

pub type ConnectionStateHandler = Box<dyn Fn(RTCIceConnectionState) + Send + Sync>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),
    #[error("engine setup failed: {0}")]
    Setup(String),
    #[error("{0} rejected by engine")]
    Rejected(String),
}

#[async_trait]
pub trait NegotiationEngine: Send + Sync {
    /// Attaches a local track with a send-only transceiver.
    async fn add_send_track(&self, track: Arc<dyn TrackLocal + Send + Sync>)
    -> Result<(), EngineError>;

    async fn create_offer(&self) -> Result<RTCSessionDescription, EngineError>;

    async fn create_answer(&self) -> Result<RTCSessionDescription, EngineError>;

    async fn set_local_description(&self, description: RTCSessionDescription)
    -> Result<(), EngineError>;

    /// The description the engine currently advertises, including any
    /// candidates gathered since it was set.
    async fn local_description(&self) -> Option<RTCSessionDescription>;

    async fn set_remote_description(
        &self,
        description: RTCSessionDescription,
    ) -> Result<(), EngineError>;

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<(), EngineError>;

    fn on_local_candidate(&self, handler: LocalCandidateHandler);

    fn on_connection_state_change(&self, handler: ConnectionStateHandler);

    async fn close(&self) -> Result<(), EngineError>;
}
