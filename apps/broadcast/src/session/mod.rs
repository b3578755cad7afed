//! The one logical session with the SFU and the driver that starts it.

pub mod driver;

use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;

use crate::engine::{EngineError, NegotiationEngine};
use crate::media::MediaError;
use crate::protocol::RpcError;
use crate::signaling::{NegotiationRole, RequestCorrelator, SignalingState};
use crate::transport::TransportError;

pub use driver::{SessionDriver, run_session};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("join rejected by server: {0}")]
    JoinRejected(RpcError),
}

/// Shared state of the session with the server.
///
/// The receive loop and engine callbacks both reach in here, so every
/// mutable field sits behind its own lock. No lock is held across an await.
pub struct PeerSession {
    sid: String,
    engine: Arc<dyn NegotiationEngine>,
    pub(crate) correlator: Mutex<RequestCorrelator>,
    pub(crate) negotiation: Mutex<Negotiation>,
    pub(crate) remote_candidates: Mutex<RemoteCandidates>,
    connection_state: watch::Sender<RTCIceConnectionState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Negotiation {
    pub(crate) state: SignalingState,
    pub(crate) role: NegotiationRole,
}

/// Remote candidates held back until a remote description exists.
#[derive(Debug, Default)]
pub(crate) struct RemoteCandidates {
    ready: bool,
    queued: Vec<RTCIceCandidateInit>,
}

impl RemoteCandidates {
    /// Hands the candidate back if it can be applied now, otherwise queues it.
    pub(crate) fn admit(&mut self, candidate: RTCIceCandidateInit) -> Option<RTCIceCandidateInit> {
        if self.ready {
            Some(candidate)
        } else {
            self.queued.push(candidate);
            None
        }
    }

    /// Marks the remote description as applied and returns the backlog in
    /// arrival order.
    pub(crate) fn mark_ready(&mut self) -> Vec<RTCIceCandidateInit> {
        self.ready = true;
        std::mem::take(&mut self.queued)
    }

    pub(crate) fn queued(&self) -> usize {
        self.queued.len()
    }
}

impl PeerSession {
    pub fn new(sid: impl Into<String>, engine: Arc<dyn NegotiationEngine>) -> Arc<Self> {
        let (connection_state, _) = watch::channel(RTCIceConnectionState::New);
        Arc::new(Self {
            sid: sid.into(),
            engine,
            correlator: Mutex::new(RequestCorrelator::new()),
            negotiation: Mutex::new(Negotiation {
                state: SignalingState::NegotiatingInitial,
                role: NegotiationRole::InitialOfferer,
            }),
            remote_candidates: Mutex::new(RemoteCandidates::default()),
            connection_state,
        })
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn engine(&self) -> &Arc<dyn NegotiationEngine> {
        &self.engine
    }

    pub fn state(&self) -> SignalingState {
        self.negotiation.lock().state
    }

    pub fn role(&self) -> NegotiationRole {
        self.negotiation.lock().role
    }

    pub fn outstanding_requests(&self) -> usize {
        self.correlator.lock().outstanding()
    }

    pub fn queued_remote_candidates(&self) -> usize {
        self.remote_candidates.lock().queued()
    }

    /// Follows the last ICE connection state reported by the engine.
    pub fn connection_state(&self) -> watch::Receiver<RTCIceConnectionState> {
        self.connection_state.subscribe()
    }

    pub(crate) fn record_connection_state(&self, state: RTCIceConnectionState) {
        self.connection_state.send_replace(state);
    }

    pub(crate) fn transition(&self, next: SignalingState) -> SignalingState {
        let mut negotiation = self.negotiation.lock();
        let previous = std::mem::replace(&mut negotiation.state, next);
        if previous != next {
            tracing::info!(target = "signaling", sid = %self.sid, from = ?previous, to = ?next, "signaling state changed");
        }
        previous
    }

    pub(crate) fn assume_role(&self, role: NegotiationRole) {
        self.negotiation.lock().role = role;
    }

    /// Moves to `Closed` and shuts the engine down. Safe to call twice.
    pub async fn close(&self) {
        if self.transition(SignalingState::Closed) == SignalingState::Closed {
            return;
        }
        if let Err(err) = self.engine.close().await {
            tracing::warn!(target = "signaling", error = %err, "failed to close negotiation engine");
        }
    }
}
