//! Routes every inbound envelope to a negotiation step and turns engine
//! callbacks into outbound trickles.
//!
//! Classification happens once, against a snapshot of the pending requests:
//!
//! | envelope                            | classification     |
//! |-------------------------------------|--------------------|
//! | id matches a pending `join`         | [`Classification::JoinReply`] |
//! | id matches a pending `answer`       | [`Classification::AnswerAck`] |
//! | id present, method `offer`          | [`Classification::Renegotiation`] |
//! | method `trickle`                    | [`Classification::RemoteCandidate`] |
//! | reply whose id matches nothing      | [`Classification::CorrelationMiss`] |
//! | anything else                       | [`Classification::Unrecognized`] |

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::correlator::{NotFound, PendingAction, RequestCorrelator};
use crate::engine::{ConnectionStateHandler, LocalCandidateHandler};
use crate::protocol::envelope::{decode_candidate, decode_description, decode_session_description};
use crate::protocol::{
    ClientMessage, ClientMethod, InboundEnvelope, LocalCandidate, ReplyOutcome, RequestId,
};
use crate::session::{PeerSession, SessionError};
use crate::transport::{OutboundSender, TransportError};

const OFFER_METHOD: &str = "offer";
const TRICKLE_METHOD: &str = "trickle";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    /// Join sent, answer to the initial offer not yet applied.
    NegotiatingInitial,
    Steady,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    InitialOfferer,
    RenegotiationAnswerer,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    JoinReply { id: RequestId, outcome: ReplyOutcome },
    AnswerAck { id: RequestId, outcome: ReplyOutcome },
    Renegotiation { id: RequestId, params: Value },
    RemoteCandidate { params: Value },
    CorrelationMiss { id: RequestId },
    Unrecognized { method: Option<String> },
}

impl Classification {
    pub fn label(&self) -> &'static str {
        match self {
            Classification::JoinReply { .. } => "join_reply",
            Classification::AnswerAck { .. } => "answer_ack",
            Classification::Renegotiation { .. } => "renegotiation",
            Classification::RemoteCandidate { .. } => "remote_candidate",
            Classification::CorrelationMiss { .. } => "correlation_miss",
            Classification::Unrecognized { .. } => "unrecognized",
        }
    }
}

fn correlated(action: PendingAction, id: RequestId, outcome: ReplyOutcome) -> Classification {
    match action {
        PendingAction::ApplyJoinAnswer => Classification::JoinReply { id, outcome },
        PendingAction::AcknowledgeAnswer => Classification::AnswerAck { id, outcome },
    }
}

/// Assigns exactly one category to an envelope. Pending requests are only
/// inspected, never consumed.
pub fn classify(envelope: InboundEnvelope, correlator: &RequestCorrelator) -> Classification {
    let action = |id| correlator.pending(id).map(|pending| pending.action);
    match envelope {
        InboundEnvelope::Reply { id, outcome } => match action(id) {
            Some(action) => correlated(action, id, outcome),
            None => Classification::CorrelationMiss { id },
        },
        InboundEnvelope::Request { id, method, params } => match action(id) {
            Some(action) => correlated(action, id, ReplyOutcome::Result(params)),
            None if method == OFFER_METHOD => Classification::Renegotiation { id, params },
            None if method == TRICKLE_METHOD => Classification::RemoteCandidate { params },
            None => Classification::Unrecognized {
                method: Some(method),
            },
        },
        InboundEnvelope::Notification { method, params } if method == TRICKLE_METHOD => {
            Classification::RemoteCandidate { params }
        }
        InboundEnvelope::Notification { method, .. } => Classification::Unrecognized {
            method: Some(method),
        },
        InboundEnvelope::Unrecognized => Classification::Unrecognized { method: None },
    }
}

/// Local candidates wait here until the join request is on the queue.
#[derive(Debug, Default)]
struct CandidateGate {
    open: bool,
    buffered: Vec<ClientMessage>,
}

fn forward_local_candidate(
    gate: &Mutex<CandidateGate>,
    outbound: &OutboundSender,
    candidate: RTCIceCandidate,
) {
    debug!(
        target = "signaling",
        address = %candidate.address,
        port = candidate.port,
        "local candidate discovered"
    );
    let message = ClientMessage::trickle(LocalCandidate::publisher(candidate));
    // Sending under the lock keeps callback order even while the gate flushes.
    let mut gate = gate.lock();
    if !gate.open {
        gate.buffered.push(message);
        return;
    }
    if let Err(err) = outbound.send(message) {
        warn!(target = "signaling", error = %err, "dropping local candidate");
    }
}

pub struct SignalingMachine {
    session: Arc<PeerSession>,
    outbound: OutboundSender,
    gate: Arc<Mutex<CandidateGate>>,
}

impl SignalingMachine {
    pub fn new(session: Arc<PeerSession>, outbound: OutboundSender) -> Self {
        Self {
            session,
            outbound,
            gate: Arc::new(Mutex::new(CandidateGate::default())),
        }
    }

    pub fn session(&self) -> &Arc<PeerSession> {
        &self.session
    }

    /// One trickle per discovered candidate, in discovery order.
    pub fn local_candidate_handler(&self) -> LocalCandidateHandler {
        let gate = Arc::clone(&self.gate);
        let outbound = self.outbound.clone();
        Box::new(move |candidate| forward_local_candidate(&gate, &outbound, candidate))
    }

    pub fn connection_state_handler(&self) -> ConnectionStateHandler {
        // Weak: the engine owning this handler is itself owned by the session.
        let session = Arc::downgrade(&self.session);
        Box::new(move |state| {
            info!(target = "signaling", %state, "ice connection state changed");
            if let Some(session) = session.upgrade() {
                session.record_connection_state(state);
            }
        })
    }

    /// Releases buffered local candidates and lets later ones through.
    pub fn open_candidate_gate(&self) -> Result<usize, TransportError> {
        let mut gate = self.gate.lock();
        gate.open = true;
        let buffered = std::mem::take(&mut gate.buffered);
        let flushed = buffered.len();
        for message in buffered {
            self.outbound.send(message)?;
        }
        if flushed > 0 {
            debug!(target = "signaling", flushed, "flushed local candidates held for join");
        }
        Ok(flushed)
    }

    pub fn send_join(&self, offer: RTCSessionDescription) -> Result<RequestId, SessionError> {
        let id = self
            .session
            .correlator
            .lock()
            .issue(ClientMethod::Join.as_str(), PendingAction::ApplyJoinAnswer);
        self.outbound
            .send(ClientMessage::join(id, self.session.sid(), offer))?;
        info!(target = "signaling", sid = %self.session.sid(), %id, "join sent");
        Ok(id)
    }

    /// Handles one inbound envelope to completion. Only fatal faults are
    /// returned; anything the session can survive is logged and dropped.
    pub async fn dispatch(&self, envelope: InboundEnvelope) -> Result<(), SessionError> {
        let classification = classify(envelope, &self.session.correlator.lock());
        debug!(target = "signaling", kind = classification.label(), "dispatching inbound message");
        match classification {
            Classification::JoinReply { id, outcome } => self.on_join_reply(id, outcome).await,
            Classification::AnswerAck { id, outcome } => {
                self.on_answer_ack(id, outcome);
                Ok(())
            }
            Classification::Renegotiation { id, params } => self.on_server_offer(id, params).await,
            Classification::RemoteCandidate { params } => self.on_remote_candidate(params).await,
            Classification::CorrelationMiss { id } => {
                let duplicate = self.session.correlator.lock().was_issued(id);
                error!(
                    target = "signaling",
                    %id,
                    duplicate,
                    error = %NotFound(id),
                    "dropping uncorrelated reply"
                );
                Ok(())
            }
            Classification::Unrecognized { method } => {
                warn!(target = "signaling", ?method, "ignoring unrecognized message");
                Ok(())
            }
        }
    }

    async fn on_join_reply(&self, id: RequestId, outcome: ReplyOutcome) -> Result<(), SessionError> {
        let payload = match outcome {
            ReplyOutcome::Result(payload) => payload,
            ReplyOutcome::Error(err) => {
                let _ = self.session.correlator.lock().resolve(id);
                error!(target = "signaling", %id, error = %err, "join rejected");
                return Err(SessionError::JoinRejected(err));
            }
        };
        // The engine decides whether the description fits; a rejection is fatal.
        let answer = match decode_session_description(ClientMethod::Join.as_str(), &payload) {
            Ok(answer) => answer,
            Err(err) => {
                warn!(target = "signaling", %id, error = %err, "dropping malformed join reply");
                return Ok(());
            }
        };
        if let Err(err) = self.session.correlator.lock().resolve(id) {
            error!(target = "signaling", error = %err, "join reply raced another resolution");
            return Ok(());
        }

        self.session.engine().set_remote_description(answer).await?;
        self.flush_remote_candidates().await?;
        self.session.transition(SignalingState::Steady);
        info!(target = "signaling", sid = %self.session.sid(), %id, "joined session");
        Ok(())
    }

    fn on_answer_ack(&self, id: RequestId, outcome: ReplyOutcome) {
        let _ = self.session.correlator.lock().resolve(id);
        match outcome {
            ReplyOutcome::Result(_) => {
                debug!(target = "signaling", %id, "server acknowledged answer")
            }
            ReplyOutcome::Error(err) => {
                warn!(target = "signaling", %id, error = %err, "server rejected answer")
            }
        }
    }

    async fn on_server_offer(&self, trigger: RequestId, params: Value) -> Result<(), SessionError> {
        let offer = match decode_description(OFFER_METHOD, &params, RTCSdpType::Offer) {
            Ok(offer) => offer,
            Err(err) => {
                warn!(target = "signaling", id = %trigger, error = %err, "dropping malformed offer");
                return Ok(());
            }
        };
        if self.session.state() == SignalingState::NegotiatingInitial {
            warn!(target = "signaling", id = %trigger, "server offer before join reply; answering anyway");
        }
        self.session.assume_role(NegotiationRole::RenegotiationAnswerer);

        let engine = self.session.engine();
        engine.set_remote_description(offer).await?;
        self.flush_remote_candidates().await?;
        let answer = engine.create_answer().await?;
        engine.set_local_description(answer.clone()).await?;
        let answer = engine.local_description().await.unwrap_or(answer);

        let id = {
            let mut correlator = self.session.correlator.lock();
            correlator.retire(trigger);
            correlator.issue(ClientMethod::Answer.as_str(), PendingAction::AcknowledgeAnswer)
        };
        self.outbound
            .send(ClientMessage::answer(id, self.session.sid(), answer))?;
        info!(target = "signaling", trigger = %trigger, %id, "answered server offer");
        Ok(())
    }

    async fn on_remote_candidate(&self, params: Value) -> Result<(), SessionError> {
        let descriptor = match decode_candidate(TRICKLE_METHOD, &params) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                warn!(target = "signaling", error = %err, "dropping malformed trickle");
                return Ok(());
            }
        };
        let target = descriptor.target;
        let admitted = self
            .session
            .remote_candidates
            .lock()
            .admit(descriptor.candidate);
        match admitted {
            Some(candidate) => {
                debug!(target = "signaling", media_target = target, "applying remote candidate");
                self.session.engine().add_ice_candidate(candidate).await?;
            }
            None => {
                debug!(target = "signaling", media_target = target, "queued remote candidate until remote description is set");
            }
        }
        Ok(())
    }

    async fn flush_remote_candidates(&self) -> Result<(), SessionError> {
        let backlog = self.session.remote_candidates.lock().mark_ready();
        if !backlog.is_empty() {
            debug!(target = "signaling", count = backlog.len(), "applying queued remote candidates");
        }
        for candidate in backlog {
            self.session.engine().add_ice_candidate(candidate).await?;
        }
        Ok(())
    }
}
