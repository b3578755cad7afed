use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};
use webrtc::track::track_local::TrackLocal;

use super::{PeerSession, SessionError};
use crate::config::Config;
use crate::engine::{NegotiationEngine, WebRtcEngine};
use crate::media::{CaptureSource, IdleSource, IvfFileSource};
use crate::protocol::{RequestId, decode_envelope};
use crate::signaling::SignalingMachine;
use crate::transport::{MessageChannel, WebSocketChannel};

/// Runs startup negotiation, then feeds every inbound frame to the
/// signaling machine until the channel closes or a fatal fault occurs.
pub struct SessionDriver<C> {
    machine: SignalingMachine,
    channel: C,
}

impl<C: MessageChannel> SessionDriver<C> {
    pub fn new(session: Arc<PeerSession>, channel: C) -> Self {
        let machine = SignalingMachine::new(session, channel.sender());
        Self { machine, channel }
    }

    pub fn session(&self) -> &Arc<PeerSession> {
        self.machine.session()
    }

    /// Attaches the tracks, publishes the initial offer inside a `join`, and
    /// returns the join's correlation id.
    pub async fn negotiate(
        &self,
        tracks: &[Arc<dyn TrackLocal + Send + Sync>],
    ) -> Result<RequestId, SessionError> {
        let engine = self.session().engine();
        for track in tracks {
            engine.add_send_track(Arc::clone(track)).await?;
        }
        engine.on_local_candidate(self.machine.local_candidate_handler());
        engine.on_connection_state_change(self.machine.connection_state_handler());

        let offer = engine.create_offer().await?;
        engine.set_local_description(offer.clone()).await?;
        let offer = engine.local_description().await.unwrap_or(offer);

        let id = self.machine.send_join(offer)?;
        self.machine.open_candidate_gate()?;
        Ok(id)
    }

    pub async fn start(self, tracks: &[Arc<dyn TrackLocal + Send + Sync>]) -> Result<(), SessionError> {
        if let Err(err) = self.negotiate(tracks).await {
            error!(target = "signaling", error = %err, "initial negotiation failed");
            self.session().close().await;
            return Err(err);
        }
        self.run().await
    }

    /// Blocks until the channel closes. A clean close is `Ok`.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let outcome = self.receive_loop().await;
        if let Err(err) = &outcome {
            error!(target = "signaling", error = %err, "session terminated");
        }
        self.session().close().await;
        outcome
    }

    async fn receive_loop(&mut self) -> Result<(), SessionError> {
        while let Some(frame) = self.channel.recv().await {
            let text = frame?;
            debug!(target = "signaling", len = text.len(), "received signaling message");
            trace!(target = "signaling", message = %text);
            let envelope = match decode_envelope(&text) {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(target = "signaling", error = %err, "dropping undecodable message");
                    continue;
                }
            };
            self.machine.dispatch(envelope).await?;
        }
        info!(target = "signaling", "signaling channel closed");
        Ok(())
    }
}

/// Connects to the configured server and runs one session to completion.
pub async fn run_session(config: &Config) -> Result<(), SessionError> {
    let channel = WebSocketChannel::connect(&config.signaling_url).await?;
    let engine = Arc::new(WebRtcEngine::new(&config.engine).await?);

    let source: Box<dyn CaptureSource> = match &config.video {
        Some(path) => Box::new(IvfFileSource::new(path)),
        None => Box::new(IdleSource),
    };
    // Held for the whole session; dropping it stops the frame pump.
    let stream = source.open(&config.capture, &config.engine.codec).await?;

    let session = PeerSession::new(config.sid.clone(), engine);
    SessionDriver::new(session, channel)
        .start(stream.tracks())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineCall, EngineError, RecordingEngine};
    use crate::media::{VIDEO_TRACK_ID, VideoCodecConfig};
    use crate::protocol::{ClientMethod, ClientParams};
    use crate::signaling::SignalingState;
    use crate::transport::{TransportError, memory_channel};
    use serde_json::json;
    use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;

    fn tracks() -> Vec<Arc<dyn TrackLocal + Send + Sync>> {
        let track: Arc<dyn TrackLocal + Send + Sync> = VideoCodecConfig::default().sample_track();
        vec![track]
    }

    #[tokio::test]
    async fn negotiate_sends_join_with_local_offer() {
        let engine = RecordingEngine::new();
        let (channel, mut peer) = memory_channel();
        let driver = SessionDriver::new(PeerSession::new("test room", engine.clone()), channel);

        let id = driver.negotiate(&tracks()).await.unwrap();

        assert_eq!(
            engine.calls(),
            vec![
                EngineCall::AddSendTrack {
                    track_id: VIDEO_TRACK_ID.into()
                },
                EngineCall::CreateOffer,
                EngineCall::SetLocalDescription {
                    kind: RTCSdpType::Offer,
                    sdp: "offer-1".into()
                },
            ]
        );
        let join = peer.try_outbound().unwrap();
        assert_eq!(join.method(), ClientMethod::Join);
        assert_eq!(join.id(), Some(id));
        match join.params() {
            ClientParams::Join(params) => {
                assert_eq!(params.sid, "test room");
                assert_eq!(params.offer.sdp, "offer-1");
            }
            other => panic!("unexpected params {other:?}"),
        }
        assert!(peer.try_outbound().is_none());
    }

    #[tokio::test]
    async fn clean_close_ends_the_session() {
        let engine = RecordingEngine::new();
        let (channel, mut peer) = memory_channel();
        let session = PeerSession::new("test room", engine.clone());
        let driver = SessionDriver::new(Arc::clone(&session), channel);
        let running = tokio::spawn(async move { driver.start(&tracks()).await });

        let join = peer.next_outbound().await.unwrap();
        let id = join.id().unwrap().get();
        peer.push("this is not json");
        peer.push(json!({"id": id, "result": {"type": "answer", "sdp": "A1"}}).to_string());
        peer.close();

        running.await.unwrap().unwrap();
        assert_eq!(session.state(), SignalingState::Closed);
        assert_eq!(
            engine.count(|call| matches!(
                call,
                EngineCall::SetRemoteDescription { kind: RTCSdpType::Answer, .. }
            )),
            1
        );
        assert_eq!(engine.calls().last(), Some(&EngineCall::Close));
    }

    #[tokio::test]
    async fn transport_fault_is_fatal() {
        let engine = RecordingEngine::new();
        let (channel, mut peer) = memory_channel();
        let driver = SessionDriver::new(PeerSession::new("test room", engine.clone()), channel);
        let running = tokio::spawn(async move { driver.start(&tracks()).await });

        peer.next_outbound().await.unwrap();
        peer.fault(TransportError::ChannelClosed);

        let err = running.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::Transport(TransportError::ChannelClosed)));
        assert_eq!(engine.calls().last(), Some(&EngineCall::Close));
    }

    #[tokio::test]
    async fn failed_offer_aborts_before_join() {
        let engine = RecordingEngine::new();
        engine.fail_on("create_offer");
        let (channel, mut peer) = memory_channel();
        let session = PeerSession::new("test room", engine.clone());
        let err = SessionDriver::new(Arc::clone(&session), channel)
            .start(&tracks())
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Engine(EngineError::Rejected(_))));
        assert!(peer.try_outbound().is_none());
        assert_eq!(session.state(), SignalingState::Closed);
    }
}
