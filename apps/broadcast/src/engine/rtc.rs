use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::track::track_local::TrackLocal;

use super::{ConnectionStateHandler, EngineError, LocalCandidateHandler, NegotiationEngine};
use crate::media::VideoCodecConfig;

/// Fixed negotiation setup: one STUN server, bundled transports, one video codec.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub stun_url: String,
    pub codec: VideoCodecConfig,
}

pub struct WebRtcEngine {
    pc: Arc<RTCPeerConnection>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl WebRtcEngine {
    pub async fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: config.codec.capability(),
                payload_type: config.codec.payload_type,
                ..Default::default()
            },
            RTPCodecType::Video,
        )?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec![config.stun_url.clone()],
                ..Default::default()
            }],
            bundle_policy: RTCBundlePolicy::MaxBundle,
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await?;
        info!(
            target = "engine",
            stun = %config.stun_url,
            codec = %config.codec.mime_type,
            bitrate = config.codec.target_bitrate,
            "peer connection created"
        );

        Ok(Self {
            pc: Arc::new(pc),
            tasks: Mutex::new(Vec::new()),
        })
    }
}

impl Drop for WebRtcEngine {
    fn drop(&mut self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

#[async_trait]
impl NegotiationEngine for WebRtcEngine {
    async fn add_send_track(
        &self,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Result<(), EngineError> {
        let track_id = track.id().to_string();
        let transceiver = self
            .pc
            .add_transceiver_from_track(
                track,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendonly,
                    send_encodings: vec![],
                }),
            )
            .await?;

        // Interceptors only run while someone reads the sender's RTCP.
        let sender = transceiver.sender().await;
        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        self.tasks.lock().push(handle);

        debug!(target = "engine", track = %track_id, "attached send-only track");
        Ok(())
    }

    async fn create_offer(&self) -> Result<RTCSessionDescription, EngineError> {
        Ok(self.pc.create_offer(None).await?)
    }

    async fn create_answer(&self) -> Result<RTCSessionDescription, EngineError> {
        Ok(self.pc.create_answer(None).await?)
    }

    async fn set_local_description(
        &self,
        description: RTCSessionDescription,
    ) -> Result<(), EngineError> {
        Ok(self.pc.set_local_description(description).await?)
    }

    async fn local_description(&self) -> Option<RTCSessionDescription> {
        self.pc.local_description().await
    }

    async fn set_remote_description(
        &self,
        description: RTCSessionDescription,
    ) -> Result<(), EngineError> {
        Ok(self.pc.set_remote_description(description).await?)
    }

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<(), EngineError> {
        Ok(self.pc.add_ice_candidate(candidate).await?)
    }

    fn on_local_candidate(&self, handler: LocalCandidateHandler) {
        let handler = Arc::new(handler);
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let Some(candidate) = candidate else {
                        debug!(target = "engine", "local candidate gathering complete");
                        return;
                    };
                    handler(candidate);
                })
            }));
    }

    fn on_connection_state_change(&self, handler: ConnectionStateHandler) {
        let handler = Arc::new(handler);
        self.pc
            .on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                let handler = Arc::clone(&handler);
                Box::pin(async move { handler(state) })
            }));
    }

    async fn close(&self) -> Result<(), EngineError> {
        Ok(self.pc.close().await?)
    }
}
