//! Local media: the fixed codec/capture profile and the sources that feed
//! send-only tracks.

pub mod ivf;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use webrtc::api::media_engine::MIME_TYPE_VP8;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

pub use ivf::IvfFileSource;

pub const VIDEO_TRACK_ID: &str = "video";
pub const STREAM_ID: &str = "broadcast";

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid ivf stream: {0}")]
    Ivf(String),
    #[error("unsupported codec fourcc {0:?} (expected VP80)")]
    UnsupportedCodec(String),
}

/// Raw frame layout requested from the capture device. The encoder takes
/// packed 4:2:2, so this never changes at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Yuy2,
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Yuy2 => f.write_str("YUY2"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureProfile {
    pub pixel_format: PixelFormat,
    pub width: u16,
    pub height: u16,
}

impl Default for CaptureProfile {
    fn default() -> Self {
        Self {
            pixel_format: PixelFormat::Yuy2,
            width: 640,
            height: 480,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoCodecConfig {
    pub mime_type: String,
    pub clock_rate: u32,
    pub payload_type: u8,
    /// Bits per second.
    pub target_bitrate: u64,
}

impl Default for VideoCodecConfig {
    fn default() -> Self {
        Self {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90_000,
            payload_type: 96,
            target_bitrate: 500_000,
        }
    }
}

impl VideoCodecConfig {
    pub fn capability(&self) -> RTCRtpCodecCapability {
        RTCRtpCodecCapability {
            mime_type: self.mime_type.clone(),
            clock_rate: self.clock_rate,
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        }
    }

    pub fn sample_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::new(TrackLocalStaticSample::new(
            self.capability(),
            VIDEO_TRACK_ID.to_owned(),
            STREAM_ID.to_owned(),
        ))
    }
}

/// Tracks produced by a capture source. Dropping the stream stops any
/// background pumps feeding them.
pub struct CaptureStream {
    tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl CaptureStream {
    pub fn new(tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>) -> Self {
        Self {
            tracks,
            tasks: Vec::new(),
        }
    }

    pub fn with_task(mut self, handle: tokio::task::JoinHandle<()>) -> Self {
        self.tasks.push(handle);
        self
    }

    pub fn tracks(&self) -> &[Arc<dyn TrackLocal + Send + Sync>] {
        &self.tracks
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        for handle in self.tasks.drain(..) {
            handle.abort();
        }
    }
}

#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn open(
        &self,
        profile: &CaptureProfile,
        codec: &VideoCodecConfig,
    ) -> Result<CaptureStream, MediaError>;
}

/// Attaches a video track that never carries samples. Negotiation proceeds
/// exactly as with a live source.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleSource;

#[async_trait]
impl CaptureSource for IdleSource {
    async fn open(
        &self,
        profile: &CaptureProfile,
        codec: &VideoCodecConfig,
    ) -> Result<CaptureStream, MediaError> {
        tracing::info!(
            target = "media",
            format = %profile.pixel_format,
            width = profile.width,
            height = profile.height,
            "no video source configured; attaching idle track"
        );
        let track: Arc<dyn TrackLocal + Send + Sync> = codec.sample_track();
        Ok(CaptureStream::new(vec![track]))
    }
}
