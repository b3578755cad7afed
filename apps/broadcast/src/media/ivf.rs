use async_trait::async_trait;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use webrtc::media::Sample;
use webrtc::media::io::ivf_reader::{IVFFileHeader, IVFReader};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use super::{
    CaptureProfile, CaptureSource, CaptureStream, MediaError, VIDEO_TRACK_ID, VideoCodecConfig,
};

const VP8_FOURCC: &[u8; 4] = b"VP80";
const FALLBACK_FRAME_DURATION: Duration = Duration::from_millis(33);
const BITRATE_WINDOW: Duration = Duration::from_secs(5);

type FileReader = IVFReader<BufReader<File>>;

/// Streams pre-encoded VP8 frames from an IVF file, looping at end of file.
#[derive(Debug, Clone)]
pub struct IvfFileSource {
    path: PathBuf,
}

impl IvfFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn open_reader(path: &Path) -> Result<(FileReader, IVFFileHeader), MediaError> {
    let file = File::open(path).map_err(|source| MediaError::Open {
        path: path.display().to_string(),
        source,
    })?;
    IVFReader::new(BufReader::new(file)).map_err(|err| MediaError::Ivf(err.to_string()))
}

fn frame_duration(header: &IVFFileHeader) -> Duration {
    if header.timebase_denominator == 0 || header.timebase_numerator == 0 {
        return FALLBACK_FRAME_DURATION;
    }
    let nanos =
        u64::from(header.timebase_numerator) * 1_000_000_000 / u64::from(header.timebase_denominator);
    // A zero period would make the pacing interval panic.
    if nanos == 0 {
        return FALLBACK_FRAME_DURATION;
    }
    Duration::from_nanos(nanos)
}

#[async_trait]
impl CaptureSource for IvfFileSource {
    async fn open(
        &self,
        profile: &CaptureProfile,
        codec: &VideoCodecConfig,
    ) -> Result<CaptureStream, MediaError> {
        let (reader, header) = open_reader(&self.path)?;
        if &header.four_cc != VP8_FOURCC {
            return Err(MediaError::UnsupportedCodec(
                String::from_utf8_lossy(&header.four_cc).into_owned(),
            ));
        }
        if header.width != profile.width || header.height != profile.height {
            warn!(
                target = "media",
                file_width = header.width,
                file_height = header.height,
                profile_width = profile.width,
                profile_height = profile.height,
                "ivf resolution differs from capture profile"
            );
        }

        let duration = frame_duration(&header);
        info!(
            target = "media",
            path = %self.path.display(),
            frames = header.num_frames,
            frame_ms = duration.as_millis() as u64,
            "streaming ivf file"
        );

        let track = codec.sample_track();
        let pump = tokio::spawn(pump_frames(
            self.path.clone(),
            reader,
            duration,
            Arc::clone(&track),
            BitrateMeter::new(codec.target_bitrate),
        ));
        let track: Arc<dyn TrackLocal + Send + Sync> = track;
        Ok(CaptureStream::new(vec![track]).with_task(pump))
    }
}

async fn pump_frames(
    path: PathBuf,
    mut reader: FileReader,
    duration: Duration,
    track: Arc<TrackLocalStaticSample>,
    mut meter: BitrateMeter,
) {
    let mut ticker = tokio::time::interval(duration);
    let mut frames_since_rewind = 0u64;
    loop {
        ticker.tick().await;
        let frame = match reader.parse_next_frame() {
            Ok((frame, _)) => frame,
            Err(err) if frames_since_rewind > 0 => {
                debug!(target = "media", reason = %err, "end of ivf stream; rewinding");
                match open_reader(&path) {
                    Ok((next, _)) => {
                        reader = next;
                        frames_since_rewind = 0;
                        continue;
                    }
                    Err(err) => {
                        warn!(target = "media", track = VIDEO_TRACK_ID, error = %err, "track ended");
                        return;
                    }
                }
            }
            Err(err) => {
                warn!(target = "media", track = VIDEO_TRACK_ID, error = %err, "track ended");
                return;
            }
        };
        frames_since_rewind += 1;
        meter.record(frame.len(), Instant::now());

        let sample = Sample {
            data: frame.freeze(),
            duration,
            ..Default::default()
        };
        if let Err(err) = track.write_sample(&sample).await {
            warn!(target = "media", track = VIDEO_TRACK_ID, error = %err, "track ended");
            return;
        }
    }
}

/// Rolling estimate of the bitrate actually produced by the source.
#[derive(Debug)]
struct BitrateMeter {
    target: u64,
    window_start: Option<Instant>,
    bytes: u64,
}

impl BitrateMeter {
    fn new(target: u64) -> Self {
        Self {
            target,
            window_start: None,
            bytes: 0,
        }
    }

    /// Returns the observed bits per second when a window closes.
    fn record(&mut self, len: usize, now: Instant) -> Option<u64> {
        let start = *self.window_start.get_or_insert(now);
        self.bytes += len as u64;
        let elapsed = now.duration_since(start);
        if elapsed < BITRATE_WINDOW {
            return None;
        }
        let observed = (self.bytes * 8 * 1_000) / (elapsed.as_millis().max(1) as u64);
        debug!(
            target = "media",
            observed_bps = observed,
            target_bps = self.target,
            over_target = observed > self.target,
            "video bitrate"
        );
        self.window_start = Some(now);
        self.bytes = 0;
        Some(observed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(numerator: u32, denominator: u32) -> IVFFileHeader {
        IVFFileHeader {
            timebase_denominator: denominator,
            timebase_numerator: numerator,
            ..Default::default()
        }
    }

    #[test]
    fn frame_duration_follows_timebase() {
        assert_eq!(frame_duration(&header(1, 25)), Duration::from_millis(40));
        assert_eq!(frame_duration(&header(1, 0)), FALLBACK_FRAME_DURATION);
    }

    #[test]
    fn sub_nanosecond_timebase_falls_back() {
        assert_eq!(frame_duration(&header(1, 4_000_000_000)), FALLBACK_FRAME_DURATION);
        assert_eq!(frame_duration(&header(1, 1_000_000_000)), Duration::from_nanos(1));
    }

    #[test]
    fn bitrate_meter_reports_once_per_window() {
        let mut meter = BitrateMeter::new(500_000);
        let start = Instant::now();
        assert_eq!(meter.record(62_500, start), None);
        assert_eq!(meter.record(62_500, start + Duration::from_secs(1)), None);
        // 312_500 bytes over 5s is 500 kbit/s.
        let observed = meter.record(187_500, start + BITRATE_WINDOW);
        assert_eq!(observed, Some(500_000));
        assert_eq!(meter.bytes, 0);
    }

    #[tokio::test]
    async fn missing_file_is_an_open_error() {
        let err = IvfFileSource::new("/nonexistent/clip.ivf")
            .open(&CaptureProfile::default(), &VideoCodecConfig::default())
            .await
            .err()
            .expect("open should fail");
        assert!(matches!(err, MediaError::Open { .. }));
    }
}
