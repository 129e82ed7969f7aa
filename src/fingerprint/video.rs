//! Video fingerprints from sampled frames.
//!
//! A video is reduced to the perceptual hashes of frames sampled on a
//! fixed time grid, or evenly across its duration for short clips.
//! Decoding is delegated to a [`FrameSource`]; the default implementation
//! shells out to `ffprobe` and `ffmpeg`, which keeps native codec libraries
//! out of the build. Child processes still running when the extraction's
//! [`Deadline`] passes are killed.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

use image::DynamicImage;

use super::{Deadline, ExtractionError, PerceptualHasher, VideoFingerprint};

/// Minimum number of frames sampled from any video.
pub const MIN_FRAMES: usize = 3;

const CHILD_POLL: Duration = Duration::from_millis(10);

/// Container-level facts about a video.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    /// Duration in seconds, when the container reports one
    pub duration_secs: Option<f64>,
}

/// Black-box frame decoding.
pub trait FrameSource: Send + Sync {
    /// Read container metadata, giving up once `deadline` passes.
    fn probe(&self, path: &Path, deadline: Deadline) -> Result<VideoInfo, ExtractionError>;

    /// Decode the frame shown at `at_secs`, giving up once `deadline`
    /// passes.
    fn frame_at(
        &self,
        path: &Path,
        at_secs: f64,
        deadline: Deadline,
    ) -> Result<DynamicImage, ExtractionError>;
}

/// Default spacing between sampled frames, in seconds.
pub const DEFAULT_INTERVAL_SECS: f64 = 5.0;

/// Where in a video frames are sampled.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSampling {
    /// Frames to take at least (never fewer than [`MIN_FRAMES`])
    pub frames: usize,
    /// Fixed spacing between frames; `None` or zero samples by count only
    pub interval_secs: Option<f64>,
    /// Upper bound on frames per video
    pub max_frames: usize,
}

impl Default for FrameSampling {
    fn default() -> Self {
        Self {
            frames: 10,
            interval_secs: Some(DEFAULT_INTERVAL_SECS),
            max_frames: 120,
        }
    }
}

impl FrameSampling {
    fn cap(&self) -> usize {
        self.max_frames.max(MIN_FRAMES)
    }

    /// Number of frames to take from a video of the given duration.
    #[must_use]
    pub fn frame_count(&self, duration_secs: f64) -> usize {
        self.timestamps(duration_secs).len()
    }

    /// Sample timestamps in seconds.
    ///
    /// With an interval, frames sit on a fixed grid at `(i + 0.5) * step`
    /// from the start of the video, so a copy trimmed by whole steps
    /// samples the same frames shifted by a constant offset. The step is
    /// the interval, widened by a whole factor when the grid would pass
    /// `max_frames`. Without an interval, or when the grid would yield
    /// fewer than `frames` points, the video is cut into `frames` equal
    /// slices and sampled at their midpoints.
    #[must_use]
    pub fn timestamps(&self, duration_secs: f64) -> Vec<f64> {
        let cap = self.cap();
        let least = self.frames.max(MIN_FRAMES).min(cap);

        if let Some(interval) = self.interval_secs.filter(|i| i.is_finite() && *i > 0.0) {
            let points = (duration_secs / interval).floor();
            if points.is_finite() && points >= least as f64 {
                let step = interval * (points / cap as f64).ceil().max(1.0);
                let n = ((duration_secs / step).floor() as usize).min(cap);
                if n >= least {
                    return (0..n).map(|i| (i as f64 + 0.5) * step).collect();
                }
            }
        }

        let step = duration_secs / least as f64;
        (0..least).map(|i| (i as f64 + 0.5) * step).collect()
    }
}

/// Sample and hash the frames of `path`.
///
/// Frames that fail to decode are skipped; the alignment window of the
/// video comparator absorbs the gap. A video with no decodable frame is
/// unsupported. Sampling stops with [`ExtractionError::Timeout`] once
/// `deadline` passes.
pub fn fingerprint_video(
    source: &dyn FrameSource,
    hasher: &PerceptualHasher,
    sampling: &FrameSampling,
    path: &Path,
    deadline: Deadline,
) -> Result<VideoFingerprint, ExtractionError> {
    let info = source.probe(path, deadline)?;
    let duration = info
        .duration_secs
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| ExtractionError::unsupported(path, "video reports no duration"))?;

    let timestamps = sampling.timestamps(duration);
    let mut frames = Vec::with_capacity(timestamps.len());
    let mut last_error = None;
    for at in &timestamps {
        if deadline.expired() {
            return Err(deadline.timeout_error(path));
        }
        match source.frame_at(path, *at, deadline) {
            Ok(img) => frames.push(hasher.hash_image(&img)),
            Err(e @ (ExtractionError::Unreadable { .. } | ExtractionError::Timeout { .. })) => {
                return Err(e)
            }
            Err(e) => {
                log::debug!("Skipping frame at {:.2}s of {}: {}", at, path.display(), e);
                last_error = Some(e);
            }
        }
    }

    if frames.is_empty() {
        return Err(last_error
            .unwrap_or_else(|| ExtractionError::unsupported(path, "no frames decoded")));
    }

    Ok(VideoFingerprint {
        frames,
        frame_count: timestamps.len(),
        duration_secs: Some(duration),
    })
}

/// [`FrameSource`] backed by the `ffprobe` and `ffmpeg` executables.
#[derive(Debug, Clone)]
pub struct FfmpegFrameSource {
    ffprobe: PathBuf,
    ffmpeg: PathBuf,
}

impl Default for FfmpegFrameSource {
    fn default() -> Self {
        Self {
            ffprobe: PathBuf::from("ffprobe"),
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }
}

impl FfmpegFrameSource {
    /// Use explicit executable paths.
    #[must_use]
    pub fn new(ffprobe: impl Into<PathBuf>, ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
            ffmpeg: ffmpeg.into(),
        }
    }

    /// Run `command` to completion and return its stdout. The child is
    /// killed if it outlives `deadline`.
    fn run(mut command: Command, path: &Path, deadline: Deadline) -> Result<Vec<u8>, ExtractionError> {
        let program = command.get_program().to_string_lossy().into_owned();
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExtractionError::unsupported(path, format!("cannot run {program}: {e}")))?;
        // both pipes are drained while waiting so a full buffer never stalls
        // the child
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if deadline.expired() => {
                    log::warn!("Killing {program} on {}: time budget spent", path.display());
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(deadline.timeout_error(path));
                }
                Ok(None) => std::thread::sleep(CHILD_POLL),
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ExtractionError::unsupported(
                        path,
                        format!("lost track of {program}: {e}"),
                    ));
                }
            }
        };

        let stdout = collect(stdout);
        if !status.success() {
            let stderr = collect(stderr);
            return Err(ExtractionError::unsupported(
                path,
                format!("{program} failed: {}", String::from_utf8_lossy(&stderr).trim()),
            ));
        }
        Ok(stdout)
    }
}

fn drain(mut pipe: impl Read + Send + 'static) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader.and_then(|h| h.join().ok()).unwrap_or_default()
}

impl FrameSource for FfmpegFrameSource {
    fn probe(&self, path: &Path, deadline: Deadline) -> Result<VideoInfo, ExtractionError> {
        File::open(path).map_err(|e| ExtractionError::from_io(path, &e))?;
        let mut command = Command::new(&self.ffprobe);
        command
            .args(["-v", "error", "-show_entries", "format=duration"])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(path);
        let stdout = Self::run(command, path, deadline)?;
        let duration_secs = String::from_utf8_lossy(&stdout).trim().parse::<f64>().ok();
        Ok(VideoInfo { duration_secs })
    }

    fn frame_at(
        &self,
        path: &Path,
        at_secs: f64,
        deadline: Deadline,
    ) -> Result<DynamicImage, ExtractionError> {
        let at = format!("{at_secs:.3}");
        let mut command = Command::new(&self.ffmpeg);
        command
            .args(["-v", "error", "-ss", at.as_str(), "-i"])
            .arg(path)
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"]);
        let stdout = Self::run(command, path, deadline)?;
        image::load_from_memory(&stdout).map_err(|e| ExtractionError::unsupported(path, e))
    }
}
