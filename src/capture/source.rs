use anyhow::{anyhow, bail, Context, Result};
use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};
use tempfile::TempDir;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Container formats accepted for batch analysis. Decoding itself is left to
/// ffmpeg; this list only gates what we hand over.
pub const SUPPORTED_VIDEO_EXTENSIONS: [&str; 7] = ["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm"];

const FRAME_IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

pub fn is_supported_video(path: &Path) -> bool {
    has_extension(path, &SUPPORTED_VIDEO_EXTENSIONS)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// A decoded frame on disk, ready for the classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub index: u64,
    /// Seconds from stream start.
    pub timestamp: f64,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// Sequential supplier of frames in non-decreasing timestamp order.
///
/// `Ok(None)` marks the end of a finite stream. Errors are upstream
/// failures (decoder crash, camera gone) and end the session.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Frames still to come, when known.
    fn remaining_hint(&self) -> Option<usize> {
        None
    }

    fn describe(&self) -> String;
}

/// Frames read from image files in name order, spaced `interval_secs` apart.
pub struct ImageSequenceSource {
    pending: VecDeque<PathBuf>,
    interval_secs: f64,
    next_index: u64,
    label: String,
}

impl ImageSequenceSource {
    pub fn from_dir(dir: &Path, interval_secs: f64) -> Result<Self> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir)
            .with_context(|| format!("failed to list frames in {}", dir.display()))?
        {
            let path = entry?.path();
            if path.is_file() && has_extension(&path, &FRAME_IMAGE_EXTENSIONS) {
                paths.push(path);
            }
        }
        paths.sort();
        Self::from_paths(paths, interval_secs, dir.display().to_string())
    }

    pub fn from_paths(paths: Vec<PathBuf>, interval_secs: f64, label: String) -> Result<Self> {
        if !(interval_secs.is_finite() && interval_secs > 0.0) {
            bail!("frame interval must be a positive number of seconds, got {interval_secs}");
        }
        Ok(Self {
            pending: paths.into(),
            interval_secs,
            next_index: 0,
            label,
        })
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(None);
        };

        let (width, height) = image::image_dimensions(&path)
            .with_context(|| format!("failed to read frame {}", path.display()))?;
        let index = self.next_index;
        self.next_index += 1;

        Ok(Some(Frame {
            index,
            timestamp: index as f64 * self.interval_secs,
            path,
            width,
            height,
        }))
    }

    fn remaining_hint(&self) -> Option<usize> {
        Some(self.pending.len())
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// A video file sampled every `interval_secs` by an external ffmpeg.
///
/// Frames are extracted into a scratch directory when the source is opened
/// and handed out one at a time afterwards.
pub struct VideoFileSource {
    frames: ImageSequenceSource,
    video_path: PathBuf,
    _scratch: TempDir,
}

impl VideoFileSource {
    pub fn open(video_path: &Path, ffmpeg_program: &str, interval_secs: f64) -> Result<Self> {
        if !is_supported_video(video_path) {
            bail!(
                "unsupported video format for {} (expected one of: {})",
                video_path.display(),
                SUPPORTED_VIDEO_EXTENSIONS.join(", ")
            );
        }
        if !video_path.is_file() {
            bail!("video file not found: {}", video_path.display());
        }
        if !(interval_secs.is_finite() && interval_secs > 0.0) {
            bail!("sample interval must be positive, got {interval_secs}");
        }

        let scratch = tempfile::Builder::new()
            .prefix("emotrack-frames-")
            .tempdir()
            .context("failed to create frame scratch directory")?;
        let pattern = scratch.path().join("frame_%06d.png");

        log_info!(
            "Extracting frames from {} every {}s",
            video_path.display(),
            interval_secs
        );
        let output = Command::new(ffmpeg_program)
            .args(["-hide_banner", "-loglevel", "error", "-nostdin", "-i"])
            .arg(video_path)
            .args(["-vf", &format!("fps={}", 1.0 / interval_secs)])
            .arg(&pattern)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to launch {ffmpeg_program}"))?;

        if !output.status.success() {
            return Err(anyhow!(
                "{ffmpeg_program} could not decode {}: {}",
                video_path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let frames = ImageSequenceSource::from_dir(scratch.path(), interval_secs)?
            .with_label(video_path.display().to_string());
        log_debug!(
            "Extracted {} frames into {}",
            frames.remaining_hint().unwrap_or(0),
            scratch.path().display()
        );

        Ok(Self {
            frames,
            video_path: video_path.to_path_buf(),
            _scratch: scratch,
        })
    }
}

impl ImageSequenceSource {
    fn with_label(mut self, label: String) -> Self {
        self.label = label;
        self
    }
}

impl FrameSource for VideoFileSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.frames.next_frame()
    }

    fn remaining_hint(&self) -> Option<usize> {
        self.frames.remaining_hint()
    }

    fn describe(&self) -> String {
        self.video_path.display().to_string()
    }
}
