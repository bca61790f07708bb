use anyhow::{bail, Context, Result};
use std::{
    fs,
    path::PathBuf,
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};
use tempfile::TempDir;

use super::source::{Frame, FrameSource};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const WARMUP_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const DECODE_ATTEMPTS: u32 = 3;

fn default_input_format() -> &'static str {
    if cfg!(target_os = "macos") {
        "avfoundation"
    } else if cfg!(target_os = "windows") {
        "dshow"
    } else {
        "v4l2"
    }
}

/// Live camera frames.
///
/// Capture is delegated to an ffmpeg child that keeps overwriting a single
/// JPEG. Each call copies the latest image aside and timestamps it with the
/// time elapsed since the camera was opened.
pub struct CameraSource {
    child: Child,
    scratch: TempDir,
    latest: PathBuf,
    started: Instant,
    next_index: u64,
    device: String,
}

impl CameraSource {
    pub fn open(
        ffmpeg_program: &str,
        device: &str,
        input_format: &str,
        frames_per_sec: f64,
    ) -> Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix("emotrack-camera-")
            .tempdir()
            .context("failed to create camera scratch directory")?;
        let latest = scratch.path().join("latest.jpg");
        let format = if input_format.is_empty() {
            default_input_format()
        } else {
            input_format
        };

        let child = Command::new(ffmpeg_program)
            .args(["-hide_banner", "-loglevel", "error", "-nostdin", "-f", format, "-i", device])
            .args(["-vf", &format!("fps={frames_per_sec}"), "-update", "1", "-y"])
            .arg(&latest)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to launch {ffmpeg_program} for camera {device}"))?;

        log_info!("Camera capture started on {device} ({format})");

        Ok(Self {
            child,
            scratch,
            latest,
            started: Instant::now(),
            next_index: 0,
            device: device.to_string(),
        })
    }

    fn ensure_running(&mut self) -> Result<()> {
        if let Some(status) = self.child.try_wait()? {
            bail!("camera capture for {} exited ({status})", self.device);
        }
        Ok(())
    }

    fn wait_for_first_image(&mut self) -> Result<()> {
        let deadline = Instant::now() + WARMUP_TIMEOUT;
        while !self.latest.exists() {
            self.ensure_running()?;
            if Instant::now() >= deadline {
                bail!("camera {} produced no image within {:?}", self.device, WARMUP_TIMEOUT);
            }
            thread::sleep(POLL_INTERVAL);
        }
        Ok(())
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.ensure_running()?;
        self.wait_for_first_image()?;

        let index = self.next_index;
        let path = self.scratch.path().join(format!("frame_{index:06}.jpg"));

        // ffmpeg may be halfway through rewriting the file; retry a few times.
        let mut attempt = 0;
        let (width, height) = loop {
            attempt += 1;
            fs::copy(&self.latest, &path).context("failed to copy camera frame")?;
            match image::open(&path) {
                Ok(img) => break (img.width(), img.height()),
                Err(err) if attempt < DECODE_ATTEMPTS => {
                    log_warn!("camera frame {index} not decodable yet: {err}");
                    thread::sleep(POLL_INTERVAL);
                }
                Err(err) => {
                    return Err(err).context("camera frame could not be decoded");
                }
            }
        };

        if index >= 2 {
            let stale = self
                .scratch
                .path()
                .join(format!("frame_{:06}.jpg", index - 2));
            let _ = fs::remove_file(stale);
        }

        self.next_index += 1;
        Ok(Some(Frame {
            index,
            timestamp: self.started.elapsed().as_secs_f64(),
            path,
            width,
            height,
        }))
    }

    fn describe(&self) -> String {
        format!("camera {}", self.device)
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            if let Err(err) = self.child.kill() {
                log_warn!("failed to stop camera capture: {err}");
            }
            let _ = self.child.wait();
        }
    }
}
