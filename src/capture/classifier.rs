use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    env,
    io::Read,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use crate::models::{EmotionLabel, EmotionVector};
use crate::settings::ClassifierSettings;

use super::source::Frame;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = false;

use crate::log_debug;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Result of classifying one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Emotions(EmotionVector),
    /// No face in the frame; skipped, not an error.
    NoFace,
}

/// Frame → emotion confidences.
pub trait EmotionClassifier: Send + Sync {
    fn classify(&self, frame: &Frame) -> Result<Classification>;

    fn name(&self) -> &str;
}

/// Scale of the numbers the classifier prints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceScale {
    /// 0 to 100, as DeepFace reports.
    Percent,
    /// 0 to 1.
    Unit,
}

impl ConfidenceScale {
    fn normalize(&self, value: f64) -> f64 {
        match self {
            ConfidenceScale::Percent => value / 100.0,
            ConfidenceScale::Unit => value,
        }
    }
}

/// Runs an external program once per frame and reads DeepFace-style JSON
/// from its stdout. The frame path is passed as the final argument.
pub struct CommandClassifier {
    program: PathBuf,
    args: Vec<String>,
    scale: ConfidenceScale,
    timeout: Duration,
    name: String,
}

impl CommandClassifier {
    /// Fails when the program cannot be found, so a broken setup is caught
    /// before any frame is decoded.
    pub fn new(settings: &ClassifierSettings) -> Result<Self> {
        let program = resolve_program(&settings.program).ok_or_else(|| {
            anyhow!(
                "emotion classifier '{}' not found; set classifier.program in the settings file",
                settings.program
            )
        })?;

        Ok(Self {
            name: settings.program.clone(),
            program,
            args: settings.args.clone(),
            scale: settings.scale,
            timeout: Duration::from_secs(settings.timeout_secs.max(1)),
        })
    }
}

impl EmotionClassifier for CommandClassifier {
    fn classify(&self, frame: &Frame) -> Result<Classification> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(&frame.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to run classifier {}", self.name))?;

        // Drain both pipes while waiting; model runtimes are chatty on stderr.
        let stdout = child.stdout.take().context("classifier stdout unavailable")?;
        let stderr = child.stderr.take().context("classifier stderr unavailable")?;
        let stdout_reader = spawn_pipe_reader(stdout);
        let stderr_reader = spawn_pipe_reader(stderr);

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                bail!(
                    "classifier timed out after {:?} on frame {}",
                    self.timeout,
                    frame.index
                );
            }
            thread::sleep(POLL_INTERVAL);
        };

        let output = stdout_reader
            .join()
            .map_err(|_| anyhow!("classifier output reader panicked"))?
            .context("failed to read classifier output")?;
        let stderr = stderr_reader
            .join()
            .ok()
            .and_then(|result| result.ok())
            .unwrap_or_default();

        if !status.success() {
            bail!(
                "classifier exited with {status} on frame {}: {}",
                frame.index,
                stderr.trim()
            );
        }

        log_debug!("frame {} classified in {:?}", frame.index, started.elapsed());
        parse_classifier_output(&output, self.scale)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn spawn_pipe_reader<R>(mut pipe: R) -> thread::JoinHandle<std::io::Result<String>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buffer = String::new();
        pipe.read_to_string(&mut buffer).map(|_| buffer)
    })
}

fn resolve_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let paths = env::var_os("PATH")?;
    env::split_paths(&paths).find_map(|dir| {
        let full = dir.join(program);
        if full.is_file() {
            return Some(full);
        }
        if cfg!(windows) {
            let exe = dir.join(format!("{program}.exe"));
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}

/// Parse classifier JSON.
///
/// Accepts a DeepFace result object (`{"emotion": {...}, ...}`), a list of
/// them (first face wins), or a bare label → confidence map. An empty list,
/// `"face": false` or a zero `face_confidence` means no face. Unknown labels
/// are ignored; missing ones are left for the aggregator to reject.
pub fn parse_classifier_output(raw: &str, scale: ConfidenceScale) -> Result<Classification> {
    let value: Value = serde_json::from_str(raw.trim()).context("classifier output is not JSON")?;

    let object = match value {
        Value::Array(items) => match items.into_iter().next() {
            Some(Value::Object(object)) => object,
            Some(other) => bail!("unexpected classifier list item: {other}"),
            None => return Ok(Classification::NoFace),
        },
        Value::Object(object) => object,
        other => bail!("unexpected classifier output: {other}"),
    };

    if no_face(&object) {
        return Ok(Classification::NoFace);
    }

    let emotions = match object.get("emotion") {
        Some(Value::Object(inner)) => inner,
        Some(other) => bail!("classifier 'emotion' field is not an object: {other}"),
        None => &object,
    };

    let mut vector = EmotionVector::new();
    for (key, raw_value) in emotions {
        let Ok(label) = key.parse::<EmotionLabel>() else {
            continue;
        };
        let confidence = raw_value
            .as_f64()
            .ok_or_else(|| anyhow!("confidence for {label} is not a number: {raw_value}"))?;
        vector.set(label, scale.normalize(confidence));
    }

    if vector.is_empty() {
        bail!("classifier output carries no emotion confidences");
    }
    Ok(Classification::Emotions(vector))
}

fn no_face(object: &Map<String, Value>) -> bool {
    let flagged_absent = ["face", "face_detected"]
        .iter()
        .any(|key| object.get(*key) == Some(&Value::Bool(false)));
    let zero_confidence = object
        .get("face_confidence")
        .and_then(Value::as_f64)
        .map(|confidence| confidence <= 0.0)
        .unwrap_or(false);
    flagged_absent || zero_confidence
}
