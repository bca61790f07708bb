use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
};

use crate::aggregation::AggregationConfig;
use crate::capture::ConfidenceScale;

/// External classifier invocation. The frame path is appended as the last
/// argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    pub program: String,
    pub args: Vec<String>,
    pub scale: ConfidenceScale,
    pub timeout_secs: u64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            program: "deepface-emotion".into(),
            args: Vec::new(),
            scale: ConfidenceScale::Percent,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveSettings {
    /// Capture device handed to ffmpeg, e.g. `/dev/video0` or `0` on macOS.
    pub device: String,
    /// ffmpeg input format; platform default when empty.
    pub input_format: String,
    pub capture_interval_ms: u64,
    pub capture_timeout_secs: u64,
    /// How often the console display refreshes, in seconds.
    pub display_interval_secs: u64,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            device: default_camera_device().into(),
            input_format: String::new(),
            capture_interval_ms: 500,
            capture_timeout_secs: 10,
            display_interval_secs: 5,
        }
    }
}

fn default_camera_device() -> &'static str {
    if cfg!(target_os = "macos") {
        "0"
    } else if cfg!(target_os = "windows") {
        "video=Integrated Camera"
    } else {
        "/dev/video0"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub video_path: Option<PathBuf>,
    pub output_dir: PathBuf,
    /// Session history; `None` disables persistence.
    pub database_path: Option<PathBuf>,
    /// Seconds between analyzed frames of a video file.
    pub sample_interval_secs: f64,
    pub ffmpeg_program: String,
    pub write_charts: bool,
    pub aggregation: AggregationConfig,
    pub classifier: ClassifierSettings,
    pub live: LiveSettings,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            video_path: None,
            output_dir: PathBuf::from("."),
            database_path: Some(PathBuf::from("emotrack.sqlite3")),
            sample_interval_secs: 1.0,
            ffmpeg_program: "ffmpeg".into(),
            write_charts: true,
            aggregation: AggregationConfig::default(),
            classifier: ClassifierSettings::default(),
            live: LiveSettings::default(),
        }
    }
}

/// `EMOTRACK_DEBUG=1` turns on debug logging and a per-tick live display.
pub fn debug_mode() -> bool {
    std::env::var("EMOTRACK_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<AnalysisSettings>,
}

impl SettingsStore {
    /// Load settings from `path`, falling back to defaults when the file is
    /// missing or unreadable as JSON.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(
                    "Ignoring malformed settings file {}: {err}",
                    path.display()
                );
                AnalysisSettings::default()
            })
        } else {
            AnalysisSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> AnalysisSettings {
        self.data
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Remember `video_path` as the default input for later runs.
    pub fn update_video_path(&self, video_path: PathBuf) -> Result<()> {
        self.update(|settings| settings.video_path = Some(video_path))
    }

    pub fn update<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut AnalysisSettings),
    {
        let mut guard = self
            .data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        apply(&mut guard);
        self.persist(&guard)
    }

    fn persist(&self, data: &AnalysisSettings) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("emotrack.json")).unwrap();
        let settings = store.settings();
        assert_eq!(settings, AnalysisSettings::default());
        assert_eq!(settings.sample_interval_secs, 1.0);
        assert_eq!(settings.live.capture_interval_ms, 500);
    }

    #[test]
    fn video_path_update_is_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("emotrack.json");
        let store = SettingsStore::new(path.clone()).unwrap();
        store
            .update_video_path(PathBuf::from("interview.mp4"))
            .unwrap();

        let reloaded = SettingsStore::new(path).unwrap();
        assert_eq!(
            reloaded.settings().video_path,
            Some(PathBuf::from("interview.mp4"))
        );
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("emotrack.json");
        fs::write(&path, "{ not json").unwrap();
        let store = SettingsStore::new(path).unwrap();
        assert_eq!(store.settings(), AnalysisSettings::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("emotrack.json");
        fs::write(
            &path,
            r#"{"sample_interval_secs": 0.5, "classifier": {"program": "/opt/df/run"}}"#,
        )
        .unwrap();
        let settings = SettingsStore::new(path).unwrap().settings();
        assert_eq!(settings.sample_interval_secs, 0.5);
        assert_eq!(settings.classifier.program, "/opt/df/run");
        assert_eq!(settings.classifier.scale, ConfidenceScale::Percent);
        assert!(settings.write_charts);
    }
}
