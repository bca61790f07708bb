//! Export of finished sessions: CSV, text report and SVG charts.
//!
//! Nothing here computes statistics; every number comes from the
//! aggregator's finalized [`SessionSummary`].

pub mod charts;
pub mod csv;
pub mod text;

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

use crate::aggregation::SessionSummary;
use crate::models::FrameSample;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_info;

pub use self::csv::{read_samples_csv, reaggregate, write_samples_csv, CsvRow};
pub use charts::{chart_paths, write_charts};
pub use text::{render_report, ReportContext};

/// Output file names for one export, all sharing the same stamp.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportPaths {
    pub csv: PathBuf,
    pub report: PathBuf,
    pub chart_stem: String,
    pub charts: Vec<PathBuf>,
}

impl ExportPaths {
    fn for_stamp(dir: &Path, stamp: &str) -> Self {
        let chart_stem = format!("emotion_analysis_{stamp}");
        Self {
            csv: dir.join(format!("emotion_data_{stamp}.csv")),
            report: dir.join(format!("emotion_report_{stamp}.txt")),
            charts: chart_paths(dir, &chart_stem),
            chart_stem,
        }
    }

    /// Names stamped `<YYYYmmdd_HHMMSS>`, with `_1`, `_2`, ... appended
    /// until none of them exists in `dir`.
    pub fn allocate(dir: &Path, at: DateTime<Local>) -> Self {
        let base = at.format("%Y%m%d_%H%M%S").to_string();
        let mut paths = Self::for_stamp(dir, &base);
        let mut suffix = 1;
        while paths.any_exists() {
            paths = Self::for_stamp(dir, &format!("{base}_{suffix}"));
            suffix += 1;
        }
        paths
    }

    fn any_exists(&self) -> bool {
        self.csv.exists() || self.report.exists() || self.charts.iter().any(|path| path.exists())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportedFiles {
    pub csv: PathBuf,
    pub report: PathBuf,
    pub charts: Vec<PathBuf>,
}

pub struct ExportRequest<'a> {
    pub output_dir: &'a Path,
    pub source: &'a str,
    pub summary: &'a SessionSummary,
    pub samples: &'a [FrameSample],
    pub failure: Option<&'a str>,
    pub write_charts: bool,
}

/// Write the CSV, the text report and (optionally) the charts for one
/// session into `output_dir`.
pub fn export_session(request: ExportRequest<'_>) -> Result<ExportedFiles> {
    let output_dir = request.output_dir;
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output directory {}", output_dir.display()))?;

    let now = Local::now();
    let paths = ExportPaths::allocate(output_dir, now);
    write_samples_csv(&paths.csv, request.samples)?;
    log_info!("Data saved to {}", paths.csv.display());

    let report = render_report(
        request.summary,
        &ReportContext {
            source: request.source,
            generated_at: now,
            failure: request.failure,
        },
    );
    fs::write(&paths.report, report)
        .with_context(|| format!("failed to write {}", paths.report.display()))?;
    log_info!("Report saved to {}", paths.report.display());

    let charts = if request.write_charts {
        let charts = write_charts(output_dir, &paths.chart_stem, request.summary)?;
        log_info!("{} charts saved to {}", charts.len(), output_dir.display());
        charts
    } else {
        Vec::new()
    };

    Ok(ExportedFiles {
        csv: paths.csv,
        report: paths.report,
        charts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{AggregationConfig, Aggregator};
    use crate::models::{EmotionLabel, EmotionVector};
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn fear_session(fear: f64) -> (Aggregator, SessionSummary) {
        let mut aggregator = Aggregator::new(AggregationConfig::default()).unwrap();
        aggregator
            .ingest(0, 0.0, EmotionVector::zeroed().with(EmotionLabel::Fear, fear))
            .unwrap();
        let summary = aggregator.finalize().unwrap();
        (aggregator, summary)
    }

    #[test]
    fn exports_every_artifact() {
        let mut aggregator = Aggregator::new(AggregationConfig::default()).unwrap();
        aggregator
            .ingest(0, 0.0, EmotionVector::zeroed().with(EmotionLabel::Fear, 0.9))
            .unwrap();
        let summary = aggregator.finalize().unwrap();

        let dir = tempdir().unwrap();
        let files = export_session(ExportRequest {
            output_dir: &dir.path().join("out"),
            source: "clip.mp4",
            summary: &summary,
            samples: aggregator.samples(),
            failure: None,
            write_charts: true,
        })
        .unwrap();

        assert!(files.csv.exists());
        assert!(files.report.exists());
        assert_eq!(files.charts.len(), 5);
        let name = files.csv.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("emotion_data_") && name.ends_with(".csv"));
        assert_eq!(read_samples_csv(&files.csv).unwrap().len(), 1);
    }

    #[test]
    fn charts_can_be_skipped() {
        let mut aggregator = Aggregator::new(AggregationConfig::default()).unwrap();
        let summary = aggregator.finalize().unwrap();
        let dir = tempdir().unwrap();
        let files = export_session(ExportRequest {
            output_dir: dir.path(),
            source: "/dev/video0",
            summary: &summary,
            samples: &[],
            failure: Some("camera disconnected"),
            write_charts: false,
        })
        .unwrap();
        assert!(files.charts.is_empty());
        let report = fs::read_to_string(&files.report).unwrap();
        assert!(report.contains("camera disconnected"));
    }

    #[test]
    fn allocated_names_share_one_stamp() {
        let dir = tempdir().unwrap();
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let first = ExportPaths::allocate(dir.path(), at);
        assert!(first.csv.ends_with("emotion_data_20240309_140507.csv"));
        assert!(first.report.ends_with("emotion_report_20240309_140507.txt"));
        assert_eq!(first.chart_stem, "emotion_analysis_20240309_140507");

        // A leftover chart alone is enough to move every name along.
        fs::write(&first.charts[2], "").unwrap();
        let second = ExportPaths::allocate(dir.path(), at);
        assert!(second.csv.ends_with("emotion_data_20240309_140507_1.csv"));
        assert_eq!(second.chart_stem, "emotion_analysis_20240309_140507_1");
        assert!(second.charts.iter().all(|path| !path.exists()));
    }

    #[test]
    fn back_to_back_exports_keep_their_own_charts() {
        let dir = tempdir().unwrap();
        let (calm, calm_summary) = fear_session(0.1);
        let (tense, tense_summary) = fear_session(0.9);

        let mut exported = Vec::new();
        for (aggregator, summary) in [(&calm, &calm_summary), (&tense, &tense_summary)] {
            exported.push(
                export_session(ExportRequest {
                    output_dir: dir.path(),
                    source: "clip.mp4",
                    summary,
                    samples: aggregator.samples(),
                    failure: None,
                    write_charts: true,
                })
                .unwrap(),
            );
        }

        let (first, second) = (&exported[0], &exported[1]);
        assert_ne!(first.csv, second.csv);
        assert_ne!(first.report, second.report);
        for (a, b) in first.charts.iter().zip(&second.charts) {
            assert_ne!(a, b);
            assert!(a.exists() && b.exists());
        }

        let first_stem = first.csv.file_stem().unwrap().to_string_lossy().replace("emotion_data_", "");
        assert!(first
            .charts
            .iter()
            .all(|chart| chart.to_string_lossy().contains(&format!("emotion_analysis_{first_stem}_"))));

        let rows = read_samples_csv(&first.csv).unwrap();
        assert!((rows[0].fear - 0.1).abs() < 1e-12);
    }
}
