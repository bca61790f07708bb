use std::{future, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use log::{error, warn};
use tokio_util::sync::CancellationToken;

use crate::aggregation::{SessionSummary, SnapshotReader};
use crate::capture::{CameraSource, CommandClassifier, LoopConfig, VideoFileSource};
use crate::db::{Database, Session, SessionKind};
use crate::report::{self, ExportRequest};
use crate::session::{persist_outcome, BatchAnalyzer, RealtimeController, SessionOutcome};
use crate::settings::{debug_mode, AnalysisSettings};

pub const DEFAULT_CONFIG_PATH: &str = "emotrack.json";

/// Facial emotion session analyzer.
#[derive(Debug, Parser)]
#[command(name = "emotrack", version, about = "Emotion timelines and nervousness scores from video or camera")]
pub struct Cli {
    /// Settings file; created with defaults on first save.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Video to analyze; remembered in the settings file.
    #[arg(long, value_name = "PATH")]
    pub video: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, PartialEq)]
pub enum Command {
    /// Analyze the camera in real time until Ctrl-C or the duration elapses.
    Live {
        #[arg(long, value_name = "SECS")]
        duration: Option<u64>,
    },
    /// List recorded sessions, most recent first.
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Rebuild the report and charts from an exported CSV file.
    Reanalyze {
        #[arg(value_name = "CSV")]
        csv: PathBuf,
    },
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }
}

/// Open the history database, if configured, and close out sessions a
/// previous run left `Running`.
pub async fn open_history(settings: &AnalysisSettings) -> Result<Option<Database>> {
    let Some(path) = settings.database_path.clone() else {
        return Ok(None);
    };
    let db = Database::new(path)?;

    for session in db.get_incomplete_sessions().await? {
        warn!(
            "Recovered incomplete session {}; marking as Interrupted",
            session.id
        );
        db.mark_session_interrupted(&session.id, chrono::Utc::now())
            .await?;
    }
    Ok(Some(db))
}

pub async fn execute(command: Option<Command>, settings: AnalysisSettings) -> Result<()> {
    match command {
        None => {
            let db = open_history(&settings).await?;
            analyze_video(settings, db).await
        }
        Some(Command::Live { duration }) => {
            let db = open_history(&settings).await?;
            analyze_live(settings, db, duration.map(Duration::from_secs)).await
        }
        Some(Command::History { limit }) => {
            let db = open_history(&settings)
                .await?
                .ok_or_else(|| anyhow!("session history is disabled (database_path is null)"))?;
            print_history(&db, limit).await
        }
        Some(Command::Reanalyze { csv }) => reanalyze(settings, csv),
    }
}

async fn analyze_video(settings: AnalysisSettings, db: Option<Database>) -> Result<()> {
    let video = settings
        .video_path
        .clone()
        .ok_or_else(|| anyhow!("no video selected; pass --video PATH or set video_path"))?;
    let classifier = CommandClassifier::new(&settings.classifier)?;

    let ffmpeg = settings.ffmpeg_program.clone();
    let interval = settings.sample_interval_secs;
    let video_for_open = video.clone();
    let mut source = tokio::task::spawn_blocking(move || {
        VideoFileSource::open(&video_for_open, &ffmpeg, interval)
    })
    .await
    .context("frame extraction task failed")??;

    let session = Session::begin(
        SessionKind::Batch,
        video.display().to_string(),
        settings.aggregation.nervousness.name.clone(),
    );
    if let Some(db) = &db {
        db.insert_session(&session).await?;
    }

    let analyzer = BatchAnalyzer::new(settings.aggregation.clone());
    let outcome = tokio::task::spawn_blocking(move || {
        analyzer.analyze(session, &mut source, &classifier)
    })
    .await
    .context("analysis task failed")??;

    finish(&settings, db.as_ref(), outcome).await
}

async fn analyze_live(
    settings: AnalysisSettings,
    db: Option<Database>,
    duration: Option<Duration>,
) -> Result<()> {
    let live = &settings.live;
    let classifier = Arc::new(CommandClassifier::new(&settings.classifier)?);
    let frames_per_sec = 1000.0 / live.capture_interval_ms.max(1) as f64;
    let source = CameraSource::open(
        &settings.ffmpeg_program,
        &live.device,
        &live.input_format,
        frames_per_sec,
    )?;

    let controller = RealtimeController::new(
        settings.aggregation.clone(),
        LoopConfig {
            capture_interval: Duration::from_millis(live.capture_interval_ms.max(1)),
            capture_timeout: Duration::from_secs(live.capture_timeout_secs.max(1)),
        },
        db.clone(),
    );
    let reader = controller.start(Box::new(source), classifier).await?;

    let display_every = if debug_mode() {
        Duration::from_secs(1)
    } else {
        Duration::from_secs(live.display_interval_secs.max(1))
    };
    let display_stop = CancellationToken::new();
    let display = tokio::spawn(display_loop(reader, display_every, display_stop.clone()));

    println!("Live analysis running; press Ctrl-C to stop.");
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                error!("Failed to listen for Ctrl-C: {err}");
            }
        }
        _ = async {
            match duration {
                Some(duration) => tokio::time::sleep(duration).await,
                None => future::pending::<()>().await,
            }
        } => {}
        _ = controller.wait_for_exit() => {}
    }

    let outcome = controller.stop().await?;
    display_stop.cancel();
    if let Err(err) = display.await {
        error!("Live display task failed: {err}");
    }

    // The controller already persisted the outcome.
    finish(&settings, None, outcome).await
}

async fn display_loop(reader: SnapshotReader, every: Duration, stop: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => println!("{}", live_status_line(&reader.snapshot())),
            _ = stop.cancelled() => break,
        }
    }
}

pub fn live_status_line(summary: &SessionSummary) -> String {
    let current = summary
        .timeline
        .last()
        .map(|point| format!("{:.1}% ({})", point.nervousness * 100.0, point.dominant))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "[{:>7.1}s] samples {:>5} | skipped {:>4} | nervousness now {} | mean {:.1}% | peak {:.1}% | confidence mean {:.1}%",
        summary.duration_secs,
        summary.sample_count,
        summary.skipped_frames,
        current,
        summary.nervousness.mean * 100.0,
        summary.nervousness.peak * 100.0,
        summary.confidence.mean * 100.0
    )
}

/// Persist (when `db` is given), export and print the outcome. A session
/// cut short by its source is still exported, then reported as an error.
async fn finish(settings: &AnalysisSettings, db: Option<&Database>, outcome: SessionOutcome) -> Result<()> {
    if let Some(db) = db {
        if let Err(err) = persist_outcome(db, &outcome).await {
            error!("Failed to persist session {}: {err:#}", outcome.session.id);
        }
    }

    let files = report::export_session(ExportRequest {
        output_dir: &settings.output_dir,
        source: &outcome.session.source,
        summary: &outcome.summary,
        samples: &outcome.samples,
        failure: outcome.failure.as_deref(),
        write_charts: settings.write_charts,
    })?;

    println!("{}", headline(&outcome.summary));
    println!("Data:   {}", files.csv.display());
    println!("Report: {}", files.report.display());
    for chart in &files.charts {
        println!("Chart:  {}", chart.display());
    }

    if let Some(failure) = &outcome.failure {
        bail!("session ended early: {failure}");
    }
    Ok(())
}

fn headline(summary: &SessionSummary) -> String {
    match (summary.nervousness.median, summary.nervousness.level) {
        (Some(median), Some(level)) => format!(
            "{} frames analyzed over {:.1}s; nervousness median {:.1}% ({}), confidence median {:.1}%, dominant emotion {}",
            summary.sample_count,
            summary.duration_secs,
            median * 100.0,
            level.as_str(),
            summary.confidence.median.unwrap_or(0.0) * 100.0,
            summary
                .dominant_overall
                .map(|label| label.as_str())
                .unwrap_or("none")
        ),
        _ => format!(
            "No faces analyzed ({} frames skipped, {} rejected)",
            summary.skipped_frames, summary.rejected_frames
        ),
    }
}

async fn print_history(db: &Database, limit: usize) -> Result<()> {
    let sessions = db.list_sessions(limit).await?;
    if sessions.is_empty() {
        println!("No sessions recorded yet.");
        return Ok(());
    }

    println!(
        "{:<20} {:<9} {:<12} {:>7} {:>8} {:>8}  SOURCE",
        "STARTED", "KIND", "STATUS", "SAMPLES", "MEAN", "PEAK"
    );
    for session in sessions {
        let pct = |value: Option<f64>| {
            value
                .map(|v| format!("{:.1}%", v * 100.0))
                .unwrap_or_else(|| "-".to_string())
        };
        println!(
            "{:<20} {:<9} {:<12} {:>7} {:>8} {:>8}  {}",
            session
                .started_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S"),
            session.kind.as_str(),
            session.status.as_str(),
            session.sample_count,
            pct(session.nervousness_mean),
            pct(session.nervousness_peak),
            session.source
        );
    }
    Ok(())
}

fn reanalyze(settings: AnalysisSettings, csv: PathBuf) -> Result<()> {
    let summary = report::reaggregate(&csv, settings.aggregation.clone())?;
    std::fs::create_dir_all(&settings.output_dir).with_context(|| {
        format!("failed to create output directory {}", settings.output_dir.display())
    })?;

    let now = Local::now();
    let source = csv.display().to_string();
    let paths = report::ExportPaths::allocate(&settings.output_dir, now);
    let text = report::render_report(
        &summary,
        &report::ReportContext {
            source: &source,
            generated_at: now,
            failure: None,
        },
    );
    std::fs::write(&paths.report, text)
        .with_context(|| format!("failed to write {}", paths.report.display()))?;

    println!("{}", headline(&summary));
    if summary.rejected_frames > 0 {
        println!("Skipped {} rows that did not validate", summary.rejected_frames);
    }
    println!("Report: {}", paths.report.display());
    if settings.write_charts {
        for chart in report::write_charts(&settings.output_dir, &paths.chart_stem, &summary)? {
            println!("Chart:  {}", chart.display());
        }
    }
    Ok(())
}
