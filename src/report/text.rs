use std::fmt::Write as _;

use chrono::{DateTime, Local};

use crate::aggregation::{NervousnessLevel, SessionSummary};

/// Context that the summary itself does not carry.
#[derive(Debug, Clone)]
pub struct ReportContext<'a> {
    pub source: &'a str,
    pub generated_at: DateTime<Local>,
    /// Why the session ended early, if it did.
    pub failure: Option<&'a str>,
}

fn level_description(level: NervousnessLevel) -> &'static str {
    match level {
        NervousnessLevel::High => "notably high",
        NervousnessLevel::Medium => "moderately elevated",
        NervousnessLevel::Low => "relatively low",
    }
}

fn confidence_description(median: f64) -> &'static str {
    if median > 0.7 {
        "consistently high confidence levels"
    } else if median > 0.5 {
        "moderate to high confidence levels"
    } else if median > 0.3 {
        "moderate confidence with some uncertainty"
    } else {
        "lower confidence levels"
    }
}

fn trend_description(slope_per_sec: f64) -> &'static str {
    // Less than 0.01 per minute either way reads as flat.
    let per_minute = slope_per_sec * 60.0;
    if per_minute > 0.01 {
        "rising"
    } else if per_minute < -0.01 {
        "falling"
    } else {
        "steady"
    }
}

fn stability_description(std_dev: f64) -> &'static str {
    if std_dev > 0.2 {
        "high emotional variability"
    } else if std_dev > 0.1 {
        "moderate emotional consistency"
    } else {
        "a stable emotional state"
    }
}

fn pct(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

/// Plain-text session report. Values are read from `summary` as is.
pub fn render_report(summary: &SessionSummary, context: &ReportContext<'_>) -> String {
    let mut out = String::new();
    let nervousness = &summary.nervousness;
    let confidence = &summary.confidence;

    let _ = writeln!(out, "EMOTION ANALYSIS REPORT");
    let _ = writeln!(out, "=======================");
    let _ = writeln!(out);
    let _ = writeln!(out, "Analysis date:     {}", context.generated_at.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "Source:            {}", context.source);
    let _ = writeln!(out, "Duration:          {:.1} s", summary.duration_secs);
    let _ = writeln!(out, "Frames analyzed:   {}", summary.sample_count);
    let _ = writeln!(out, "Frames skipped:    {} (no face)", summary.skipped_frames);
    let _ = writeln!(out, "Frames rejected:   {}", summary.rejected_frames);
    let _ = writeln!(out, "Detection coverage: {}", pct(summary.detection_coverage()));
    let _ = writeln!(out, "Analysis rate:     {:.2} frames/s", summary.analysis_rate());
    let _ = writeln!(out, "Nervousness policy: {}", summary.policy_name);
    let _ = writeln!(out, "Confidence policy: {}", summary.confidence_policy_name);
    if let Some(failure) = context.failure {
        let _ = writeln!(out, "Ended early:       {failure}");
    }
    let _ = writeln!(out);

    if summary.sample_count == 0 {
        let _ = writeln!(out, "No faces were analyzed; there is nothing to summarize.");
        return out;
    }

    let _ = writeln!(out, "NERVOUSNESS");
    let _ = writeln!(out, "-----------");
    if let Some(median) = nervousness.median {
        let _ = writeln!(out, "Median:            {}", pct(median));
    }
    let _ = writeln!(out, "Average:           {}", pct(nervousness.mean));
    let _ = writeln!(out, "Std deviation:     {}", pct(nervousness.std_dev));
    match nervousness.peak_at {
        Some(at) => {
            let _ = writeln!(out, "Maximum:           {} at {:.1} s", pct(nervousness.peak), at);
        }
        None => {
            let _ = writeln!(out, "Maximum:           {}", pct(nervousness.peak));
        }
    }
    let _ = writeln!(out, "Minimum:           {}", pct(nervousness.min));
    if let Some(level) = nervousness.level {
        let _ = writeln!(out, "Level:             {}", level.as_str());
    }
    let _ = writeln!(
        out,
        "Trend:             {} ({:+.2} points/min)",
        trend_description(nervousness.trend_per_sec),
        nervousness.trend_per_sec * 60.0 * 100.0
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "CONFIDENCE");
    let _ = writeln!(out, "----------");
    if let Some(median) = confidence.median {
        let _ = writeln!(out, "Median:            {}", pct(median));
    }
    let _ = writeln!(out, "Average:           {}", pct(confidence.mean));
    let _ = writeln!(out, "Std deviation:     {}", pct(confidence.std_dev));
    let _ = writeln!(out, "Maximum:           {}", pct(confidence.max));
    let _ = writeln!(out, "Minimum:           {}", pct(confidence.min));
    let _ = writeln!(out);

    let _ = writeln!(out, "EMOTIONS");
    let _ = writeln!(out, "--------");
    let _ = writeln!(out, "{:<10} {:>9} {:>9} {:>9}", "label", "average", "peak", "dominant");
    for stats in &summary.labels {
        let peak = stats
            .quartiles
            .map(|q| pct(q.max))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<10} {:>9} {:>9} {:>9}",
            stats.label.as_str(),
            pct(stats.mean),
            peak,
            stats.dominant_count
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "KEY INSIGHTS");
    let _ = writeln!(out, "------------");
    if let Some(median) = confidence.median {
        let _ = writeln!(out, "- The subject showed {}.", confidence_description(median));
    }
    if let Some(level) = nervousness.level {
        let _ = writeln!(out, "- Nervousness levels were {}.", level_description(level));
    }
    if let Some(dominant) = summary.dominant_overall {
        let _ = writeln!(out, "- The most prevalent emotion was {dominant}.");
    }
    let _ = writeln!(
        out,
        "- Confidence variability suggests {}.",
        stability_description(confidence.std_dev)
    );

    out
}
