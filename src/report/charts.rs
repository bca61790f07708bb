use std::{
    error::Error,
    f64::consts::{FRAC_PI_2, TAU},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Result};
use plotters::prelude::*;

use crate::aggregation::{HistogramBin, SessionSummary};
use crate::models::{EmotionLabel, EMOTION_COUNT};

type DrawResult = std::result::Result<(), Box<dyn Error>>;

const CHART_SIZE: (u32, u32) = (960, 540);
const FONT: &str = "sans-serif";
const NERVOUSNESS_COLOR: RGBColor = RGBColor(0xd6, 0x33, 0x84);
const CONFIDENCE_COLOR: RGBColor = RGBColor(0x2e, 0x9e, 0x5b);

fn label_color(label: EmotionLabel) -> RGBColor {
    match label {
        EmotionLabel::Happy => RGBColor(0x43, 0xe9, 0x7b),
        EmotionLabel::Neutral => RGBColor(0xc4, 0x71, 0xf5),
        EmotionLabel::Surprise => RGBColor(0xf0, 0x93, 0xfb),
        EmotionLabel::Angry => RGBColor(0xfa, 0x70, 0x9a),
        EmotionLabel::Disgust => RGBColor(0x66, 0x7e, 0xea),
        EmotionLabel::Fear => RGBColor(0xf5, 0xb0, 0x00),
        EmotionLabel::Sad => RGBColor(0x4f, 0xac, 0xfe),
    }
}

/// Tick text for a category axis where label `i` sits at x = i.
fn category_label(x: &f64) -> String {
    let nearest = x.round();
    if (x - nearest).abs() > 1e-6 || nearest < 0.0 {
        return String::new();
    }
    EmotionLabel::ALL
        .get(nearest as usize)
        .map(|label| label.as_str().to_string())
        .unwrap_or_default()
}

fn percent_label(y: &f64) -> String {
    format!("{:.0}%", y * 100.0)
}

fn category_range() -> std::ops::Range<f64> {
    -0.5..(EMOTION_COUNT as f64 - 0.5)
}

/// Nervousness and confidence over time, each with its session median.
fn draw_timeseries(path: &Path, summary: &SessionSummary) -> DrawResult {
    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let x_max = summary
        .timeline
        .last()
        .map(|point| point.timestamp)
        .unwrap_or(0.0)
        .max(1.0);

    let mut chart = ChartBuilder::on(&root)
        .caption("Confidence vs nervousness over time", (FONT, 24))
        .margin(16)
        .x_label_area_size(40)
        .y_label_area_size(56)
        .build_cartesian_2d(0f64..x_max, 0f64..1f64)?;

    chart
        .configure_mesh()
        .x_desc("Time (s)")
        .y_desc("Score")
        .y_label_formatter(&percent_label)
        .draw()?;

    chart
        .draw_series(LineSeries::new(
            summary
                .timeline
                .iter()
                .map(|point| (point.timestamp, point.nervousness)),
            NERVOUSNESS_COLOR.stroke_width(2),
        ))?
        .label("nervousness")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], NERVOUSNESS_COLOR.stroke_width(2)));

    chart
        .draw_series(LineSeries::new(
            summary
                .timeline
                .iter()
                .map(|point| (point.timestamp, point.confidence)),
            CONFIDENCE_COLOR.stroke_width(2),
        ))?
        .label("confidence")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], CONFIDENCE_COLOR.stroke_width(2)));

    for (name, median, color) in [
        ("nervousness", summary.nervousness.median, NERVOUSNESS_COLOR),
        ("confidence", summary.confidence.median, CONFIDENCE_COLOR),
    ] {
        let Some(median) = median else { continue };
        chart
            .draw_series(LineSeries::new(
                vec![(0.0, median), (x_max, median)],
                color.mix(0.6).stroke_width(1),
            ))?
            .label(format!("{name} median {}", percent_label(&median)))
            .legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 20, y)], color.mix(0.6).stroke_width(1))
            });
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

fn histogram_bars(
    bins: &[HistogramBin],
    color: RGBColor,
) -> impl Iterator<Item = Rectangle<(f64, f64)>> + '_ {
    bins.iter().filter(|bin| bin.count > 0).map(move |bin| {
        Rectangle::new(
            [(bin.lower, 0.0), (bin.upper, bin.count as f64)],
            color.mix(0.55).filled(),
        )
    })
}

/// Distribution of both per-frame scores with their medians marked.
fn draw_score_histogram(path: &Path, summary: &SessionSummary) -> DrawResult {
    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let y_max = summary
        .histogram
        .iter()
        .chain(summary.confidence_histogram.iter())
        .map(|bin| bin.count)
        .max()
        .unwrap_or(0)
        .max(1) as f64;

    let mut chart = ChartBuilder::on(&root)
        .caption("Distribution of confidence and nervousness", (FONT, 24))
        .margin(16)
        .x_label_area_size(40)
        .y_label_area_size(56)
        .build_cartesian_2d(0f64..1f64, 0f64..y_max * 1.1)?;

    chart
        .configure_mesh()
        .x_desc("Score")
        .y_desc("Frames")
        .x_label_formatter(&percent_label)
        .y_label_formatter(&|y: &f64| format!("{y:.0}"))
        .draw()?;

    for (name, bins, median, color) in [
        ("confidence", &summary.confidence_histogram, summary.confidence.median, CONFIDENCE_COLOR),
        ("nervousness", &summary.histogram, summary.nervousness.median, NERVOUSNESS_COLOR),
    ] {
        chart
            .draw_series(histogram_bars(bins, color))?
            .label(name)
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 20, y + 5)], color.mix(0.55).filled()));

        if let Some(median) = median {
            chart.draw_series(LineSeries::new(
                vec![(median, 0.0), (median, y_max * 1.1)],
                color.stroke_width(2),
            ))?;
        }
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

/// How often each label was dominant.
fn draw_dominant_counts(path: &Path, summary: &SessionSummary) -> DrawResult {
    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let y_max = summary
        .labels
        .iter()
        .map(|stats| stats.dominant_count)
        .max()
        .unwrap_or(0)
        .max(1) as f64;

    let mut chart = ChartBuilder::on(&root)
        .caption("Dominant emotion counts", (FONT, 24))
        .margin(16)
        .x_label_area_size(40)
        .y_label_area_size(56)
        .build_cartesian_2d(category_range(), 0f64..y_max * 1.1)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(EMOTION_COUNT)
        .x_label_formatter(&category_label)
        .y_desc("Frames")
        .y_label_formatter(&|y: &f64| format!("{y:.0}"))
        .draw()?;

    chart.draw_series(summary.labels.iter().map(|stats| {
        let x = stats.label.index() as f64;
        Rectangle::new(
            [(x - 0.35, 0.0), (x + 0.35, stats.dominant_count as f64)],
            label_color(stats.label).filled(),
        )
    }))?;

    root.present()?;
    Ok(())
}

/// Per-label score spread from the finalized quartiles.
fn draw_label_boxes(path: &Path, summary: &SessionSummary) -> DrawResult {
    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Score distribution per emotion", (FONT, 24))
        .margin(16)
        .x_label_area_size(40)
        .y_label_area_size(56)
        .build_cartesian_2d(category_range(), 0f64..1f64)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(EMOTION_COUNT)
        .x_label_formatter(&category_label)
        .y_desc("Classifier score")
        .y_label_formatter(&percent_label)
        .draw()?;

    let boxes: Vec<_> = summary
        .labels
        .iter()
        .filter_map(|stats| stats.quartiles.map(|q| (stats.label, q)))
        .collect();

    chart.draw_series(boxes.iter().map(|(label, q)| {
        let x = label.index() as f64;
        Rectangle::new([(x - 0.3, q.q1), (x + 0.3, q.q3)], label_color(*label).mix(0.6).filled())
    }))?;
    chart.draw_series(boxes.iter().map(|(label, q)| {
        let x = label.index() as f64;
        Rectangle::new([(x - 0.3, q.q1), (x + 0.3, q.q3)], label_color(*label).stroke_width(2))
    }))?;

    chart.draw_series(boxes.iter().flat_map(|(label, q)| {
        let x = label.index() as f64;
        [
            vec![(x, q.min), (x, q.q1)],
            vec![(x, q.q3), (x, q.max)],
            vec![(x - 0.15, q.min), (x + 0.15, q.min)],
            vec![(x - 0.15, q.max), (x + 0.15, q.max)],
        ]
        .into_iter()
        .map(|points| PathElement::new(points, BLACK.stroke_width(1)))
    }))?;
    chart.draw_series(boxes.iter().map(|(label, q)| {
        let x = label.index() as f64;
        PathElement::new(vec![(x - 0.3, q.median), (x + 0.3, q.median)], BLACK.stroke_width(3))
    }))?;

    root.present()?;
    Ok(())
}

/// Share of frames each label was dominant in.
fn draw_dominant_pie(path: &Path, summary: &SessionSummary) -> DrawResult {
    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let root = root.titled("Dominant emotion share", (FONT, 24))?;

    let slices: Vec<(EmotionLabel, f64)> = summary
        .dominant_proportions()
        .into_iter()
        .filter(|(_, share)| *share > 0.0)
        .collect();

    let (width, height) = root.dim_in_pixel();
    let center = (width as i32 / 2, height as i32 / 2);

    if slices.is_empty() {
        root.draw(&Text::new("No samples", (center.0 - 50, center.1), (FONT, 20)))?;
        root.present()?;
        return Ok(());
    }

    let radius = f64::from(width.min(height)) * 0.35;
    let at = |angle: f64, r: f64| {
        (
            center.0 + (r * angle.cos()).round() as i32,
            center.1 + (r * angle.sin()).round() as i32,
        )
    };

    let mut start = -FRAC_PI_2;
    for (label, share) in slices {
        let sweep = share * TAU;
        let steps = ((share * 120.0).ceil() as usize).max(2);
        let mut points = Vec::with_capacity(steps + 2);
        points.push(center);
        for step in 0..=steps {
            points.push(at(start + sweep * step as f64 / steps as f64, radius));
        }
        root.draw(&Polygon::new(points, label_color(label).filled()))?;

        let middle = start + sweep / 2.0;
        let (x, y) = at(middle, radius * 1.12);
        let anchor_x = if middle.cos() < 0.0 { x - 90 } else { x };
        root.draw(&Text::new(
            format!("{label} {:.1}%", share * 100.0),
            (anchor_x, y),
            (FONT, 16),
        ))?;
        start += sweep;
    }

    root.present()?;
    Ok(())
}

type ChartFn = fn(&Path, &SessionSummary) -> DrawResult;

const CHARTS: [(&str, ChartFn); 5] = [
    ("timeseries", draw_timeseries),
    ("score_histogram", draw_score_histogram),
    ("dominant_counts", draw_dominant_counts),
    ("emotion_boxplot", draw_label_boxes),
    ("dominant_share", draw_dominant_pie),
];

/// Paths `write_charts` would write for `stem`, in drawing order.
pub fn chart_paths(dir: &Path, stem: &str) -> Vec<PathBuf> {
    CHARTS
        .iter()
        .map(|(name, _)| dir.join(format!("{stem}_{name}.svg")))
        .collect()
}

/// Write every chart as `<stem>_<chart>.svg` in `dir`.
pub fn write_charts(dir: &Path, stem: &str, summary: &SessionSummary) -> Result<Vec<PathBuf>> {
    let paths = chart_paths(dir, stem);
    for (path, (_, draw)) in paths.iter().zip(CHARTS) {
        draw(path, summary).map_err(|err| anyhow!("failed to draw {}: {err}", path.display()))?;
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{AggregationConfig, Aggregator};
    use crate::models::EmotionVector;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn category_ticks_only_at_label_positions() {
        assert_eq!(category_label(&0.0), "happy");
        assert_eq!(category_label(&6.0), "sad");
        assert_eq!(category_label(&2.5), "");
        assert_eq!(category_label(&7.0), "");
        assert_eq!(category_label(&-1.0), "");
    }

    #[test]
    fn writes_all_charts_for_a_session() {
        let mut aggregator = Aggregator::new(AggregationConfig::default()).unwrap();
        for i in 0..5u64 {
            let fear = 0.1 * i as f64;
            let vector = EmotionVector::zeroed()
                .with(EmotionLabel::Fear, fear)
                .with(EmotionLabel::Happy, 0.5 - fear / 2.0);
            aggregator.ingest(i, i as f64, vector).unwrap();
        }
        let summary = aggregator.finalize().unwrap();

        let dir = tempdir().unwrap();
        let written = write_charts(dir.path(), "emotion_analysis", &summary).unwrap();
        assert_eq!(written.len(), 5);
        for path in &written {
            let svg = fs::read_to_string(path).unwrap();
            assert!(svg.contains("<svg"), "{}", path.display());
        }
        assert!(written[0].ends_with("emotion_analysis_timeseries.svg"));
        assert_eq!(written, chart_paths(dir.path(), "emotion_analysis"));

        let timeseries = fs::read_to_string(&written[0]).unwrap();
        assert!(timeseries.contains("confidence median"));
        let histogram = fs::read_to_string(&written[1]).unwrap();
        assert!(written[1].ends_with("emotion_analysis_score_histogram.svg"));
        assert!(histogram.contains("Distribution of confidence and nervousness"));
        assert!(histogram.contains("<rect"));
    }

    #[test]
    fn empty_session_still_produces_charts() {
        let mut aggregator = Aggregator::new(AggregationConfig::default()).unwrap();
        let summary = aggregator.finalize().unwrap();
        let dir = tempdir().unwrap();
        let written = write_charts(dir.path(), "empty", &summary).unwrap();
        let pie = fs::read_to_string(&written[4]).unwrap();
        assert!(pie.contains("No samples"));
    }
}
