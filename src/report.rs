//! Report export.
//!
//! A report is a pure function of a [`SurveySnapshot`]: nothing here feeds
//! back into the survey. It consists of
//!
//! - a vehicle distribution chart (SVG),
//! - a Markdown document with the analysis, precautions, suggestions and a
//!   table of every recorded survey,
//! - a CSV dump of the same table.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use thiserror::Error;
use tracing::info;

use crate::controller::SurveySnapshot;
use crate::model::{AnalysisResult, SurveyRecord, VehicleCategory, VehicleCounts};
use crate::tally::distribution;

pub const REPORT_FILE: &str = "traffic-analysis-report.md";
pub const CHART_FILE: &str = "vehicle-distribution.svg";
pub const HISTORY_FILE: &str = "traffic-history.csv";

/// Column headers of the history table.
const HISTORY_COLUMNS: [&str; 14] = [
    "Interval",
    "Time",
    "2W",
    "3W",
    "4W",
    "Heavy",
    "Human Flow",
    "Jams",
    "Delays",
    "Signals",
    "Wrong Dir.",
    "Locality",
    "Cause",
    "Remarks",
];

const CHART_WIDTH: u32 = 600;
const CHART_LABEL_WIDTH: u32 = 130;
const CHART_BAR_HEIGHT: u32 = 28;
const CHART_BAR_GAP: u32 = 12;
const CHART_PADDING: u32 = 16;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report content not available: {0}")]
    NotReady(&'static str),

    #[error("failed to write report: {0}")]
    Io(#[from] io::Error),

    #[error("failed to write history table: {0}")]
    Csv(#[from] csv::Error),
}

/// Everything needed to render one report.
#[derive(Debug, Clone)]
pub struct Report {
    pub generated_on: NaiveDate,
    pub counts: VehicleCounts,
    pub analysis: AnalysisResult,
    pub history: Arc<[SurveyRecord]>,
}

/// Paths written by [`Report::export_to_dir`].
#[derive(Debug, Clone)]
pub struct ExportedFiles {
    pub report: PathBuf,
    pub chart: PathBuf,
    pub history: PathBuf,
}

impl Report {
    /// Build a report from a snapshot.
    ///
    /// Requires a completed analysis and at least one recorded survey.
    pub fn from_snapshot(
        snapshot: &SurveySnapshot,
        generated_on: NaiveDate,
    ) -> Result<Self, ReportError> {
        let analysis = snapshot
            .analysis
            .clone()
            .ok_or(ReportError::NotReady("no completed analysis"))?;
        if snapshot.history.is_empty() {
            return Err(ReportError::NotReady("no recorded surveys"));
        }

        Ok(Self {
            generated_on,
            counts: snapshot.counts,
            analysis,
            history: Arc::clone(&snapshot.history),
        })
    }

    pub fn chart_svg(&self) -> String {
        render_chart_svg(&self.counts)
    }

    /// Render the Markdown document. The chart is referenced by file name.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Traffic Analysis Report\n");
        let _ = writeln!(out, "Generated on: {}\n", self.generated_on.format("%Y-%m-%d"));

        let _ = writeln!(out, "## Vehicle Distribution\n");
        let _ = writeln!(out, "![Vehicle distribution]({})\n", CHART_FILE);
        for row in distribution(&self.counts) {
            let _ = writeln!(out, "- {}: {} ({:.1}%)", row.label, row.count, row.percentage);
        }
        let _ = writeln!(out, "- Total: {}\n", self.counts.total());

        let _ = writeln!(out, "## AI Analysis & Precautions\n");
        let _ = writeln!(out, "### Conclusion\n\n{}\n", self.analysis.conclusion.trim());
        let _ = writeln!(out, "### Precautions\n\n{}\n", self.analysis.precautions.trim());

        let _ = writeln!(out, "## Development Suggestions\n");
        let _ = writeln!(out, "{}\n", self.analysis.suggestions.trim());

        let _ = writeln!(out, "## Survey Data\n");
        let _ = writeln!(out, "| {} |", HISTORY_COLUMNS.join(" | "));
        let _ = writeln!(
            out,
            "|{}",
            HISTORY_COLUMNS.iter().map(|_| "---|").collect::<String>()
        );
        for record in self.history.iter() {
            let cells: Vec<String> = history_row(record)
                .into_iter()
                .map(|cell| escape_cell(&cell))
                .collect();
            let _ = writeln!(out, "| {} |", cells.join(" | "));
        }

        out
    }

    /// Write the history table as CSV.
    pub fn write_history_csv<W: io::Write>(&self, writer: W) -> Result<(), ReportError> {
        write_history_csv(&self.history, writer)
    }

    /// Write the report, chart and history table into `dir`.
    pub fn export_to_dir(&self, dir: &Path) -> Result<ExportedFiles, ReportError> {
        fs::create_dir_all(dir)?;

        let files = ExportedFiles {
            report: dir.join(REPORT_FILE),
            chart: dir.join(CHART_FILE),
            history: dir.join(HISTORY_FILE),
        };

        fs::write(&files.report, self.to_markdown())?;
        fs::write(&files.chart, self.chart_svg())?;
        self.write_history_csv(fs::File::create(&files.history)?)?;

        info!(
            dir = %dir.display(),
            records = self.history.len(),
            "Report exported"
        );
        Ok(files)
    }
}

/// Write survey records as CSV, one row per record, most recent first.
pub fn write_history_csv<W: io::Write>(
    records: &[SurveyRecord],
    writer: W,
) -> Result<(), ReportError> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(HISTORY_COLUMNS)?;
    for record in records {
        csv.write_record(history_row(record))?;
    }
    csv.flush()?;
    Ok(())
}

fn history_row(record: &SurveyRecord) -> Vec<String> {
    let d = &record.details;
    vec![
        record.time_interval.clone(),
        record.traffic_time.to_string(),
        record.counts.two_wheelers.to_string(),
        record.counts.three_wheelers.to_string(),
        record.counts.four_wheelers.to_string(),
        record.counts.heavy_vehicles.to_string(),
        d.human_flow.to_string(),
        d.jams.to_string(),
        d.delays.to_string(),
        d.signals.to_string(),
        d.wrong_direction.to_string(),
        d.locality.to_string(),
        d.congestion_cause.to_string(),
        d.remarks.clone().unwrap_or_default(),
    ]
}

fn escape_cell(cell: &str) -> String {
    cell.replace('|', "\\|").replace(['\r', '\n'], " ")
}

fn bar_color(category: VehicleCategory) -> &'static str {
    match category {
        VehicleCategory::TwoWheeler => "#2980b9",
        VehicleCategory::ThreeWheeler => "#27ae60",
        VehicleCategory::FourWheeler => "#f39c12",
        VehicleCategory::Heavy => "#c0392b",
    }
}

/// Horizontal bar chart of vehicle counts.
///
/// Bars are scaled to the largest count; an all-zero tally renders empty
/// bars.
pub fn render_chart_svg(counts: &VehicleCounts) -> String {
    let rows = distribution(counts);
    let max = rows.iter().map(|r| r.count).max().unwrap_or(0);
    let bar_area = CHART_WIDTH - CHART_LABEL_WIDTH - 2 * CHART_PADDING - 48;
    let height = 2 * CHART_PADDING
        + rows.len() as u32 * (CHART_BAR_HEIGHT + CHART_BAR_GAP)
        - CHART_BAR_GAP
        + 28;

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="sans-serif" font-size="14">"#,
        w = CHART_WIDTH,
        h = height
    );
    let _ = writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#);
    let _ = writeln!(
        svg,
        r#"<text x="{x}" y="{y}" font-size="16" font-weight="bold">Vehicle Distribution</text>"#,
        x = CHART_PADDING,
        y = CHART_PADDING + 4
    );

    for (i, row) in rows.iter().enumerate() {
        let y = CHART_PADDING + 28 + i as u32 * (CHART_BAR_HEIGHT + CHART_BAR_GAP);
        let width = if max > 0 {
            (u64::from(row.count) * u64::from(bar_area) / u64::from(max)) as u32
        } else {
            0
        };
        let bar_x = CHART_PADDING + CHART_LABEL_WIDTH;
        let text_y = y + CHART_BAR_HEIGHT / 2 + 5;

        let _ = writeln!(
            svg,
            r#"<text x="{x}" y="{ty}">{label}</text>"#,
            x = CHART_PADDING,
            ty = text_y,
            label = row.label
        );
        let _ = writeln!(
            svg,
            r#"<rect x="{x}" y="{y}" width="{w}" height="{h}" rx="5" fill="{fill}"/>"#,
            x = bar_x,
            y = y,
            w = width,
            h = CHART_BAR_HEIGHT,
            fill = bar_color(row.category)
        );
        let _ = writeln!(
            svg,
            r#"<text x="{x}" y="{ty}">{count}</text>"#,
            x = bar_x + width + 8,
            ty = text_y,
            count = row.count
        );
    }

    svg.push_str("</svg>\n");
    svg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{Command, SurveyState};
    use crate::form::DetailsSubmission;
    use chrono::{TimeZone, Utc};

    fn completed_snapshot(remarks: Option<&str>) -> SurveySnapshot {
        let mut state = SurveyState::default()
            .apply(Command::Start { minutes: Some(2) })
            .unwrap()
            .state;
        for _ in 0..3 {
            state = state
                .apply(Command::Increment(VehicleCategory::TwoWheeler))
                .unwrap()
                .state;
        }
        state = state
            .apply(Command::Increment(VehicleCategory::Heavy))
            .unwrap()
            .state;
        state = state.apply(Command::FinishEarly).unwrap().state;

        let submission = DetailsSubmission {
            remarks: remarks.map(str::to_string),
            ..DetailsSubmission::defaults()
        };
        let submitted_at = Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap().fixed_offset();
        state = state
            .apply(Command::Submit {
                submission,
                submitted_at,
            })
            .unwrap()
            .state;

        let record_id = state.history()[0].id.clone();
        let ticket = state.in_flight().unwrap();
        state
            .apply(Command::InsightReady {
                ticket,
                result: AnalysisResult {
                    record_id,
                    conclusion: "Two-wheelers dominate.".into(),
                    precautions: "Watch lane splitting.".into(),
                    suggestions: "Dedicated two-wheeler lane.".into(),
                },
            })
            .unwrap()
            .state
            .snapshot()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()
    }

    #[test]
    fn test_not_ready_without_analysis() {
        let snapshot = SurveyState::default().snapshot();
        let err = Report::from_snapshot(&snapshot, date()).unwrap_err();
        assert!(matches!(err, ReportError::NotReady(_)));
    }

    #[test]
    fn test_markdown_contains_all_sections() {
        let report = Report::from_snapshot(&completed_snapshot(Some("a | b")), date()).unwrap();
        let markdown = report.to_markdown();

        assert!(markdown.contains("Generated on: 2024-07-01"));
        assert!(markdown.contains("### Conclusion\n\nTwo-wheelers dominate."));
        assert!(markdown.contains("### Precautions\n\nWatch lane splitting."));
        assert!(markdown.contains("## Development Suggestions\n\nDedicated two-wheeler lane."));
        assert!(markdown.contains("- 2-Wheelers: 3 (75.0%)"));
        assert!(markdown.contains("| 2 minute(s) | Peak Time | 3 | 0 | 0 | 1 |"));
        assert!(markdown.contains("a \\| b"));
    }

    #[test]
    fn test_history_csv() {
        let report = Report::from_snapshot(&completed_snapshot(None), date()).unwrap();
        let mut buf = Vec::new();
        report.write_history_csv(&mut buf).unwrap();

        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Interval,Time,2W,3W,4W,Heavy"));
        assert_eq!(
            lines[1],
            "2 minute(s),Peak Time,3,0,0,1,Normal,Normal,Normal,Normal,Less,Mixed-use,Peak Hour Rush,"
        );
    }

    #[test]
    fn test_chart_scales_to_largest_count() {
        let counts = VehicleCounts {
            two_wheelers: 10,
            heavy_vehicles: 5,
            ..Default::default()
        };
        let svg = render_chart_svg(&counts);

        assert!(svg.starts_with("<svg"));
        assert!(svg.contains(">2-Wheelers</text>"));
        assert!(svg.contains(r#"width="390""#));
        assert!(svg.contains(r#"width="195""#));
        assert!(svg.trim_end().ends_with("</svg>"));
    }

    #[test]
    fn test_chart_empty_counts() {
        let svg = render_chart_svg(&VehicleCounts::default());
        assert_eq!(svg.matches(r#"width="0""#).count(), 4);
    }

    #[test]
    fn test_export_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let report = Report::from_snapshot(&completed_snapshot(None), date()).unwrap();

        let files = report.export_to_dir(dir.path()).unwrap();

        assert!(fs::read_to_string(&files.report).unwrap().contains("# Traffic Analysis Report"));
        assert!(fs::read_to_string(&files.chart).unwrap().contains("<svg"));
        assert_eq!(fs::read_to_string(&files.history).unwrap().lines().count(), 2);
    }
}
